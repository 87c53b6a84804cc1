use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::{BranchConfig, SandboxNaming, ScanNaming};
use crate::error::SyncError;
use crate::vcs;

/// Inputs the naming policies draw from. Kept separate from the process
/// environment so the policies stay pure.
#[derive(Debug, Clone)]
pub struct NamingInputs {
    pub branch: String,
    pub sandbox_param: Option<String>,
    pub scan_name_param: Option<String>,
    pub now: DateTime<Utc>,
    pub repo_dir: PathBuf,
    env: fn(&str) -> Option<String>,
}

impl NamingInputs {
    pub fn new(branch: impl Into<String>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            branch: branch.into(),
            sandbox_param: None,
            scan_name_param: None,
            now: Utc::now(),
            repo_dir: repo_dir.into(),
            env: |key| std::env::var(key).ok(),
        }
    }

    pub fn with_sandbox_param(mut self, value: Option<String>) -> Self {
        self.sandbox_param = value;
        self
    }

    pub fn with_scan_name_param(mut self, value: Option<String>) -> Self {
        self.scan_name_param = value;
        self
    }

    #[cfg(test)]
    fn with_env(mut self, env: fn(&str) -> Option<String>) -> Self {
        self.env = env;
        self
    }

    fn env_var(&self, key: Option<&str>) -> Option<String> {
        key.and_then(|k| (self.env)(k))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// The sandbox name under the segment's `sandbox_naming` policy.
pub fn sandbox_name(config: &BranchConfig, inputs: &NamingInputs) -> Result<String, SyncError> {
    let Some(policy) = config.sandbox_naming else {
        return Err(SyncError::SandboxNameUnresolved {
            policy: "unset".to_string(),
        });
    };
    let name = match policy {
        SandboxNaming::Branch => Some(inputs.branch.clone()),
        SandboxNaming::Env => inputs.env_var(config.sandbox_naming_env.as_deref()),
        SandboxNaming::Param => inputs.sandbox_param.clone(),
    };
    non_empty(name).ok_or_else(|| SyncError::SandboxNameUnresolved {
        policy: format!("{policy:?}").to_lowercase(),
    })
}

/// The scan (build version) name under the segment's `scan_naming` policy.
pub fn scan_name(config: &BranchConfig, inputs: &NamingInputs) -> Result<String, SyncError> {
    let name = match config.scan_naming {
        ScanNaming::Timestamp => Some(inputs.now.format("[%Y-%m-%d %H:%M:%S UTC]").to_string()),
        ScanNaming::Env => inputs.env_var(config.scan_naming_env.as_deref()),
        ScanNaming::Param => inputs.scan_name_param.clone(),
        ScanNaming::Vcs => match vcs::describe(&inputs.repo_dir) {
            Ok(label) => Some(label),
            Err(e) => {
                tracing::warn!(error = %e, "could not derive scan name from git");
                None
            }
        },
    };
    non_empty(name).ok_or_else(|| SyncError::InvalidScanName {
        policy: format!("{:?}", config.scan_naming).to_lowercase(),
    })
}
