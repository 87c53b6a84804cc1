use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::SyncError;
use crate::tickets::SyncFilter;

pub const DEFAULT_CONFIG_FILE: &str = "veracode.config";

const DEFAULT_RESULTS_TIMEOUT_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Policy,
    Sandbox,
    Pipeline,
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanType::Policy => write!(f, "policy"),
            ScanType::Sandbox => write!(f, "sandbox"),
            ScanType::Pipeline => write!(f, "pipeline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxNaming {
    Branch,
    Env,
    Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanNaming {
    Timestamp,
    Env,
    Param,
    Vcs,
}

/// One segment of the configuration document, selected by matching its
/// `branch_pattern` against the branch being built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchConfig {
    #[serde(alias = "match_pattern")]
    pub branch_pattern: String,
    pub scan_type: ScanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_naming: Option<SandboxNaming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_naming_env: Option<String>,
    pub scan_naming: ScanNaming,
    #[serde(default, alias = "scan_name_env", skip_serializing_if = "Option::is_none")]
    pub scan_naming_env: Option<String>,
    #[serde(default)]
    pub upload_include_patterns: Vec<String>,
    #[serde(default)]
    pub upload_exclude_patterns: Vec<String>,
    #[serde(default = "default_results_timeout")]
    pub results_timeout_seconds: u64,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticketing: Option<TicketingConfig>,
    /// Fields this tool does not interpret; written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_results_timeout() -> u64 {
    DEFAULT_RESULTS_TIMEOUT_SECONDS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketingConfig {
    pub tracker: String,
    pub base_url: String,
    pub project: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
    #[serde(default)]
    pub sync_filter: SyncFilter,
    #[serde(default = "default_close_transition")]
    pub close_transition: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_issue_type() -> String {
    "Bug".to_string()
}

fn default_close_transition() -> String {
    "Done".to_string()
}

impl BranchConfig {
    /// Placeholder segment written by the `skeleton` command.
    pub fn skeleton(branch_pattern: &str) -> Self {
        Self {
            branch_pattern: branch_pattern.to_string(),
            scan_type: ScanType::Policy,
            sandbox_naming: None,
            sandbox_naming_env: None,
            scan_naming: ScanNaming::Timestamp,
            scan_naming_env: None,
            upload_include_patterns: vec!["target/*.war".to_string()],
            upload_exclude_patterns: vec![],
            results_timeout_seconds: DEFAULT_RESULTS_TIMEOUT_SECONDS,
            app_id: "<app_id>".to_string(),
            sandbox_id: None,
            ticketing: None,
            extra: Map::new(),
        }
    }

    fn full_match_regex(&self) -> Result<Regex, SyncError> {
        Regex::new(&format!("^(?:{})$", self.branch_pattern)).map_err(|e| {
            SyncError::InvalidConfig(format!(
                "branch_pattern '{}' is not a valid regex: {e}",
                self.branch_pattern
            ))
        })
    }

    pub fn matches(&self, branch: &str) -> Result<bool, SyncError> {
        Ok(self.full_match_regex()?.is_match(branch))
    }
}

/// Return the first segment, in list order, whose pattern matches the whole
/// branch name.
pub fn resolve<'a>(branch: &str, configs: &'a [BranchConfig]) -> Result<&'a BranchConfig, SyncError> {
    for config in configs {
        if config.matches(branch)? {
            debug!(branch, pattern = %config.branch_pattern, "configuration resolved");
            return Ok(config);
        }
    }
    Err(SyncError::NoMatchingConfig {
        branch: branch.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

/// The ordered list of branch segments, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    pub segments: Vec<BranchConfig>,
}

impl ConfigDocument {
    /// Load the document. A missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found; using empty configuration");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content, DocumentFormat::for_path(path))
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    fn parse(content: &str, format: DocumentFormat) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let segments = match format {
            DocumentFormat::Json => serde_json::from_str(content)?,
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
        };
        Ok(Self { segments })
    }

    pub fn to_string_for(&self, path: &Path) -> Result<String> {
        Ok(match DocumentFormat::for_path(path) {
            DocumentFormat::Json => serde_json::to_string_pretty(&self.segments)?,
            DocumentFormat::Yaml => serde_yaml::to_string(&self.segments)?,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_string_for(path)?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn resolve(&self, branch: &str) -> Result<&BranchConfig, SyncError> {
        resolve(branch, &self.segments)
    }

    /// Append a skeleton segment for `branch_pattern` unless one with the
    /// same pattern already exists. Returns whether a segment was added.
    pub fn add_skeleton(&mut self, branch_pattern: &str) -> bool {
        if self
            .segments
            .iter()
            .any(|s| s.branch_pattern == branch_pattern)
        {
            return false;
        }
        self.segments.push(BranchConfig::skeleton(branch_pattern));
        true
    }
}
