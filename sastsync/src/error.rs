use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures a pipeline stage can report. Each maps onto an [`ErrorKind`]
/// that is persisted with the execution context.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no configuration segment matches branch '{branch}'")]
    NoMatchingConfig { branch: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sandbox naming policy '{policy}' produced an empty name")]
    SandboxNameUnresolved { policy: String },

    #[error("failed to create sandbox '{name}'")]
    SandboxCreateFailed { name: String },

    #[error("invalid scan name: must not be empty (naming policy '{policy}')")]
    InvalidScanName { policy: String },

    #[error("scan service returned no build id for '{scan_name}'")]
    BuildCreateFailed { scan_name: String },

    #[error("upload patterns matched no files")]
    NothingToUpload,

    #[error("failed to upload {file}: {reason}")]
    UploadFailed { file: String, reason: String },

    #[error("results for build {build_id} not ready after {timeout_seconds}s")]
    ResultsTimeout { build_id: String, timeout_seconds: u64 },

    #[error("no completed build found for app {app_id}")]
    NoCompletedBuild { app_id: String },

    #[error("sandbox '{name}' does not exist for app {app_id}")]
    SandboxNotFound { app_id: String, name: String },

    #[error("context belongs to branch '{found}', not '{expected}'")]
    StaleContext { expected: String, found: String },

    #[error("no scan results in context; run the results stage first")]
    MissingResults,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoMatchingConfig { .. } => ErrorKind::NoMatchingConfig,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::SandboxNameUnresolved { .. } => ErrorKind::SandboxNameUnresolved,
            Self::SandboxCreateFailed { .. } => ErrorKind::SandboxCreateFailed,
            Self::InvalidScanName { .. } => ErrorKind::InvalidScanName,
            Self::BuildCreateFailed { .. } => ErrorKind::BuildCreateFailed,
            Self::NothingToUpload => ErrorKind::NothingToUpload,
            Self::UploadFailed { .. } => ErrorKind::UploadFailed,
            Self::ResultsTimeout { .. } => ErrorKind::ResultsTimeout,
            Self::NoCompletedBuild { .. } => ErrorKind::NoCompletedBuild,
            Self::SandboxNotFound { .. } => ErrorKind::SandboxNotFound,
            Self::StaleContext { .. } => ErrorKind::StaleContext,
            Self::MissingResults => ErrorKind::MissingResults,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoMatchingConfig,
    InvalidConfig,
    SandboxNameUnresolved,
    SandboxCreateFailed,
    InvalidScanName,
    BuildCreateFailed,
    NothingToUpload,
    UploadFailed,
    ResultsTimeout,
    NoCompletedBuild,
    SandboxNotFound,
    StaleContext,
    MissingResults,
    /// Anything raised by a remote collaborator or the filesystem.
    Transport,
}

impl ErrorKind {
    /// Only a results timeout may be resumed by re-running the same stage.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ResultsTimeout)
    }

    /// Classify an error raised inside a stage.
    pub fn of(err: &anyhow::Error) -> Self {
        err.downcast_ref::<SyncError>()
            .map(SyncError::kind)
            .unwrap_or(ErrorKind::Transport)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{self:?}"));
        f.write_str(&s)
    }
}
