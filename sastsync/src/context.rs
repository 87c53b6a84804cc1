use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, SyncError};
use crate::report::AggregatedReport;

pub const DEFAULT_CONTEXT_FILE: &str = "veracode.output";

/// Bumped whenever the persisted layout changes incompatibly.
pub const CONTEXT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// State carried from one pipeline stage (one process invocation) to the
/// next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub version: u32,
    pub branch: String,
    #[serde(default)]
    pub build_id: Option<String>,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub scan_name: Option<String>,
    #[serde(default)]
    pub error: Option<StageError>,
    #[serde(default)]
    pub results: Option<AggregatedReport>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            version: CONTEXT_VERSION,
            branch: branch.into(),
            build_id: None,
            sandbox_id: None,
            scan_name: None,
            error: None,
            results: None,
            extra: Map::new(),
        }
    }

    pub fn record_error(&mut self, stage: &str, err: &anyhow::Error) {
        self.error = Some(StageError {
            stage: stage.to_string(),
            kind: ErrorKind::of(err),
            message: format!("{err:#}"),
        });
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize execution context")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json_pretty()?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// A context read back from storage that has not yet been checked against
/// the branch of the current invocation. The only way to obtain an
/// [`ExecutionContext`] from it is [`PersistedContext::claim`].
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedContext(ExecutionContext);

impl PersistedContext {
    /// Read the context document at `path`; `None` when there is none.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Option<Self>> {
        let trimmed = content.trim();
        // An empty list means there was nothing to carry.
        if trimmed.is_empty() || trimmed == "[]" {
            return Ok(None);
        }
        let ctx: ExecutionContext =
            serde_json::from_str(trimmed).context("invalid execution context document")?;
        Ok(Some(Self(ctx)))
    }

    pub fn branch(&self) -> &str {
        &self.0.branch
    }

    pub fn claim(self, branch: &str) -> Result<ExecutionContext, SyncError> {
        if self.0.version != CONTEXT_VERSION {
            return Err(SyncError::StaleContext {
                expected: branch.to_string(),
                found: format!("{} (context version {})", self.0.branch, self.0.version),
            });
        }
        if self.0.branch != branch {
            return Err(SyncError::StaleContext {
                expected: branch.to_string(),
                found: self.0.branch,
            });
        }
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_is_clean() {
        let ctx = ExecutionContext::new("main");
        assert_eq!(ctx.version, CONTEXT_VERSION);
        assert!(!ctx.has_error());
        assert!(ctx.results.is_none());
    }

    #[test]
    fn claim_with_matching_branch() {
        let mut ctx = ExecutionContext::new("release/1.0");
        ctx.build_id = Some("77".into());
        let persisted = PersistedContext::parse(&ctx.to_json_pretty().unwrap())
            .unwrap()
            .unwrap();
        let claimed = persisted.claim("release/1.0").unwrap();
        assert_eq!(claimed.build_id.as_deref(), Some("77"));
    }

    #[test]
    fn claim_with_other_branch_is_stale() {
        let ctx = ExecutionContext::new("feature/a");
        let persisted = PersistedContext::parse(&ctx.to_json_pretty().unwrap())
            .unwrap()
            .unwrap();
        let err = persisted.claim("main").unwrap_err();
        assert!(matches!(err, SyncError::StaleContext { .. }));
        assert!(err.to_string().contains("feature/a"));
    }

    #[test]
    fn claim_with_wrong_version_is_stale() {
        let json = r#"{"branch": "main", "build_id": "1"}"#;
        let persisted = PersistedContext::parse(json).unwrap().unwrap();
        let err = persisted.claim("main").unwrap_err();
        assert!(err.to_string().contains("version 0"));
    }

    #[test]
    fn empty_document_has_no_context() {
        assert!(PersistedContext::parse("").unwrap().is_none());
        assert!(PersistedContext::parse("[]").unwrap().is_none());
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let json = r#"{
            "version": 1,
            "branch": "main",
            "build_id": "5",
            "sandbox_id": null,
            "scan_name": "nightly",
            "error": null,
            "results": null,
            "dast": {"scan_id": "abc"}
        }"#;
        let ctx = PersistedContext::parse(json).unwrap().unwrap().claim("main").unwrap();
        let out: Value = serde_json::from_str(&ctx.to_json_pretty().unwrap()).unwrap();
        assert_eq!(out["dast"]["scan_id"], "abc");
        assert_eq!(out["scan_name"], "nightly");
    }

    #[test]
    fn record_error_classifies_and_keeps_chain() {
        let mut ctx = ExecutionContext::new("main");
        let err = anyhow::Error::new(SyncError::MissingResults).context("tickets");
        ctx.record_error("tickets", &err);
        let recorded = ctx.error.unwrap();
        assert_eq!(recorded.kind, ErrorKind::MissingResults);
        assert_eq!(recorded.stage, "tickets");
        assert!(recorded.message.contains("no scan results"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONTEXT_FILE);
        let mut ctx = ExecutionContext::new("main");
        ctx.sandbox_id = Some("9".into());
        ctx.save(&path).unwrap();

        let loaded = PersistedContext::load(&path).unwrap().unwrap();
        assert_eq!(loaded.branch(), "main");
        assert_eq!(loaded.claim("main").unwrap(), ctx);
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PersistedContext::load(&dir.path().join("nope")).unwrap().is_none());
    }
}
