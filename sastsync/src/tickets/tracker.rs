use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::config::TicketingConfig;

use super::jira::{JiraCredentials, JiraTracker};

/// An external issue tracker that flaws are mirrored into.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(
        &self,
        project: &str,
        issue_type: &str,
        summary: &str,
        description: &str,
    ) -> Result<String>;

    async fn update_issue(&self, key: &str, summary: &str, description: &str) -> Result<()>;

    /// Move the issue through the transition called `transition`.
    async fn close_issue(&self, key: &str, transition: &str) -> Result<()>;

    /// Label used in flaw annotations, e.g. `JIRA`.
    fn tracker_type(&self) -> &'static str;
}

pub fn create_tracker(config: &TicketingConfig) -> Result<Arc<dyn IssueTracker>> {
    match config.tracker.to_ascii_lowercase().as_str() {
        "jira" => Ok(Arc::new(JiraTracker::new(
            &config.base_url,
            JiraCredentials::from_env()?,
        )?)),
        other => bail!("unknown tracker: {other} (valid: jira)"),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    /// Records every call; `fail_on` makes the named operation fail.
    #[derive(Default)]
    pub struct FakeTracker {
        pub calls: Mutex<Vec<String>>,
        pub fail_on: Option<&'static str>,
        next_key: Mutex<u32>,
    }

    impl FakeTracker {
        pub fn failing(op: &'static str) -> Self {
            Self {
                fail_on: Some(op),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn check(&self, op: &str) -> Result<()> {
            if self.fail_on == Some(op) {
                bail!("tracker rejected {op}");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl IssueTracker for FakeTracker {
        async fn create_issue(
            &self,
            project: &str,
            _issue_type: &str,
            summary: &str,
            _description: &str,
        ) -> Result<String> {
            self.check("create")?;
            let mut next = self.next_key.lock().unwrap();
            *next += 1;
            let key = format!("{project}-{next}");
            self.calls.lock().unwrap().push(format!("create {key} {summary}"));
            Ok(key)
        }

        async fn update_issue(&self, key: &str, _summary: &str, _description: &str) -> Result<()> {
            self.check("update")?;
            self.calls.lock().unwrap().push(format!("update {key}"));
            Ok(())
        }

        async fn close_issue(&self, key: &str, transition: &str) -> Result<()> {
            self.check("close")?;
            self.calls.lock().unwrap().push(format!("close {key} via {transition}"));
            Ok(())
        }

        fn tracker_type(&self) -> &'static str {
            "JIRA"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::SyncFilter;

    fn ticketing(tracker: &str) -> TicketingConfig {
        TicketingConfig {
            tracker: tracker.to_string(),
            base_url: "https://example.atlassian.net".to_string(),
            project: "SEC".to_string(),
            issue_type: "Bug".to_string(),
            sync_filter: SyncFilter::All,
            close_transition: "Done".to_string(),
            extra: Default::default(),
        }
    }

    #[test]
    fn unknown_tracker_errors() {
        let err = create_tracker(&ticketing("bugzilla")).err().expect("should be an error");
        assert!(err.to_string().contains("unknown tracker"));
    }

    #[test]
    fn jira_tracker_needs_credentials() {
        // SAFETY: test-only; env var mutation is unsafe in Rust 2024
        unsafe {
            std::env::remove_var("JIRA_USER");
            std::env::remove_var("JIRA_API_TOKEN");
        }
        let err = create_tracker(&ticketing("jira")).err().expect("should be an error");
        assert!(err.to_string().contains("JIRA_USER"));
    }
}
