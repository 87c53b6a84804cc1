use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::report::IssueId;

/// The remote static-analysis service. Transport failures surface as
/// `anyhow` errors; domain outcomes such as "no build id" are `None`.
#[async_trait]
pub trait ScanService: Send + Sync {
    async fn find_sandbox(&self, app_id: &str, name: &str) -> Result<Option<String>>;

    async fn create_sandbox(&self, app_id: &str, name: &str) -> Result<Option<String>>;

    async fn create_build(
        &self,
        app_id: &str,
        sandbox_id: Option<&str>,
        scan_name: &str,
    ) -> Result<Option<String>>;

    async fn upload_file(&self, app_id: &str, sandbox_id: Option<&str>, file: &Path) -> Result<()>;

    async fn begin_prescan(&self, app_id: &str, sandbox_id: Option<&str>, auto_scan: bool) -> Result<()>;

    async fn results_ready(&self, app_id: &str, build_id: &str, sandbox_id: Option<&str>) -> Result<bool>;

    /// Newest build of the app (or sandbox) whose results are ready.
    async fn latest_build_id(&self, app_id: &str, sandbox_id: Option<&str>) -> Result<Option<String>>;

    /// The detailed report document for a build, as returned by the service.
    async fn detailed_report(&self, build_id: &str) -> Result<String>;

    async fn add_comment(&self, build_id: &str, issue_ids: &[IssueId], comment: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    /// In-memory scan service. Every call is appended to `calls` as a short
    /// line so tests can assert on ordering.
    #[derive(Default)]
    pub struct FakeScanService {
        pub sandboxes: Mutex<HashMap<String, String>>,
        pub calls: Mutex<Vec<String>>,
        pub create_sandbox_id: Option<String>,
        pub build_id: Option<String>,
        pub latest_build: Option<String>,
        /// Number of `results_ready` polls answered with `false` first.
        pub not_ready_polls: Mutex<usize>,
        pub report: String,
        pub fail_upload_of: Option<String>,
    }

    impl FakeScanService {
        pub fn new() -> Self {
            Self {
                create_sandbox_id: Some("sb-new".into()),
                build_id: Some("build-1".into()),
                ..Default::default()
            }
        }

        pub fn with_sandbox(self, name: &str, id: &str) -> Self {
            self.sandboxes.lock().unwrap().insert(name.into(), id.into());
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ScanService for FakeScanService {
        async fn find_sandbox(&self, _app_id: &str, name: &str) -> Result<Option<String>> {
            self.record(format!("find_sandbox {name}"));
            Ok(self.sandboxes.lock().unwrap().get(name).cloned())
        }

        async fn create_sandbox(&self, _app_id: &str, name: &str) -> Result<Option<String>> {
            self.record(format!("create_sandbox {name}"));
            Ok(self.create_sandbox_id.clone())
        }

        async fn create_build(
            &self,
            _app_id: &str,
            sandbox_id: Option<&str>,
            scan_name: &str,
        ) -> Result<Option<String>> {
            self.record(format!("create_build {} {scan_name}", sandbox_id.unwrap_or("-")));
            Ok(self.build_id.clone())
        }

        async fn upload_file(&self, _app_id: &str, _sandbox_id: Option<&str>, file: &Path) -> Result<()> {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.record(format!("upload {name}"));
            if self.fail_upload_of.as_deref() == Some(name.as_str()) {
                bail!("HTTP 500");
            }
            Ok(())
        }

        async fn begin_prescan(&self, _app_id: &str, _sandbox_id: Option<&str>, auto_scan: bool) -> Result<()> {
            self.record(format!("begin_prescan auto_scan={auto_scan}"));
            Ok(())
        }

        async fn results_ready(&self, _app_id: &str, build_id: &str, _sandbox_id: Option<&str>) -> Result<bool> {
            self.record(format!("results_ready {build_id}"));
            let mut remaining = self.not_ready_polls.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
            Ok(true)
        }

        async fn latest_build_id(&self, _app_id: &str, _sandbox_id: Option<&str>) -> Result<Option<String>> {
            self.record("latest_build_id".to_string());
            Ok(self.latest_build.clone())
        }

        async fn detailed_report(&self, build_id: &str) -> Result<String> {
            self.record(format!("detailed_report {build_id}"));
            Ok(self.report.clone())
        }

        async fn add_comment(&self, build_id: &str, issue_ids: &[IssueId], comment: &str) -> Result<()> {
            let ids: Vec<String> = issue_ids.iter().map(|i| i.to_string()).collect();
            self.record(format!("comment {build_id} [{}] {comment}", ids.join(",")));
            Ok(())
        }
    }
}
