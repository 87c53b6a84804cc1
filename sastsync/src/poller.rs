use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument};

use crate::config::{BranchConfig, ScanType};
use crate::context::ExecutionContext;
use crate::error::SyncError;
use crate::naming::{self, NamingInputs};
use crate::report::{self, AggregatedReport, RawNode};
use crate::service::ScanService;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Waits for a build's results and turns them into an [`AggregatedReport`].
pub struct ResultsPoller {
    interval: Duration,
}

impl Default for ResultsPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ResultsPoller {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    /// Resolve the build (explicit id, then the context, then the newest
    /// completed build), wait until its results are ready and store the
    /// aggregated report in the context.
    #[instrument(skip_all, fields(branch = %ctx.branch, app_id = %config.app_id))]
    pub async fn await_results(
        &self,
        service: &dyn ScanService,
        config: &BranchConfig,
        inputs: &NamingInputs,
        explicit_build_id: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let sandbox_id = match ctx.sandbox_id.clone().or_else(|| config.sandbox_id.clone()) {
            Some(id) => Some(id),
            None => lookup_sandbox(service, config, inputs).await?,
        };
        ctx.sandbox_id = sandbox_id.clone();

        let build_id = match explicit_build_id.map(String::from).or_else(|| ctx.build_id.clone()) {
            Some(id) => id,
            None => service
                .latest_build_id(&config.app_id, sandbox_id.as_deref())
                .await
                .context("failed to list builds")?
                .ok_or_else(|| SyncError::NoCompletedBuild {
                    app_id: config.app_id.clone(),
                })?,
        };
        ctx.build_id = Some(build_id.clone());

        let deadline = Instant::now()
            .checked_add(Duration::from_secs(config.results_timeout_seconds))
            .ok_or_else(|| {
                SyncError::InvalidConfig(format!(
                    "results_timeout_seconds {} is out of range",
                    config.results_timeout_seconds
                ))
            })?;
        self.wait_until_ready(
            service,
            &config.app_id,
            &build_id,
            sandbox_id.as_deref(),
            deadline,
            config.results_timeout_seconds,
        )
        .await?;

        let report = fetch_report(service, &build_id).await?;
        info!(
            build_id = %build_id,
            flaws = report.total_flaws(),
            compliance = %report.scan.policy_compliance_status,
            "results retrieved"
        );
        if ctx.scan_name.is_none() && !report.scan.scan_name.is_empty() {
            ctx.scan_name = Some(report.scan.scan_name.clone());
        }
        ctx.results = Some(report);
        Ok(())
    }

    /// Poll until the build reports results or `deadline` passes. A deadline
    /// already in the past fails straight away.
    pub async fn wait_until_ready(
        &self,
        service: &dyn ScanService,
        app_id: &str,
        build_id: &str,
        sandbox_id: Option<&str>,
        deadline: Instant,
        timeout_seconds: u64,
    ) -> Result<()> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(SyncError::ResultsTimeout {
                    build_id: build_id.to_string(),
                    timeout_seconds,
                }
                .into());
            }
            if service
                .results_ready(app_id, build_id, sandbox_id)
                .await
                .with_context(|| format!("failed to query build {build_id}"))?
            {
                return Ok(());
            }
            debug!(build_id, "results not ready");
            sleep(self.interval.min(deadline - now)).await;
        }
    }
}

/// Only sandbox scans have a sandbox to look up; nothing is created here.
/// A sandbox scan without its sandbox is an error, never the policy line.
async fn lookup_sandbox(
    service: &dyn ScanService,
    config: &BranchConfig,
    inputs: &NamingInputs,
) -> Result<Option<String>> {
    if config.scan_type != ScanType::Sandbox {
        return Ok(None);
    }
    let name = naming::sandbox_name(config, inputs)?;
    let found = service
        .find_sandbox(&config.app_id, &name)
        .await
        .with_context(|| format!("failed to look up sandbox '{name}'"))?;
    match found {
        Some(id) => Ok(Some(id)),
        None => Err(SyncError::SandboxNotFound {
            app_id: config.app_id.clone(),
            name,
        }
        .into()),
    }
}

async fn fetch_report(service: &dyn ScanService, build_id: &str) -> Result<AggregatedReport> {
    let body = service
        .detailed_report(build_id)
        .await
        .with_context(|| format!("failed to fetch detailed report for build {build_id}"))?;
    let tree = parse_report(&body)?;
    report::aggregate(&tree).with_context(|| format!("failed to aggregate report for build {build_id}"))
}

/// A detailed report as XML, or as the equivalent JSON document.
pub fn parse_report(body: &str) -> Result<RawNode> {
    if body.trim_start().starts_with('{') {
        let doc: serde_json::Value = serde_json::from_str(body).context("invalid JSON report")?;
        RawNode::from_json_document(&doc)
    } else {
        RawNode::parse_xml(body).context("invalid XML report")
    }
}
