use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::config::BranchConfig;
use crate::context::ExecutionContext;
use crate::error::SyncError;
use crate::service::ScanService;
use crate::tickets::{self, IssueTracker, SyncOutcome, TicketAction};

use super::Stage;

/// What the ticket stage decided and, unless it was a dry run, did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TicketSyncReport {
    pub dry_run: bool,
    pub planned: Vec<TicketAction>,
    pub applied: Vec<SyncOutcome>,
}

struct TicketWriter {
    tracker: Arc<dyn IssueTracker>,
    service: Arc<dyn ScanService>,
}

/// Reconciles the context's results with the issue tracker. Without a
/// writer it only plans.
pub struct TicketSyncStage {
    config: BranchConfig,
    writer: Option<TicketWriter>,
    report: Arc<Mutex<TicketSyncReport>>,
}

impl TicketSyncStage {
    pub fn new(config: BranchConfig) -> Self {
        Self {
            config,
            writer: None,
            report: Arc::new(Mutex::new(TicketSyncReport {
                dry_run: true,
                ..Default::default()
            })),
        }
    }

    /// Apply planned actions to `tracker`, annotating flaws through `service`.
    pub fn applying(mut self, tracker: Arc<dyn IssueTracker>, service: Arc<dyn ScanService>) -> Self {
        self.writer = Some(TicketWriter { tracker, service });
        self.report = Arc::new(Mutex::new(TicketSyncReport::default()));
        self
    }

    /// Shared view of the stage's outcome, readable once the pipeline ran.
    pub fn report_handle(&self) -> Arc<Mutex<TicketSyncReport>> {
        self.report.clone()
    }
}

#[async_trait]
impl Stage for TicketSyncStage {
    #[instrument(skip(self, ctx), fields(branch = %ctx.branch))]
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let results = ctx.results.as_ref().ok_or(SyncError::MissingResults)?;
        let ticketing = self.config.ticketing.as_ref().ok_or_else(|| {
            SyncError::InvalidConfig(format!(
                "segment '{}' has no ticketing block",
                self.config.branch_pattern
            ))
        })?;

        let prefix = tickets::key_prefix(&ticketing.tracker);
        let actions = tickets::reconcile(results, ticketing.sync_filter, &prefix);
        info!(actions = actions.len(), filter = ?ticketing.sync_filter, "reconciled flaws with tracker");

        let mut report = self.report.lock().await;
        report.planned = actions.clone();

        let Some(writer) = &self.writer else {
            info!("dry run; no tickets changed");
            return Ok(());
        };
        let build_id = ctx
            .build_id
            .as_deref()
            .context("context has no build id to annotate flaws against")?;

        tickets::apply_actions(
            &actions,
            results,
            writer.tracker.as_ref(),
            writer.service.as_ref(),
            ticketing,
            build_id,
            &mut report.applied,
        )
        .await
    }

    fn name(&self) -> &'static str {
        "tickets"
    }
}
