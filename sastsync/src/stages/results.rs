use async_trait::async_trait;
use tracing::instrument;

use crate::context::ExecutionContext;
use crate::error::ErrorKind;
use crate::poller::ResultsPoller;

use super::{ScanTarget, Stage};

pub struct ResultsStage {
    target: ScanTarget,
    poller: ResultsPoller,
    build_id: Option<String>,
}

impl ResultsStage {
    pub fn new(target: ScanTarget) -> Self {
        Self {
            target,
            poller: ResultsPoller::default(),
            build_id: None,
        }
    }

    /// Wait for this build rather than the one carried in the context.
    pub fn with_build_id(mut self, build_id: Option<String>) -> Self {
        self.build_id = build_id;
        self
    }

    pub fn with_poller(mut self, poller: ResultsPoller) -> Self {
        self.poller = poller;
        self
    }
}

#[async_trait]
impl Stage for ResultsStage {
    #[instrument(skip(self, ctx), fields(branch = %ctx.branch))]
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let t = &self.target;
        self.poller
            .await_results(
                t.service.as_ref(),
                &t.config,
                &t.inputs,
                self.build_id.as_deref(),
                ctx,
            )
            .await
    }

    fn name(&self) -> &'static str {
        "results"
    }

    fn resumes(&self, kind: ErrorKind) -> bool {
        kind.is_retryable()
    }
}
