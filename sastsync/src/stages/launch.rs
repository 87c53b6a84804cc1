use async_trait::async_trait;
use tracing::instrument;

use crate::context::ExecutionContext;
use crate::launcher;

use super::{ScanTarget, Stage};

pub struct LaunchStage {
    target: ScanTarget,
}

impl LaunchStage {
    pub fn new(target: ScanTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Stage for LaunchStage {
    #[instrument(skip(self, ctx), fields(branch = %ctx.branch))]
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let t = &self.target;
        launcher::start(t.service.as_ref(), &t.config, &t.inputs, &t.work_dir, ctx).await
    }

    fn name(&self) -> &'static str {
        "start"
    }
}
