use tracing::{info, warn};

use crate::context::ExecutionContext;
use crate::stage::Stage;

/// Runs stages in order against one context, stopping at the first failure.
/// Failures are recorded in the context, never returned.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: vec![] }
    }

    pub async fn run(&self, ctx: &mut ExecutionContext) {
        if let Some(prior) = &ctx.error {
            let resumable = self
                .stages
                .first()
                .is_some_and(|first| first.resumes(prior.kind));
            if !resumable {
                warn!(
                    stage = %prior.stage,
                    kind = %prior.kind,
                    error = %prior.message,
                    "context carries an earlier failure; not running"
                );
                return;
            }
            info!(stage = %prior.stage, kind = %prior.kind, "resuming after earlier failure");
            ctx.error = None;
        }

        for stage in &self.stages {
            info!(stage = stage.name(), branch = %ctx.branch, "running stage");
            if let Err(e) = stage.run(ctx).await {
                warn!(stage = stage.name(), branch = %ctx.branch, error = %format!("{e:#}"), "stage failed");
                ctx.record_error(stage.name(), &e);
                return;
            }
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::{ErrorKind, SyncError};
    use async_trait::async_trait;

    struct CountingStage {
        name: &'static str,
        runs: Arc<AtomicUsize>,
        fail_with: Option<fn() -> SyncError>,
        resumes: Option<ErrorKind>,
    }

    impl CountingStage {
        fn ok(name: &'static str, runs: &Arc<AtomicUsize>) -> Self {
            Self {
                name,
                runs: runs.clone(),
                fail_with: None,
                resumes: None,
            }
        }
    }

    #[async_trait]
    impl Stage for CountingStage {
        async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ctx.extra.insert(self.name.to_string(), serde_json::Value::Bool(true));
            match self.fail_with {
                Some(make) => Err(make().into()),
                None => Ok(()),
            }
        }
        fn name(&self) -> &str {
            self.name
        }
        fn resumes(&self, kind: ErrorKind) -> bool {
            self.resumes == Some(kind)
        }
    }

    fn timeout() -> SyncError {
        SyncError::ResultsTimeout {
            build_id: "1".into(),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn builder_stage_count() {
        let runs = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::builder()
            .stage(CountingStage::ok("a", &runs))
            .stage(CountingStage::ok("b", &runs))
            .build();
        assert_eq!(pipeline.stage_count(), 2);
    }

    #[tokio::test]
    async fn runs_stages_in_order() {
        let runs = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::builder()
            .stage(CountingStage::ok("first", &runs))
            .stage(CountingStage::ok("second", &runs))
            .build();
        let names: Vec<&str> = pipeline.stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["first", "second"]);

        let mut ctx = ExecutionContext::new("main");
        pipeline.run(&mut ctx).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!ctx.has_error());
    }

    #[tokio::test]
    async fn stops_and_records_first_failure() {
        let runs = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::builder()
            .stage(CountingStage {
                fail_with: Some(|| SyncError::NothingToUpload),
                ..CountingStage::ok("start", &runs)
            })
            .stage(CountingStage::ok("results", &runs))
            .build();

        let mut ctx = ExecutionContext::new("main");
        pipeline.run(&mut ctx).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let error = ctx.error.unwrap();
        assert_eq!(error.stage, "start");
        assert_eq!(error.kind, ErrorKind::NothingToUpload);
    }

    #[tokio::test]
    async fn earlier_failure_blocks_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::builder()
            .stage(CountingStage::ok("tickets", &runs))
            .build();

        let mut ctx = ExecutionContext::new("main");
        ctx.record_error("results", &timeout().into());
        pipeline.run(&mut ctx).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.error.unwrap().stage, "results");
    }

    #[tokio::test]
    async fn resumable_failure_is_cleared_and_rerun() {
        let runs = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::builder()
            .stage(CountingStage {
                resumes: Some(ErrorKind::ResultsTimeout),
                ..CountingStage::ok("results", &runs)
            })
            .build();

        let mut ctx = ExecutionContext::new("main");
        ctx.record_error("results", &timeout().into());
        pipeline.run(&mut ctx).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!ctx.has_error());
    }

    #[tokio::test]
    async fn empty_pipeline_leaves_context_alone() {
        let pipeline = Pipeline::builder().build();
        let mut ctx = ExecutionContext::new("main");
        pipeline.run(&mut ctx).await;
        assert_eq!(ctx, ExecutionContext::new("main"));
    }
}
