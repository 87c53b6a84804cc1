use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::ErrorKind;

#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()>;
    fn name(&self) -> &str;

    /// Whether this stage can pick up a context that failed with `kind`.
    fn resumes(&self, _kind: ErrorKind) -> bool {
        false
    }
}
