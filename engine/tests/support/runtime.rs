use async_trait::async_trait;
use pipeline_engine::workflow::{ActivityFn, WorkflowRuntime};
use pipeline_engine::Error;
use serde_json::Value;

/// Same retry policy as `TokioWorkflowRuntime` but with no backoff delay, so tests
/// exercising retries stay fast and deterministic.
#[derive(Default)]
pub struct InstantWorkflowRuntime;

#[async_trait]
impl WorkflowRuntime for InstantWorkflowRuntime {
    async fn run_activity(&self, max_attempts: u32, activity: ActivityFn) -> Result<Value, Error> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match activity().await {
                Ok(v) => return Ok(v),
                Err(_) if attempt < max_attempts.max(1) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
