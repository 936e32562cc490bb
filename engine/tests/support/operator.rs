use async_trait::async_trait;
use pipeline_engine::registry::Operator;
use pipeline_engine::Error;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};

/// Passes its rendered configuration straight through, mirroring `echo` in the
/// original_source test corpus.
pub struct EchoOperator;

#[async_trait]
impl Operator for EchoOperator {
    async fn execute(&self, rendered_config: Value) -> Result<Value, Error> {
        Ok(rendered_config)
    }

    fn describe(&self) -> &str {
        "echo"
    }
}

/// Fails the first `fail_count` calls, then succeeds — exercises the Workflow
/// Orchestrator's activity retry policy.
pub struct FlakyOperator {
    fail_count: u32,
    attempts: AtomicU32,
}

impl FlakyOperator {
    pub fn new(fail_count: u32) -> Self {
        FlakyOperator {
            fail_count,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operator for FlakyOperator {
    async fn execute(&self, rendered_config: Value) -> Result<Value, Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_count {
            return Err(Error::TriggerFail(format!("flaky failure on attempt {attempt}")));
        }
        Ok(rendered_config)
    }

    fn describe(&self) -> &str {
        "flaky"
    }
}
