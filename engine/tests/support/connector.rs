use async_trait::async_trait;
use pipeline_engine::registry::Connector;
use pipeline_engine::Error;
use serde_json::Value;

/// Uppercases a `text` field in every input, one call covering the whole batch —
/// exercises the remote-connector (batch) dispatch path in `execute_component`.
pub struct UppercaseConnector;

#[async_trait]
impl Connector for UppercaseConnector {
    async fn execute(&self, inputs: Vec<Value>, _task: Option<&str>) -> Result<Vec<Value>, Error> {
        inputs
            .into_iter()
            .map(|input| {
                let text = input
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Validation("missing text field".to_string()))?;
                Ok(Value::String(text.to_uppercase()))
            })
            .collect()
    }
}
