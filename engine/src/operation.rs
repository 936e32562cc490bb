//! Long-running-operation handle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata returned alongside rendered outputs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub traces: Option<Value>,
}

/// Either side of an `Operation.result`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationResult {
    Outputs { outputs: Vec<Value>, metadata: Metadata },
    Error { code: i32, message: String },
}

/// `{ name: "operations/<triggerId>", done: bool, result: Outputs+Metadata | Error }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    pub result: Option<OperationResult>,
}

impl Operation {
    pub fn name_for(trigger_id: &str) -> String {
        format!("operations/{trigger_id}")
    }

    pub fn running(trigger_id: &str) -> Self {
        Operation {
            name: Self::name_for(trigger_id),
            done: false,
            result: None,
        }
    }

    pub fn completed(trigger_id: &str, outputs: Vec<Value>, traces: Option<Value>) -> Self {
        Operation {
            name: Self::name_for(trigger_id),
            done: true,
            result: Some(OperationResult::Outputs {
                outputs,
                metadata: Metadata { traces },
            }),
        }
    }

    pub fn failed(trigger_id: &str, code: i32, message: String) -> Self {
        Operation {
            name: Self::name_for(trigger_id),
            done: true,
            result: Some(OperationResult::Error { code, message }),
        }
    }
}
