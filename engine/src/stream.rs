//! Streaming Query Layer.
//!
//! While a workflow with `isStreaming = true` runs, a single reader task polls
//! `workflowStatusQuery` (here, a `tokio::sync::watch::Receiver<WorkflowSignal>`) at a
//! fixed interval and emits [`TriggerResult`]s on a caller-supplied `flume::Sender`. One
//! reader task per trigger, never more — that keeps polling cheap and ordering simple.

use pipeline_memory::MemoryStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{error, warn};

use crate::assemble::assemble_stream;
use crate::error::Error;
use crate::recipe::Output;
use crate::render::RenderContext;
use crate::workflow::WorkflowSignal;

/// One increment of streamed progress (`TriggerNamespacePipelineByIDWithStream`).
#[derive(Clone, Debug)]
pub struct TriggerResult {
    pub outputs: Vec<Value>,
    pub component_id: Option<String>,
    pub error: Option<String>,
}

/// Polls `signal_rx` for step/completion signals and emits partial or final results on
/// `sink` until the workflow completes, the poll ceiling elapses, or the channel
/// errors. A query-call error terminates the stream, logging the latest known state
/// rather than propagating. `done` is notified once this reader has taken its last
/// Memory read, so the workflow task purging Memory can wait for it instead of racing it.
pub async fn run(
    trigger_id: String,
    outputs: Vec<Output>,
    memory_store: std::sync::Arc<MemoryStore>,
    mut signal_rx: watch::Receiver<WorkflowSignal>,
    sink: flume::Sender<TriggerResult>,
    poll_interval: Duration,
    poll_timeout: Duration,
    done: Arc<Notify>,
) {
    let deadline = Instant::now() + poll_timeout;
    let mut last_seen = WorkflowSignal::Step {
        component_id: String::new(),
    };

    loop {
        if Instant::now() >= deadline {
            warn!(trigger_id, "streaming poll ceiling reached, closing stream");
            break;
        }

        tokio::select! {
            changed = signal_rx.changed() => {
                if changed.is_err() {
                    error!(trigger_id, "workflow signal channel closed unexpectedly");
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {
                continue;
            }
        }

        let current = signal_rx.borrow().clone();
        if current == last_seen {
            continue;
        }
        last_seen = current.clone();

        match current {
            WorkflowSignal::Step { component_id } => {
                let memory = match memory_store.load(&trigger_id).await {
                    Ok(m) => m,
                    Err(e) => {
                        error!(trigger_id, error = %e, "streaming poll: memory load failed");
                        continue;
                    }
                };
                let partial = assemble_stream(&memory, &outputs, &component_id, RenderContext::Caller);
                let _ = sink.send(TriggerResult {
                    outputs: partial,
                    component_id: Some(component_id),
                    error: None,
                });
            }
            WorkflowSignal::Completed => {
                match memory_store.load(&trigger_id).await {
                    Ok(memory) => {
                        let outputs = crate::assemble::assemble(&memory, &outputs, RenderContext::Caller)
                            .unwrap_or_default();
                        let _ = sink.send(TriggerResult {
                            outputs,
                            component_id: None,
                            error: None,
                        });
                    }
                    Err(e) => {
                        error!(trigger_id, error = %e, "streaming poll: final memory load failed");
                    }
                }
                break;
            }
            WorkflowSignal::Failed { message } => {
                let _ = sink.send(TriggerResult {
                    outputs: Vec::new(),
                    component_id: None,
                    error: Some(message),
                });
                break;
            }
        }
    }

    done.notify_one();
}

impl From<Error> for TriggerResult {
    fn from(e: Error) -> Self {
        TriggerResult {
            outputs: Vec::new(),
            component_id: None,
            error: Some(e.to_string()),
        }
    }
}
