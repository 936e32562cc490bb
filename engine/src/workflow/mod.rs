//! Workflow Orchestrator.
//!
//! The orchestrator is the workflow *definition*: `run(..)` below is
//! `TriggerPipelineWorkflow(param)`. It runs under a [`WorkflowRuntime`], an
//! abstraction over whatever durable execution substrate the host process provides —
//! named after the vocabulary of `examples/other_examples/…durable-src-lib.rs.rs`
//! (`Workflow`, `ActivityOptions`, `WorkflowSignal`) but narrowed to the one thing this
//! engine needs from it: retrying a component activity per a configured policy. The
//! shipped [`TokioWorkflowRuntime`] is the in-process stand-in; a production deployment
//! would swap in a client for an actual durable-execution service without touching the
//! algorithm below.
//!
//! Per-component dispatch concurrency — individual connector calls for a batch of
//! records may be dispatched concurrently when the connector supports batch semantics —
//! is implemented with a `tokio::task::JoinSet`, the same primitive
//! `fiddler::runtime::Runtime` uses for its worker fan-out.

use async_trait::async_trait;
use futures::future::BoxFuture;
use jmespath::Variable as JmespathVariable;
use pipeline_memory::{BatchMemory, ComponentPatch, ComponentStatus, MemoryStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assemble::ComponentTiming;
use crate::config::EngineConfig;
use crate::dag::Dag;
use crate::error::Error;
use crate::recipe::{Component, Recipe};
use crate::registry::{Registered, Registry};
use crate::render::{render_input, RenderContext};

/// One of the signals the query handler (`workflowStatusQuery`) can report.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowSignal {
    /// A component finished (completed, skipped, or errored) — carries its id.
    Step { component_id: String },
    /// The whole DAG finished.
    Completed,
    /// The workflow run failed terminally.
    Failed { message: String },
}

/// `TriggerPipelineWorkflow`'s parameter.
#[derive(Clone, Debug)]
pub struct TriggerParams {
    pub batch_size: usize,
    pub memory_key: String,
    pub system_variables: Value,
    pub mode: TriggerMode,
    pub is_streaming: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    Sync,
    Async,
    Stream,
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A single activity invocation, boxed so [`WorkflowRuntime`] stays object-safe (no
/// generics on the trait method — the same boxed-future trick `registry::RegisteredFn`
/// uses for its registration functions).
pub type ActivityFn = Box<dyn Fn() -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

/// Durable-execution abstraction: retries one activity body per `max_attempts`.
#[async_trait]
pub trait WorkflowRuntime: Send + Sync {
    async fn run_activity(&self, max_attempts: u32, activity: ActivityFn) -> Result<Value, Error>;
}

/// In-process stand-in: retries with a short linear backoff, entirely within the
/// current tokio runtime. No replay/durability guarantee — a real deployment backs
/// this trait with an actual durable-execution client.
#[derive(Default)]
pub struct TokioWorkflowRuntime;

#[async_trait]
impl WorkflowRuntime for TokioWorkflowRuntime {
    async fn run_activity(&self, max_attempts: u32, activity: ActivityFn) -> Result<Value, Error> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match activity().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max_attempts.max(1) => {
                    warn!(attempt, error = %e, "activity failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn condition_context(row: &BatchMemory) -> Value {
    let component = row
        .component
        .iter()
        .map(|(id, record)| {
            (
                id.clone(),
                json!({
                    "input": record.input,
                    "output": record.output,
                    "status": {
                        "started": record.status.started,
                        "completed": record.status.completed,
                        "skipped": record.status.skipped,
                        "errored": record.status.errored,
                    },
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>();
    json!({
        "variable": row.variable,
        "secret": row.secret,
        "component": component,
    })
}

/// Evaluates a component's optional boolean `condition` against one batch index,
/// grounded on `fiddler`'s switch processor (`modules/processors/switch/check.rs`),
/// which also uses `jmespath` to turn a JSON context into a boolean.
fn evaluate_condition(expr: &str, row: &BatchMemory) -> Result<bool, Error> {
    let compiled =
        jmespath::compile(expr).map_err(|e| Error::InvalidRecipe(format!("invalid condition {expr:?}: {e}")))?;
    let context_json = serde_json::to_string(&condition_context(row))?;
    let context: Rc<JmespathVariable> = JmespathVariable::from_json(&context_json)
        .map_err(|e| Error::TriggerFail(format!("invalid condition context: {e}")))?;
    let result = compiled
        .search(context)
        .map_err(|e| Error::TriggerFail(format!("condition evaluation failed: {e}")))?;
    Ok(result.as_boolean().unwrap_or(false))
}

fn status(started: bool, completed: bool, skipped: bool, errored: bool, error: Option<String>) -> ComponentStatus {
    ComponentStatus {
        started,
        completed,
        skipped,
        errored,
        error,
    }
}

async fn upstream_failed(dag: &Dag, component_id: &str, row: &BatchMemory) -> bool {
    dag.edges
        .iter()
        .filter(|(_, to)| to == component_id)
        .any(|(from, _)| row.component.get(from).map(|r| r.status.errored).unwrap_or(false))
}

fn build_activity(registry: Arc<Registry>, definition_name: String, input: Value) -> ActivityFn {
    Box::new(move || {
        let registry = registry.clone();
        let definition_name = definition_name.clone();
        let input = input.clone();
        Box::pin(async move {
            match registry.lookup(&definition_name)? {
                Registered::Operator(op) => op.execute(input).await,
                Registered::Connector(conn) => {
                    let outputs = conn.execute(vec![input], None).await?;
                    outputs
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::TriggerFail("connector returned no output".to_string()))
                }
            }
        })
    })
}

struct ActiveIndex {
    index: usize,
    rendered: Value,
}

/// Runs one component's activity across every active batch index, dispatching
/// concurrently via a `JoinSet`. Connectors that declare batch support get a single
/// round trip instead.
async fn execute_component(
    component: &Component,
    active: Vec<ActiveIndex>,
    registry: &Arc<Registry>,
    runtime: &Arc<dyn WorkflowRuntime>,
    max_attempts: u32,
) -> Vec<(usize, Result<Value, Error>)> {
    if active.is_empty() {
        return Vec::new();
    }

    let batched_connector = match registry.lookup(&component.definition_name) {
        Ok(Registered::Connector(conn)) if conn.supports_batch() && active.len() > 1 => Some(conn),
        _ => None,
    };

    if let Some(conn) = batched_connector {
        let indices: Vec<usize> = active.iter().map(|a| a.index).collect();
        let inputs: Vec<Value> = active.into_iter().map(|a| a.rendered).collect();
        let runtime = runtime.clone();
        let activity: ActivityFn = Box::new(move || {
            let conn = conn.clone();
            let inputs = inputs.clone();
            Box::pin(async move { conn.execute(inputs, None).await.map(Value::Array) })
        });
        return match runtime.run_activity(max_attempts, activity).await {
            Ok(Value::Array(outputs)) => indices.into_iter().zip(outputs.into_iter().map(Ok)).collect(),
            Ok(other) => indices.into_iter().map(|i| (i, Ok(other.clone()))).collect(),
            Err(e) => indices.into_iter().map(|i| (i, Err(Error::TriggerFail(e.to_string())))).collect(),
        };
    }

    let mut set = tokio::task::JoinSet::new();
    for ActiveIndex { index, rendered } in active {
        let registry = registry.clone();
        let runtime = runtime.clone();
        let definition_name = component.definition_name.clone();
        set.spawn(async move {
            let activity = build_activity(registry, definition_name, rendered);
            let result = runtime.run_activity(max_attempts, activity).await;
            (index, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(pair) => results.push(pair),
            Err(e) => warn!(error = %e, "activity task panicked"),
        }
    }
    results.sort_by_key(|(i, _)| *i);
    results
}

/// `TriggerPipelineWorkflow(param)`. Drives the DAG to completion, emitting
/// a `Step` signal after every component and `Completed` once the DAG is exhausted.
/// Returns once the DAG is done; callers needing sync/async/stream semantics wrap this.
pub async fn run(
    params: &TriggerParams,
    recipe: &Recipe,
    dag: &Dag,
    memory_store: &MemoryStore,
    registry: &Arc<Registry>,
    runtime: &Arc<dyn WorkflowRuntime>,
    config: &EngineConfig,
    signal_tx: &watch::Sender<WorkflowSignal>,
) -> Result<HashMap<String, ComponentTiming>, Error> {
    let trigger_id = params.memory_key.as_str();
    info!(trigger_id, mode = ?params.mode, batch_size = params.batch_size, "trigger started");
    let mut timings = HashMap::new();

    for component_id in &dag.order {
        let component = recipe
            .component(component_id)
            .ok_or_else(|| Error::InvalidRecipe(format!("dag references unknown component {component_id}")))?;

        let memory = memory_store.load(trigger_id).await?;
        let mut active = Vec::new();

        for (i, row) in memory.iter().enumerate() {
            if upstream_failed(dag, component_id, row).await && !component.best_effort() {
                memory_store
                    .update_component(
                        trigger_id,
                        i,
                        component_id,
                        ComponentPatch {
                            status: Some(status(false, false, false, true, Some("upstream-failed".to_string()))),
                            ..Default::default()
                        },
                    )
                    .await?;
                continue;
            }

            let is_active = match &component.condition {
                Some(expr) => evaluate_condition(expr, row)?,
                None => true,
            };
            if !is_active {
                memory_store
                    .update_component(
                        trigger_id,
                        i,
                        component_id,
                        ComponentPatch {
                            status: Some(status(false, false, true, false, None)),
                            ..Default::default()
                        },
                    )
                    .await?;
                continue;
            }

            let rendered = render_input(&component.configuration, row, RenderContext::Admin)?;
            memory_store
                .update_component(
                    trigger_id,
                    i,
                    component_id,
                    ComponentPatch {
                        input: Some(rendered.clone()),
                        status: Some(status(true, false, false, false, None)),
                        ..Default::default()
                    },
                )
                .await?;
            active.push(ActiveIndex { index: i, rendered });
        }

        let started_at = Some(now_millis());
        debug!(trigger_id, component_id, batch_active = active.len(), "dispatching activity");
        let results = execute_component(component, active, registry, runtime, config.activity_max_attempts).await;

        for (i, result) in results {
            match result {
                Ok(output) => {
                    memory_store
                        .update_component(
                            trigger_id,
                            i,
                            component_id,
                            ComponentPatch {
                                output: Some(output),
                                status: Some(status(true, true, false, false, None)),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                Err(e) => {
                    memory_store
                        .update_component(
                            trigger_id,
                            i,
                            component_id,
                            ComponentPatch {
                                status: Some(status(true, false, false, true, Some(e.to_string()))),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }
        }

        timings.insert(
            component_id.clone(),
            ComponentTiming {
                started_at,
                ended_at: Some(now_millis()),
            },
        );

        let _ = signal_tx.send(WorkflowSignal::Step {
            component_id: component_id.clone(),
        });
    }

    let _ = signal_tx.send(WorkflowSignal::Completed);
    info!(trigger_id, "trigger finished");
    Ok(timings)
}
