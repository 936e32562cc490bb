//! Execution core for a hosted pipeline-orchestration service.
//!
//! [`Engine`] wires together seven cooperating components: the Recipe
//! Compiler ([`dag`]), Input Validator ([`validate`]), Memory Store
//! (`pipeline_memory`), Template Renderer ([`render`]), Workflow Orchestrator
//! ([`workflow`]), Streaming Query Layer ([`stream`]), Output/Trace Assembler
//! ([`assemble`]), and Scheduler Binder ([`scheduler`]). REST/gRPC handlers, pipeline
//! CRUD, ACL, namespace resolution, and usage metrics emission are external
//! collaborators this crate never implements — only the trait boundaries it calls
//! through ([`SecretLookup`], [`registry::Connector`], [`event::EventVerifier`]).

pub mod assemble;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod metrics;
pub mod operation;
pub mod recipe;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod stream;
pub mod validate;
pub mod workflow;

use async_trait::async_trait;
use pipeline_memory::{BatchMemory, MemoryStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use crate::assemble::{assemble, generate_traces};
pub use crate::config::EngineConfig;
pub use crate::error::Error;
use crate::metrics::{Metrics, NoOpMetrics};
use crate::operation::{Metadata, Operation};
use crate::recipe::Recipe;
use crate::registry::Registry;
use crate::render::RenderContext;
use crate::scheduler::SchedulerBinder;
use crate::stream::TriggerResult;
use crate::workflow::{TokioWorkflowRuntime, TriggerMode, TriggerParams, WorkflowRuntime, WorkflowSignal};

/// Read-only secret-lookup collaborator. Secrets are loaded once at trigger start and
/// never re-read.
#[async_trait]
pub trait SecretLookup: Send + Sync {
    async fn load(&self, owner_permalink: &str) -> Result<HashMap<String, String>, Error>;
}

/// A [`SecretLookup`] that never has any secrets, for pipelines/tests that don't need
/// them.
pub struct NoSecrets;

#[async_trait]
impl SecretLookup for NoSecrets {
    async fn load(&self, _owner_permalink: &str) -> Result<HashMap<String, String>, Error> {
        Ok(HashMap::new())
    }
}

type TriggerOutcome = Result<(Vec<Value>, Option<Value>), (i32, String)>;

struct TriggerHandle {
    signal_rx: watch::Receiver<WorkflowSignal>,
    done_rx: watch::Receiver<Option<TriggerOutcome>>,
}

/// The execution core. One instance per process; the operator/connector registry and
/// scheduler are process-wide global state.
pub struct Engine {
    registry: Arc<Registry>,
    memory: Arc<MemoryStore>,
    runtime: Arc<dyn WorkflowRuntime>,
    metrics: Arc<dyn Metrics>,
    config: EngineConfig,
    scheduler: Option<Arc<SchedulerBinder>>,
    triggers: Mutex<HashMap<String, TriggerHandle>>,
}

impl Engine {
    /// Connects the Memory Store and wires a default in-process [`TokioWorkflowRuntime`].
    /// Pass `scheduler` as `None` when no durable scheduling client is configured:
    /// scheduling becomes a no-op but every other engine function remains available.
    pub async fn new(config: EngineConfig, scheduler: Option<Arc<SchedulerBinder>>) -> Result<Self, Error> {
        let memory = Arc::new(MemoryStore::connect(config.workflow_timeout).await?);
        Ok(Engine {
            registry: Arc::new(Registry::new()),
            memory,
            runtime: Arc::new(TokioWorkflowRuntime),
            metrics: Arc::new(NoOpMetrics),
            config,
            scheduler,
            triggers: Mutex::new(HashMap::new()),
        })
    }

    /// Swaps in a custom observability sink. Call before any trigger.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Swaps in a custom activity runtime (retry policy, backoff, clock). Call before
    /// any trigger.
    pub fn with_runtime(mut self, runtime: Arc<dyn WorkflowRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// The process-wide operator/connector dispatch table. Register implementations
    /// here at startup, never per trigger.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn pre_trigger(
        &self,
        recipe: &Recipe,
        batch: Vec<Value>,
        trigger_id: &str,
        owner_permalink: &str,
        secrets: &dyn SecretLookup,
    ) -> Result<(dag::Dag, usize), Error> {
        let dag = dag::compile(recipe)?;
        let normalized = validate::validate(&recipe.variable, &batch, self.config.max_batch_size)?;
        let secret_map = secrets.load(owner_permalink).await?;

        let memory_rows: Vec<BatchMemory> = normalized
            .into_iter()
            .map(|record| BatchMemory {
                variable: record.as_object().cloned().unwrap_or_default(),
                secret: secret_map.clone(),
                component: HashMap::new(),
            })
            .collect();
        let batch_size = memory_rows.len();

        self.memory.write(trigger_id, recipe, &memory_rows, owner_permalink).await?;
        Ok((dag, batch_size))
    }

    fn spawn_workflow(
        self: &Arc<Self>,
        trigger_id: String,
        recipe: Recipe,
        dag: dag::Dag,
        batch_size: usize,
        mode: TriggerMode,
        return_traces: bool,
        stream_reader_done: Option<Arc<Notify>>,
    ) -> (watch::Receiver<WorkflowSignal>, watch::Receiver<Option<TriggerOutcome>>) {
        let (signal_tx, signal_rx) = watch::channel(WorkflowSignal::Step {
            component_id: String::new(),
        });
        let (done_tx, done_rx) = watch::channel(None);
        let engine = self.clone();
        let mode_label = match mode {
            TriggerMode::Sync => "sync",
            TriggerMode::Async => "async",
            TriggerMode::Stream => "stream",
        };
        let params = TriggerParams {
            batch_size,
            memory_key: trigger_id.clone(),
            system_variables: Value::Null,
            mode,
            is_streaming: mode == TriggerMode::Stream,
        };

        tokio::spawn(async move {
            let start = std::time::Instant::now();
            let result = workflow::run(
                &params,
                &recipe,
                &dag,
                &engine.memory,
                &engine.registry,
                &engine.runtime,
                &engine.config,
                &signal_tx,
            )
            .await;

            let outcome = match result {
                Ok(timings) => match engine.memory.load(&trigger_id).await {
                    Ok(memory) => match assemble(&memory, &recipe.output, RenderContext::Caller) {
                        Ok(outputs) => {
                            let traces = if return_traces {
                                let traces = generate_traces(&recipe.component, &memory, &timings);
                                serde_json::to_value(
                                    traces
                                        .into_iter()
                                        .map(|(id, t)| {
                                            (
                                                id,
                                                serde_json::json!({
                                                    "input": t.input,
                                                    "output": t.output,
                                                    "startedAt": t.started_at,
                                                    "endedAt": t.ended_at,
                                                }),
                                            )
                                        })
                                        .collect::<HashMap<_, _>>(),
                                )
                                .ok()
                            } else {
                                None
                            };
                            engine.metrics.record_trigger(&trigger_id, mode_label, true, start.elapsed());
                            Ok((outputs, traces))
                        }
                        Err(e) => {
                            engine.metrics.record_trigger(&trigger_id, mode_label, false, start.elapsed());
                            Err((e.status_code(), e.to_string()))
                        }
                    },
                    Err(e) => Err((Error::from(e).status_code(), "memory unavailable after completion".to_string())),
                },
                Err(e) => {
                    engine.metrics.record_trigger(&trigger_id, mode_label, false, start.elapsed());
                    let _ = signal_tx.send(WorkflowSignal::Failed { message: e.to_string() });
                    Err((e.status_code(), e.to_string()))
                }
            };

            let _ = done_tx.send(Some(outcome));
            if let Some(reader_done) = stream_reader_done {
                reader_done.notified().await;
            }
            if let Err(e) = engine.memory.purge(&trigger_id).await {
                warn!(trigger_id, error = %e, "memory purge failed");
            }
        });

        (signal_rx, done_rx)
    }

    /// `TriggerNamespacePipelineByID(ns, id, batch[], triggerId, returnTraces)`.
    pub async fn trigger_by_id(
        self: &Arc<Self>,
        recipe: Recipe,
        batch: Vec<Value>,
        trigger_id: String,
        owner_permalink: &str,
        secrets: &dyn SecretLookup,
        return_traces: bool,
    ) -> Result<(Vec<Value>, Metadata), Error> {
        let (dag, batch_size) = self
            .pre_trigger(&recipe, batch, &trigger_id, owner_permalink, secrets)
            .await?;

        let (_signal_rx, mut done_rx) = self.spawn_workflow(
            trigger_id.clone(),
            recipe,
            dag,
            batch_size,
            TriggerMode::Sync,
            return_traces,
            None,
        );
        loop {
            if done_rx.changed().await.is_err() {
                return Err(Error::TriggerFail("trigger task dropped before completion".to_string()));
            }
            if let Some(outcome) = done_rx.borrow().clone() {
                return match outcome {
                    Ok((outputs, traces)) => Ok((outputs, Metadata { traces })),
                    Err((_, message)) => Err(Error::TriggerFail(message)),
                };
            }
        }
    }

    /// `TriggerAsyncNamespacePipelineByID(…)`.
    pub async fn trigger_async_by_id(
        self: &Arc<Self>,
        recipe: Recipe,
        batch: Vec<Value>,
        trigger_id: String,
        owner_permalink: &str,
        secrets: &dyn SecretLookup,
        return_traces: bool,
    ) -> Result<Operation, Error> {
        let (dag, batch_size) = self
            .pre_trigger(&recipe, batch, &trigger_id, owner_permalink, secrets)
            .await?;
        let (signal_rx, done_rx) = self.spawn_workflow(
            trigger_id.clone(),
            recipe,
            dag,
            batch_size,
            TriggerMode::Async,
            return_traces,
            None,
        );
        self.triggers
            .lock()
            .expect("trigger registry lock poisoned")
            .insert(trigger_id.clone(), TriggerHandle { signal_rx, done_rx });
        Ok(Operation::running(&trigger_id))
    }

    /// `TriggerNamespacePipelineByIDWithStream(…, sink)`. Returns once the
    /// workflow and its reader task are both launched; `sink` receives [`TriggerResult`]s.
    pub async fn trigger_by_id_with_stream(
        self: &Arc<Self>,
        recipe: Recipe,
        batch: Vec<Value>,
        trigger_id: String,
        owner_permalink: &str,
        secrets: &dyn SecretLookup,
        sink: flume::Sender<TriggerResult>,
    ) -> Result<(), Error> {
        let (dag, batch_size) = self
            .pre_trigger(&recipe, batch, &trigger_id, owner_permalink, secrets)
            .await?;
        let outputs = recipe.output.clone();
        let reader_done = Arc::new(Notify::new());
        let (signal_rx, _done_rx) = self.spawn_workflow(
            trigger_id.clone(),
            recipe,
            dag,
            batch_size,
            TriggerMode::Stream,
            false,
            Some(reader_done.clone()),
        );

        let memory = self.memory.clone();
        let poll_interval = self.config.stream_poll_interval;
        let poll_timeout = self.config.stream_poll_timeout;
        tokio::spawn(stream::run(
            trigger_id,
            outputs,
            memory,
            signal_rx,
            sink,
            poll_interval,
            poll_timeout,
            reader_done,
        ));
        Ok(())
    }

    /// `TriggerNamespacePipelineReleaseByID(…)`: same as
    /// [`Self::trigger_by_id`] against a pinned release recipe. `release_uid` is
    /// carried only for the caller's own bookkeeping — the engine treats a release
    /// recipe identically to a live one.
    pub async fn trigger_release_by_id(
        self: &Arc<Self>,
        recipe: Recipe,
        release_uid: &str,
        batch: Vec<Value>,
        trigger_id: String,
        owner_permalink: &str,
        secrets: &dyn SecretLookup,
        return_traces: bool,
    ) -> Result<(Vec<Value>, Metadata), Error> {
        info!(trigger_id, release_uid, "triggering pinned release");
        self.trigger_by_id(recipe, batch, trigger_id, owner_permalink, secrets, return_traces)
            .await
    }

    /// `GetOperation(triggerId)`. Reconstructed from the cached outcome
    /// recorded when the background trigger task completed — Memory itself may
    /// already be purged by the time this is called.
    pub fn get_operation(&self, trigger_id: &str) -> Result<Operation, Error> {
        let triggers = self.triggers.lock().expect("trigger registry lock poisoned");
        let handle = triggers
            .get(trigger_id)
            .ok_or_else(|| Error::NotFound(trigger_id.to_string()))?;

        match handle.done_rx.borrow().clone() {
            None => Ok(Operation::running(trigger_id)),
            Some(Ok((outputs, traces))) => Ok(Operation::completed(trigger_id, outputs, traces)),
            Some(Err((code, message))) => Ok(Operation::failed(trigger_id, code, message)),
        }
    }

    /// `HandleNamespacePipelineEventByID(ns, id, eventId, payload, triggerId)`. Returns
    /// the extracted batch for the caller to pass into
    /// [`Self::trigger_async_by_id`], or the handshake echo.
    pub fn handle_event(
        &self,
        recipe: &Recipe,
        verifier: &dyn event::EventVerifier,
        payload: &Value,
    ) -> Result<event::EventOutcome, Error> {
        event::handle_event(&recipe.variable, verifier, payload)
    }

    /// Reconciles a pipeline's cron schedules. A no-op if no scheduler
    /// client is configured.
    pub async fn reconcile_schedule(
        &self,
        pipeline_uid: &str,
        cron: &[String],
        action: scheduler::ScheduleAction,
    ) -> Result<(), Error> {
