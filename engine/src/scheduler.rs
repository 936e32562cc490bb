//! Scheduler Binder.
//!
//! Translates a recipe's cron schedules into durable scheduled workflow triggers via
//! `tokio_cron_scheduler` (grounded on
//! `examples/other_examples/…apitap__src-cmd-mod.rs.rs`'s `Job`/`JobScheduler` usage).
//! Schedule identity is a function of pipeline UID: binding always deletes any
//! existing jobs for that UID before creating new ones, so repeated updates are
//! idempotent.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Error;

/// Action fired when a schedule triggers: `SchedulePipelineWorkflow(namespace,
/// pipelineId)`. Runs with maximum-attempts = 1 (fire-and-forget) — enforced by the
/// caller configuring the async trigger's retry policy, not by this binder.
pub type ScheduleAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Binds recipe cron declarations to durable scheduled triggers. A `None` instance
/// (see [`crate::Engine`]) means scheduling is a no-op; every other engine function
/// remains available.
pub struct SchedulerBinder {
    scheduler: JobScheduler,
    bindings: Mutex<HashMap<String, Vec<Uuid>>>,
}

impl SchedulerBinder {
    pub async fn new() -> Result<Self, Error> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::TriggerFail(format!("unable to start scheduler: {e}")))?;
        scheduler
            .start()
            .await
            .map_err(|e| Error::TriggerFail(format!("unable to start scheduler: {e}")))?;
        Ok(SchedulerBinder {
            scheduler,
            bindings: Mutex::new(HashMap::new()),
        })
    }

    /// Deletes any existing schedule for `pipeline_uid`, then creates one job per cron
    /// expression in `cron`. An empty `cron` list leaves the pipeline unscheduled.
    pub async fn bind(&self, pipeline_uid: &str, cron: &[String], action: ScheduleAction) -> Result<(), Error> {
        self.unbind(pipeline_uid).await?;

        let mut ids = Vec::with_capacity(cron.len());
        for expr in cron {
            let action = action.clone();
            let job = Job::new_async(expr.as_str(), move |_uuid, _scheduler| {
                let action = action.clone();
                Box::pin(async move { action().await })
            })
            .map_err(|e| Error::InvalidRecipe(format!("invalid cron expression {expr:?}: {e}")))?;
            let id = self
                .scheduler
                .add(job)
                .await
                .map_err(|e| Error::TriggerFail(format!("unable to register schedule: {e}")))?;
            ids.push(id);
        }

        info!(pipeline_uid, jobs = ids.len(), "schedule bound");
        self.bindings
            .lock()
            .expect("scheduler bindings lock poisoned")
            .insert(pipeline_uid.to_string(), ids);
        Ok(())
    }

    /// Removes every job registered for `pipeline_uid`. Idempotent.
    pub async fn unbind(&self, pipeline_uid: &str) -> Result<(), Error> {
        let ids = self
            .bindings
            .lock()
            .expect("scheduler bindings lock poisoned")
            .remove(pipeline_uid);
        let Some(ids) = ids else { return Ok(()) };
        for id in ids {
            if let Err(e) = self.scheduler.remove(&id).await {
                warn!(pipeline_uid, error = %e, "failed to remove stale schedule job");
            }
        }
        Ok(())
    }
}
