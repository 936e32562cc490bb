//! Per-trigger Memory Store.
//!
//! Reworked from an embedded pub/sub event bus into a namespaced, TTL-expiring
//! key/value cache: the concrete stand-in for the "external cache" collaborator a
//! hosted pipeline engine would otherwise point at Redis or similar. Built on the
//! same embedded SurrealDB engine, trading topic subscriptions for row TTL.
//!
//! Key layout (mirrors what a real external cache would see on the wire):
//! ```text
//! <trigger_id>                     -> sentinel
//! <trigger_id>:recipe              -> serialized recipe
//! <trigger_id>:owner               -> owner permalink
//! <trigger_id>:variable:<i>        -> variable memory for batch i
//! <trigger_id>:secret:<i>          -> secret memory for batch i
//! <trigger_id>:component:<id>:<i>  -> {input, output, status}
//! ```
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;
use thiserror::Error;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

/// Errors raised by the Memory Store.
#[derive(Debug, Error)]
pub enum Error {
    /// The embedded cache engine failed to initialize.
    #[error("unable to initialize memory store")]
    UnableToInitialize,
    /// No memory is present under the given trigger id (purged, expired, or never written).
    #[error("trigger not found: {0}")]
    TriggerNotFound(String),
    /// A component record is missing for the given batch index.
    #[error("component not found: {0} (batch index {1})")]
    ComponentNotFound(String, usize),
    /// The embedded cache engine returned an unexpected error.
    #[error("internal lookup error: {0}")]
    InternalLookupError(String),
    /// A stored value failed to (de)serialize into the requested shape.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-component execution status, as persisted under `component.<id>.status`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentStatus {
    pub started: bool,
    pub completed: bool,
    pub skipped: bool,
    pub errored: bool,
    pub error: Option<String>,
}

/// A single component's input, output, and status for one batch index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub input: Value,
    pub output: Value,
    pub status: ComponentStatus,
}

/// Per-batch-index memory: variables, secrets, and component results.
///
/// The full per-trigger memory is `Vec<BatchMemory>`, one entry per record in the
/// triggering batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchMemory {
    pub variable: serde_json::Map<String, Value>,
    pub secret: HashMap<String, String>,
    pub component: HashMap<String, ComponentRecord>,
}

/// A patch applied to a single component's record by the activity that owns it.
///
/// Each field is independently optional so an activity can, e.g., mark a component
/// `skipped` without touching `input`/`output`.
#[derive(Clone, Debug, Default)]
pub struct ComponentPatch {
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub status: Option<ComponentStatus>,
}

#[derive(Serialize, Deserialize)]
struct Sentinel {
    created_at: i64,
}

#[derive(Serialize, Deserialize)]
struct Recipe {
    payload: Value,
    created_at: i64,
}

#[derive(Serialize, Deserialize)]
struct Owner {
    permalink: String,
    created_at: i64,
}

#[derive(Serialize, Deserialize)]
struct VariableRow {
    batch: BatchMemory,
    created_at: i64,
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn component_key(trigger_id: &str, component_id: &str, batch_index: usize) -> String {
    format!("{trigger_id}:component:{component_id}:{batch_index}")
}

fn sanitize(id: &str) -> String {
    // trigger/component ids are caller-controlled (UUIDs, recipe-authored names); avoid
    // them breaking SurrealQL record-id syntax in the handful of places we interpolate.
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// A connected Memory Store instance.
///
/// One instance is shared process-wide (created once at engine startup); trigger data
/// is partitioned by `trigger_id` within it.
pub struct MemoryStore {
    db: Surreal<Db>,
    ttl: Duration,
}

impl MemoryStore {
    /// Connects to the embedded cache engine and starts the background TTL sweeper.
    ///
    /// `ttl` is the configured workflow timeout: entries expire when the workflow that
    /// created them would have.
    pub async fn connect(ttl: Duration) -> Result<Self, Error> {
        let db = Surreal::new::<Mem>(()).await.map_err(|e| {
            error!(error = %e, "unable to initialize memory store");
            Error::UnableToInitialize
        })?;

        db.use_ns("pipeline").use_db("memory").await.map_err(|e| {
            error!(error = %e, "unable to initialize memory store");
            Error::UnableToInitialize
        })?;

        let store = MemoryStore { db, ttl };
        store.spawn_sweeper();
        Ok(store)
    }

    fn spawn_sweeper(&self) {
        let db = self.db.clone();
        let ttl = self.ttl;
        let sweep_every = (ttl / 10).clamp(Duration::from_secs(1), Duration::from_secs(60));
        tokio::spawn(async move {
            let mut tick = interval(sweep_every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let cutoff = now_millis() - ttl.as_millis() as i64;
                for table in ["trigger", "recipe", "owner", "variable"] {
                    let q = format!("DELETE FROM {table} WHERE created_at < {cutoff};");
                    if let Err(e) = db.query(q).await {
                        warn!(table, error = %e, "memory store TTL sweep failed");
                    }
                }
            }
        });
    }

    /// Seeds a trigger's memory. Returns the trigger's cache key (`trigger_id` itself;
    /// every other key is namespaced under it).
    pub async fn write<R: Serialize>(
        &self,
        trigger_id: &str,
        recipe: &R,
        memory: &[BatchMemory],
        owner_permalink: &str,
    ) -> Result<String, Error> {
        let created_at = now_millis();
        let tid = sanitize(trigger_id);

        let _: Option<Sentinel> = self
            .db
            .create(("trigger", tid.as_str()))
            .content(Sentinel { created_at })
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;

        let payload = serde_json::to_value(recipe)?;
        let _: Option<Recipe> = self
            .db
            .create(("recipe", tid.as_str()))
            .content(Recipe { payload, created_at })
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;

        let _: Option<Owner> = self
            .db
            .create(("owner", tid.as_str()))
            .content(Owner {
                permalink: owner_permalink.to_string(),
                created_at,
            })
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;

        for (i, batch) in memory.iter().enumerate() {
            let key = format!("{trigger_id}:variable:{i}");
            let _: Option<VariableRow> = self
                .db
                .create(("variable", key.as_str()))
                .content(VariableRow {
                    batch: batch.clone(),
                    created_at,
                })
                .await
                .map_err(|e| Error::InternalLookupError(e.to_string()))?;
        }

        trace!(trigger_id, batch_size = memory.len(), "memory written");
        Ok(trigger_id.to_string())
    }

    /// Loads the full per-batch memory for a trigger.
    pub async fn load(&self, trigger_id: &str) -> Result<Vec<BatchMemory>, Error> {
        let tid = sanitize(trigger_id);
        let sentinel: Option<Sentinel> = self
            .db
            .select(("trigger", tid.as_str()))
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;
        if sentinel.is_none() {
            return Err(Error::TriggerNotFound(trigger_id.to_string()));
        }

        let mut out = Vec::new();
        let mut i = 0usize;
        loop {
            let key = format!("{trigger_id}:variable:{i}");
            let row: Option<VariableRow> = self
                .db
                .select(("variable", key.as_str()))
                .await
                .map_err(|e| Error::InternalLookupError(e.to_string()))?;
            match row {
                Some(r) => {
                    out.push(r.batch);
                    i += 1;
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Loads the recipe snapshot seeded at trigger start.
    pub async fn load_recipe<R: DeserializeOwned>(&self, trigger_id: &str) -> Result<R, Error> {
        let tid = sanitize(trigger_id);
        let row: Option<Recipe> = self
            .db
            .select(("recipe", tid.as_str()))
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;
        let row = row.ok_or_else(|| Error::TriggerNotFound(trigger_id.to_string()))?;
        Ok(serde_json::from_value(row.payload)?)
    }

    /// Loads the owner permalink seeded at trigger start.
    pub async fn load_owner(&self, trigger_id: &str) -> Result<String, Error> {
        let tid = sanitize(trigger_id);
        let row: Option<Owner> = self
            .db
            .select(("owner", tid.as_str()))
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;
        row.map(|o| o.permalink)
            .ok_or_else(|| Error::TriggerNotFound(trigger_id.to_string()))
    }

    /// Applies a patch to a single component's record for one batch index. This is the
    /// only mutation path into a running trigger's memory: each `(trigger, component_id)`
    /// pair has exactly one writer (the activity that owns it), so no locking is needed.
    pub async fn update_component(
        &self,
        trigger_id: &str,
        batch_index: usize,
        component_id: &str,
        patch: ComponentPatch,
    ) -> Result<(), Error> {
        let key = format!("{trigger_id}:variable:{batch_index}");
        let mut row: VariableRow = self
            .db
            .select(("variable", key.as_str()))
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?
            .ok_or_else(|| Error::TriggerNotFound(trigger_id.to_string()))?;

        let entry = row
            .batch
            .component
            .entry(component_id.to_string())
            .or_default();

        if let Some(input) = patch.input {
            entry.input = input;
        }
        if let Some(output) = patch.output {
            entry.output = output;
        }
        if let Some(status) = patch.status {
            entry.status = status;
        }

        let _: Option<VariableRow> = self
            .db
            .update(("variable", key.as_str()))
            .content(row)
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;

        trace!(
            key = %component_key(trigger_id, component_id, batch_index),
            "component record updated"
        );
        Ok(())
    }

    /// Destroys every key namespaced under `trigger_id`. Idempotent: purging an
    /// already-purged (or never-written) trigger is not an error.
    pub async fn purge(&self, trigger_id: &str) -> Result<(), Error> {
        let tid = sanitize(trigger_id);
        for table in ["trigger", "recipe", "owner"] {
            let _: Option<Value> = self
                .db
                .delete((table, tid.as_str()))
                .await
                .map_err(|e| Error::InternalLookupError(e.to_string()))?;
        }

        let q = format!("DELETE FROM variable WHERE id.id CONTAINS '{tid}:variable:';");
        self.db
            .query(q)
            .await
            .map_err(|e| Error::InternalLookupError(e.to_string()))?;

        debug!(trigger_id, "memory purged");
        Ok(())
    }
}

// Re-exported so callers building keys for observability/debugging match the layout
// described in the module docs without reimplementing the format string.
pub fn describe_component_key(trigger_id: &str, component_id: &str, batch_index: usize) -> String {
    component_key(trigger_id, component_id, batch_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> MemoryStore {
        MemoryStore::connect(Duration::from_secs(3600)).await.unwrap()
    }

    #[tokio::test]
    async fn write_then_load_roundtrips() {
        let store = store().await;
        let batch = vec![BatchMemory {
            variable: serde_json::Map::from_iter([("x".to_string(), json!("hello"))]),
            ..Default::default()
        }];
        store
            .write("trig-1", &json!({"variables": []}), &batch, "users/u1")
            .await
            .unwrap();

        let loaded = store.load("trig-1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].variable.get("x").unwrap(), "hello");

        let owner = store.load_owner("trig-1").await.unwrap();
        assert_eq!(owner, "users/u1");
    }

    #[tokio::test]
    async fn load_missing_trigger_errors() {
        let store = store().await;
        let err = store.load("does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::TriggerNotFound(_)));
    }

    #[tokio::test]
    async fn purge_clears_all_keys() {
        let store = store().await;
        let batch = vec![BatchMemory::default()];
        store
            .write("trig-2", &json!({}), &batch, "users/u2")
            .await
            .unwrap();
        store.purge("trig-2").await.unwrap();

        assert!(matches!(
            store.load("trig-2").await.unwrap_err(),
            Error::TriggerNotFound(_)
        ));
        assert!(matches!(
            store.load_owner("trig-2").await.unwrap_err(),
            Error::TriggerNotFound(_)
        ));
    }

    #[tokio::test]
    async fn update_component_single_writer() {
        let store = store().await;
        let batch = vec![BatchMemory::default()];
        store.write("trig-3", &json!({}), &batch, "users/u3").await.unwrap();

        store
            .update_component(
                "trig-3",
                0,
                "c1",
                ComponentPatch {
                    output: Some(json!({"result": "ECHO:a"})),
                    status: Some(ComponentStatus {
                        completed: true,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.load("trig-3").await.unwrap();
        let rec = &loaded[0].component["c1"];
        assert_eq!(rec.output["result"], "ECHO:a");
        assert!(rec.status.completed);
    }
}
