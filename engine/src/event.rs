//! `HandleNamespacePipelineEventByID` and the `Variable.listen` JSONPath extraction it
//! depends on.
//!
//! Event-source verification handshakes are an explicit out-of-scope collaborator; this
//! module only defines the trait boundary the core calls through ([`EventVerifier`]) and
//! the JSONPath variable extraction that happens for every non-handshake payload.

use jsonpath_rust::JsonPathFinder;
use serde_json::Value;

use crate::error::Error;
use crate::recipe::Variable;

/// The event-source verification collaborator (out of scope beyond this boundary).
/// Returns `Some(echo)` when `payload` is a handshake/verification request the target
/// component recognizes, in which case the engine echoes `echo` back without starting
/// a trigger.
pub trait EventVerifier: Send + Sync {
    fn verify(&self, payload: &Value) -> Option<Value>;
}

/// Outcome of handling one inbound event.
pub enum EventOutcome {
    /// The payload was a verification handshake; echo this value back.
    Handshake(Value),
    /// The payload started a trigger; `batch` is its (single-record) input.
    Triggered { batch: Vec<Value> },
}

fn extract_jsonpath(payload: &Value, path: &str) -> Result<Value, Error> {
    let query = format!("$.{path}");
    let text = payload.to_string();
    let finder = JsonPathFinder::from_str(&text, &query)
        .map_err(|e| Error::NotFound(format!("invalid jsonpath {path:?}: {e}")))?;
    match finder.find() {
        Value::Array(mut matches) if !matches.is_empty() => Ok(matches.remove(0)),
        _ => Err(Error::NotFound(format!("jsonpath {path:?} matched nothing"))),
    }
}

/// `HandleNamespacePipelineEventByID(ns, id, eventId, payload, triggerId)`.
///
/// Asks `verifier` whether `payload` is a handshake first; if not, extracts every
/// declared variable's value from the payload via its `listen` JSONPath expressions
/// (first match wins) and returns a one-record batch ready for an async trigger.
pub fn handle_event(
    variables: &[Variable],
    verifier: &dyn EventVerifier,
    payload: &Value,
) -> Result<EventOutcome, Error> {
    if let Some(echo) = verifier.verify(payload) {
        return Ok(EventOutcome::Handshake(echo));
    }

    let mut record = serde_json::Map::with_capacity(variables.len());
    for variable in variables {
        for path in &variable.listen {
            if let Ok(value) = extract_jsonpath(payload, path) {
                record.insert(variable.name.clone(), value);
                break;
            }
        }
    }
    Ok(EventOutcome::Triggered {
        batch: vec![Value::Object(record)],
    })
}
