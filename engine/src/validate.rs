//! Input Validator.
//!
//! Builds a JSON-Schema object from a recipe's declared `Variable`s (grounded on
//! `fiddler::config::ConfigSpec`'s `from_schema`/`validate` pair, which wraps the same
//! `jsonschema` crate) and, for each batch record, MIME-sniffs and rewrites binary
//! fields before running schema validation. Unlike `ConfigSpec` — which fails on first
//! error — this collects every failing path so `ErrValidation`'s message can name all
//! of them at once.
//!
//! `instillFormat`/`instillAcceptFormats` are not wired in as true custom `jsonschema`
//! keywords (the crate's keyword-registration surface is draft-specific boilerplate out
//! of proportion to what this needs); instead the declared format drives the emitted
//! `type` and a second, format-specific pass (binary sniffing, array element format)
//! runs before schema compilation. The observable behavior — typed validation with
//! aggregated per-path messages — is the same either way.

use base64::Engine;
use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};

use crate::error::Error;
use crate::recipe::{InstillFormat, Variable};

fn schema_for_format(format: &InstillFormat) -> Value {
    match format {
        InstillFormat::String | InstillFormat::Text => json!({"type": "string"}),
        InstillFormat::Number => json!({"type": "number"}),
        InstillFormat::Integer => json!({"type": "integer"}),
        InstillFormat::Boolean => json!({"type": "boolean"}),
        InstillFormat::Null => json!({"type": "null"}),
        // binary formats are carried as base64/data-URI strings on the wire
        InstillFormat::Image | InstillFormat::Audio | InstillFormat::Video => json!({"type": "string"}),
        InstillFormat::Object => json!({"type": "object"}),
        InstillFormat::Array(inner) => json!({"type": "array", "items": schema_for_format(inner)}),
    }
}

/// Builds the JSON-Schema object validating one batch record against `variables`.
pub fn build_schema(variables: &[Variable]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for v in variables {
        let format = InstillFormat::parse(&v.instill_format).unwrap_or(InstillFormat::String);
        properties.insert(v.name.clone(), schema_for_format(&format));
        if v.default.is_none() {
            required.push(Value::String(v.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

fn sniff_mime(payload: &str) -> Option<&'static str> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload).ok()?;
    infer::get(&bytes).map(|t| t.mime_type())
}

fn rewrite_binary_string(s: &str) -> String {
    if s.starts_with("data:") {
        return s.to_string();
    }
    let mime = sniff_mime(s).unwrap_or("application/octet-stream");
    format!("data:{mime};base64,{s}")
}

fn rewrite_binary_field(value: &mut Value, format: &InstillFormat) {
    match (format, value) {
        (InstillFormat::Image | InstillFormat::Audio | InstillFormat::Video, Value::String(s)) => {
            *s = rewrite_binary_string(s);
        }
        (InstillFormat::Array(inner), Value::Array(items)) => {
            for item in items {
                rewrite_binary_field(item, inner);
            }
        }
        _ => {}
    }
}

fn apply_defaults_and_binary_rewrite(record: &mut Value, variables: &[Variable]) {
    let Value::Object(map) = record else { return };
    for v in variables {
        if !map.contains_key(&v.name) {
            if let Some(default) = &v.default {
                map.insert(v.name.clone(), default.clone());
            }
            continue;
        }
        let format = InstillFormat::parse(&v.instill_format).unwrap_or(InstillFormat::String);
        if let Some(field) = map.get_mut(&v.name) {
            rewrite_binary_field(field, &format);
        }
    }
}

/// `Validate(recipe.Variables, batch[]) → normalizedBatch[] | ErrValidation(messages[])`.
pub fn validate(variables: &[Variable], batch: &[Value], max_batch_size: usize) -> Result<Vec<Value>, Error> {
    if batch.len() > max_batch_size {
        return Err(Error::ExceedMaxBatchSize {
            got: batch.len(),
            max: max_batch_size,
        });
    }

    let schema = build_schema(variables);
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| Error::InvalidRecipe(format!("variables produced an invalid schema: {e}")))?;

    let mut normalized = Vec::with_capacity(batch.len());
    let mut messages = Vec::new();

    for (i, record) in batch.iter().enumerate() {
        let mut record = record.clone();
        apply_defaults_and_binary_rewrite(&mut record, variables);

        if let Err(errors) = compiled.validate(&record) {
            for e in errors {
                messages.push(format!("inputs[{i}]{}: {e}", e.instance_path));
            }
        }
        normalized.push(record);
    }

    if !messages.is_empty() {
        return Err(Error::Validation(messages.join("; ")));
    }

    Ok(normalized)
}
