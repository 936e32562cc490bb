//! Output/Trace Assembler.

use pipeline_memory::{BatchMemory, ComponentStatus};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Error;
use crate::recipe::{Component, Output};
use crate::render::{render_input, RenderContext};

/// Wall-clock bounds for one component's activity, tracked by the orchestrator
/// alongside (not inside) the Memory Store's per-batch-index status, since one
/// activity invocation covers the whole batch rather than a single index.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComponentTiming {
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

/// Per-component execution record used for observability.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    pub input: Vec<Value>,
    pub output: Vec<Value>,
    pub status: Vec<ComponentStatus>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

/// `Assemble(memory, recipe.Output) → outputs[]`.
///
/// Renders every declared output for every batch index. Any unresolved reference is a
/// hard failure post-execution: `ErrAssembly`.
pub fn assemble(memory: &[BatchMemory], outputs: &[Output], ctx: RenderContext) -> Result<Vec<Value>, Error> {
    let mut rows = Vec::with_capacity(memory.len());
    for row in memory {
        let mut object = serde_json::Map::with_capacity(outputs.len());
        for output in outputs {
            let value = render_input(&Value::String(output.value.clone()), row, ctx)
                .map_err(|e| Error::Assembly(format!("output {}: {e}", output.name)))?;
            object.insert(output.name.clone(), value);
        }
        rows.push(Value::Object(object));
    }
    Ok(rows)
}

/// `AssembleStream(memory, recipe.Output, path) → partialOutputs[]`.
///
/// Only outputs whose template mentions `path` are attempted; any that fail to
/// resolve (the referenced sub-path isn't populated yet) are silently skipped rather
/// than failing the whole tick.
pub fn assemble_stream(memory: &[BatchMemory], outputs: &[Output], path: &str, ctx: RenderContext) -> Vec<Value> {
    memory
        .iter()
        .map(|row| {
            let mut object = serde_json::Map::new();
            for output in outputs {
                if !output.value.contains(path) {
                    continue;
                }
                if let Ok(value) = render_input(&Value::String(output.value.clone()), row, ctx) {
                    object.insert(output.name.clone(), value);
                }
            }
            Value::Object(object)
        })
        .collect()
}

/// `GenerateTraces(components, memory) → map<componentId, Trace>`.
pub fn generate_traces(
    components: &[Component],
    memory: &[BatchMemory],
    timings: &HashMap<String, ComponentTiming>,
) -> HashMap<String, Trace> {
    let mut traces = HashMap::with_capacity(components.len());
    for component in components {
        let mut trace = Trace::default();
        if let Some(timing) = timings.get(&component.id) {
            trace.started_at = timing.started_at;
            trace.ended_at = timing.ended_at;
        }
        for row in memory {
            if let Some(record) = row.component.get(&component.id) {
                trace.input.push(record.input.clone());
                trace.output.push(record.output.clone());
                trace.status.push(record.status.clone());
            } else {
                trace.input.push(Value::Null);
                trace.output.push(Value::Null);
                trace.status.push(ComponentStatus::default());
            }
        }
        traces.insert(component.id.clone(), trace);
    }
    traces
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_memory::ComponentRecord;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    fn row_with(component_id: &str, output: Value) -> BatchMemory {
        let mut row = BatchMemory::default();
        row.component.insert(
            component_id.to_string(),
            ComponentRecord {
                output,
                ..Default::default()
            },
        );
        row
    }

    #[test]
    fn assemble_renders_every_output() {
        let memory = vec![row_with("c1", json!({"result": "ECHO:a"}))];
        let outputs = vec![Output {
            name: "r".to_string(),
            value: "${c1.result}".to_string(),
        }];
        let out = assemble(&memory, &outputs, RenderContext::Admin).unwrap();
        assert_eq!(out[0]["r"], json!("ECHO:a"));
    }

    #[test]
    fn assemble_fails_on_unresolved_path() {
        let memory = vec![BatchMemory::default()];
        let outputs = vec![Output {
            name: "r".to_string(),
            value: "${c1.result}".to_string(),
        }];
        let err = assemble(&memory, &outputs, RenderContext::Admin).unwrap_err();
        assert!(matches!(err, Error::Assembly(_)));
    }

    #[test]
    fn assemble_stream_skips_unrelated_and_unresolved() {
        let memory = vec![row_with("c1", json!({"result": "ECHO:a"}))];
        let outputs = vec![
            Output {
                name: "r".to_string(),
                value: "${c1.result}".to_string(),
            },
            Output {
                name: "s".to_string(),
                value: "${c2.result}".to_string(),
            },
        ];
        let partial = assemble_stream(&memory, &outputs, "c1", RenderContext::Admin);
        let obj = partial[0].as_object().unwrap();
        assert_eq!(obj.get("r"), Some(&json!("ECHO:a")));
        assert!(!obj.contains_key("s"));
    }

    #[test]
    fn traces_cover_every_declared_component() {
        let components = vec![Component {
            id: "c1".to_string(),
            definition_name: "operator-definitions/noop".to_string(),
            configuration: json!({}),
            condition: None,
            on_error: None,
        }];
        let memory = vec![row_with("c1", json!({"result": "x"}))];
        let traces = generate_traces(&components, &memory, &StdHashMap::new());
        assert!(traces.contains_key("c1"));
        assert_eq!(traces["c1"].output[0], json!({"result": "x"}));
    }
}
