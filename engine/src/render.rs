//! Template Renderer.
//!
//! Resolves `${…}` references inside a component's `configuration` (or a declared
//! `Output.value`) against one batch index's [`BatchMemory`]. Three shapes: a plain
//! literal passes through; a single anchored reference `${ <path> }` returns the
//! resolved subtree with its native JSON type; an anchored array fan-in
//! `${ [<ref>, <ref>, …] }` concatenates each inner reference into a list; a
//! non-anchored `${…}` fragment embedded in a larger string is stringified in place.

use once_cell::sync::Lazy;
use pipeline_memory::BatchMemory;
use regex::Regex;
use serde_json::Value;

use crate::error::Error;

const MASK: &str = "*****MASKED*****";

static SINGLE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\{\s*(.+?)\s*\}$").unwrap());
static FAN_IN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\{\s*\[(.+)\]\s*\}$").unwrap());
static NESTED_FRAGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{\s*(.+?)\s*\}").unwrap());

/// Whether the caller may see unmasked secret values. Component execution always
/// renders as `Admin` (the connector needs the real credential); rendering for traces
/// or outputs shown to a requester uses `Caller` unless the requester holds an admin
/// execution context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderContext {
    Admin,
    Caller,
}

#[derive(Debug)]
enum Segment {
    Key(String),
    Index(usize),
}

fn split_path(path: &str) -> Result<Vec<Segment>, Error> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        let mut rest = dotted;
        // pull off a leading `name`, then any number of trailing `[n]` index groups.
        let key_end = rest.find('[').unwrap_or(rest.len());
        let (key, mut brackets) = rest.split_at(key_end);
        if key.is_empty() {
            return Err(Error::NotFound(format!("empty path segment in {path:?}")));
        }
        segments.push(Segment::Key(key.to_string()));
        while !brackets.is_empty() {
            if !brackets.starts_with('[') {
                return Err(Error::NotFound(format!("malformed index in {path:?}")));
            }
            let close = brackets
                .find(']')
                .ok_or_else(|| Error::NotFound(format!("unterminated index in {path:?}")))?;
            let idx: usize = brackets[1..close]
                .parse()
                .map_err(|_| Error::NotFound(format!("non-numeric index in {path:?}")))?;
            segments.push(Segment::Index(idx));
            brackets = &brackets[close + 1..];
        }
        rest = "";
        let _ = rest;
    }
    Ok(segments)
}

fn mask_value(v: Value) -> Value {
    match v {
        Value::String(_) => Value::String(MASK.to_string()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, mask_value(v))).collect()),
        Value::Array(arr) => Value::Array(arr.into_iter().map(mask_value).collect()),
        other => other,
    }
}

fn traverse(root: &Value, segments: &[Segment], path: &str) -> Result<Value, Error> {
    let mut current = root.clone();
    for seg in segments {
        current = match (seg, &current) {
            (Segment::Key(k), Value::Object(map)) => map
                .get(k)
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))?,
            (Segment::Index(i), Value::Array(arr)) => {
                arr.get(*i).cloned().ok_or_else(|| Error::NotFound(path.to_string()))?
            }
            _ => return Err(Error::NotFound(path.to_string())),
        };
    }
    Ok(current)
}

/// `TraverseBinding(Memory[i], "a.b[0].c") → any | ErrNotFound`.
///
/// `path` is the full reference path: `variable.<name>`, `secret.<name>`, or
/// `<componentId>.<field-path>` (the latter indexes into that component's rendered
/// *output*, per the same reference grammar the Recipe Compiler scans for).
pub fn traverse_binding(memory: &BatchMemory, path: &str, ctx: RenderContext) -> Result<Value, Error> {
    let segments = split_path(path)?;
    let (head, rest) = segments
        .split_first()
        .ok_or_else(|| Error::NotFound(path.to_string()))?;
    let Segment::Key(head) = head else {
        return Err(Error::NotFound(path.to_string()));
    };

    match head.as_str() {
        "variable" => {
            let root = Value::Object(memory.variable.clone());
            traverse(&root, rest, path)
        }
        "secret" => {
            let root = Value::Object(
                memory
                    .secret
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            );
            let resolved = traverse(&root, rest, path)?;
            Ok(if ctx == RenderContext::Admin {
                resolved
            } else {
                mask_value(resolved)
            })
        }
        component_id => {
            let record = memory
                .component
                .get(component_id)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
            traverse(&record.output, rest, path)
        }
    }
}

fn render_single_or_fan_in(template: &str, memory: &BatchMemory, ctx: RenderContext) -> Result<Option<Value>, Error> {
    if let Some(caps) = FAN_IN.captures(template) {
        let inner = &caps[1];
        let mut out = Vec::new();
        for raw_ref in inner.split(',') {
            let raw_ref = raw_ref.trim();
            if raw_ref.is_empty() {
                return Err(Error::InvalidRecipe(format!("empty fan-in entry in {template:?}")));
            }
            out.push(traverse_binding(memory, raw_ref, ctx)?);
        }
        return Ok(Some(Value::Array(out)));
    }
    if let Some(caps) = SINGLE_REF.captures(template) {
        let path = &caps[1];
        return Ok(Some(traverse_binding(memory, path, ctx)?));
    }
    Ok(None)
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_string(template: &str, memory: &BatchMemory, ctx: RenderContext) -> Result<Value, Error> {
    if let Some(resolved) = render_single_or_fan_in(template, memory, ctx)? {
        return Ok(resolved);
    }
    if !NESTED_FRAGMENT.is_match(template) {
        return Ok(Value::String(template.to_string()));
    }
    let mut err = None;
    let rendered = NESTED_FRAGMENT.replace_all(template, |caps: &regex::Captures| {
        let path = caps[1].to_string();
        match traverse_binding(memory, &path, ctx) {
            Ok(v) => stringify(&v),
            Err(e) => {
                err = Some(e);
                String::new()
            }
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(Value::String(rendered.into_owned()))
}

/// `RenderInput(template, batchIndex, Memory[i]) → any`.
///
/// `template` is typically a `Component.configuration` or `Output.value`; string leaves
/// are rendered, other JSON shapes recurse structurally.
pub fn render_input(template: &Value, memory: &BatchMemory, ctx: RenderContext) -> Result<Value, Error> {
    match template {
        Value::String(s) => render_string(s, memory, ctx),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_input(v, memory, ctx)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                out.push(render_input(v, memory, ctx)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn memory_with(vars: serde_json::Map<String, Value>, secrets: HashMap<String, String>) -> BatchMemory {
        BatchMemory {
            variable: vars,
            secret: secrets,
            component: HashMap::new(),
        }
    }

    #[test]
    fn plain_literal_passes_through() {
        let mem = memory_with(Default::default(), Default::default());
        let out = render_input(&json!("hello"), &mem, RenderContext::Admin).unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[test]
    fn single_ref_preserves_type() {
        let mem = memory_with(
            serde_json::Map::from_iter([("x".to_string(), json!(42))]),
            Default::default(),
        );
        let out = render_input(&json!("${variable.x}"), &mem, RenderContext::Admin).unwrap();
        assert_eq!(out, json!(42));
    }

    #[test]
    fn secret_masked_for_caller_context() {
        let mem = memory_with(
            Default::default(),
            HashMap::from_iter([("api_key".to_string(), "sk-live-1234".to_string())]),
        );
        let out = render_input(&json!("${secret.api_key}"), &mem, RenderContext::Caller).unwrap();
        assert_eq!(out, json!("*****MASKED*****"));
        let unmasked = render_input(&json!("${secret.api_key}"), &mem, RenderContext::Admin).unwrap();
        assert_eq!(unmasked, json!("sk-live-1234"));
    }

    #[test]
    fn array_fan_in_concatenates() {
        let mut mem = memory_with(Default::default(), Default::default());
        mem.component.insert(
            "c1".to_string(),
            pipeline_memory::ComponentRecord {
                output: json!({"n": 3}),
                ..Default::default()
            },
        );
        mem.component.insert(
            "c2".to_string(),
            pipeline_memory::ComponentRecord {
                output: json!({"n": 4}),
                ..Default::default()
            },
        );
        let out = render_input(&json!("${[c1.n, c2.n]}"), &mem, RenderContext::Admin).unwrap();
        assert_eq!(out, json!([3, 4]));
    }

    #[test]
    fn nested_fragment_stringifies() {
        let mem = memory_with(
            serde_json::Map::from_iter([("name".to_string(), json!("world"))]),
            Default::default(),
        );
        let out = render_input(&json!("hello ${variable.name}!"), &mem, RenderContext::Admin).unwrap();
        assert_eq!(out, json!("hello world!"));
    }

    #[test]
    fn missing_path_is_not_found() {
        let mem = memory_with(Default::default(), Default::default());
        let err = render_input(&json!("${variable.missing}"), &mem, RenderContext::Admin).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
