//! Recipe Compiler.
//!
//! `compile(&Recipe) -> Result<Dag, Error>`: scans every component's configuration for
//! `${…}` references, turns them into edges, and produces a topological order. Pure and
//! idempotent — it never touches Memory or the registry.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::error::Error;
use crate::recipe::Recipe;

static ANY_FRAGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{\s*(.+?)\s*\}").unwrap());

/// A compiled recipe: component ids in an order consistent with every reference edge.
#[derive(Clone, Debug)]
pub struct Dag {
    /// Component ids in the order they appear in the recipe (not execution order).
    pub nodes: Vec<String>,
    /// `(from, to)` edges: `from` must complete before `to` runs.
    pub edges: Vec<(String, String)>,
    /// Execution order: a linear extension of the DAG, ties broken by the order
    /// components appear in the recipe.
    pub order: Vec<String>,
}

fn collect_refs(value: &Value, out: &mut Vec<String>) -> Result<(), Error> {
    match value {
        Value::String(s) => {
            for caps in ANY_FRAGMENT.captures_iter(s) {
                let inner = caps[1].trim();
                if let Some(list) = inner.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                    let mut any = false;
                    for part in list.split(',') {
                        let part = part.trim();
                        if !part.is_empty() {
                            out.push(part.to_string());
                            any = true;
                        }
                    }
                    if !any {
                        return Err(Error::InvalidRecipe(format!("empty fan-in reference: ${{{inner}}}")));
                    }
                } else {
                    out.push(inner.to_string());
                }
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_refs(v, out)?;
            }
        }
        Value::Array(arr) => {
            for v in arr {
                collect_refs(v, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// The root a reference path is anchored to: the synthetic batch-input source, or
/// another component in the same recipe.
enum RefSource {
    Start,
    Component(String),
}

fn classify(path: &str, known: &HashMap<String, usize>) -> Result<RefSource, Error> {
    if path.is_empty() {
        return Err(Error::InvalidRecipe("empty reference path".to_string()));
    }
    let head = path.split('.').next().unwrap_or(path);
    if head == "variable" || head == "secret" {
        return Ok(RefSource::Start);
    }
    if known.contains_key(head) {
        return Ok(RefSource::Component(head.to_string()));
    }
    Err(Error::InvalidRecipe(format!("unknown reference target: {path}")))
}

/// `Compile(recipe) → DAG | ErrInvalidRecipe`.
pub fn compile(recipe: &Recipe) -> Result<Dag, Error> {
    let mut order_index = HashMap::new();
    for (i, c) in recipe.component.iter().enumerate() {
        if order_index.insert(c.id.clone(), i).is_some() {
            return Err(Error::InvalidRecipe(format!("duplicate component id: {}", c.id)));
        }
    }

    let mut edges = Vec::new();
    let mut in_degree: HashMap<String, usize> = recipe.component.iter().map(|c| (c.id.clone(), 0)).collect();
    let mut adjacency: HashMap<String, Vec<String>> = recipe.component.iter().map(|c| (c.id.clone(), Vec::new())).collect();

    for component in &recipe.component {
        let mut refs = Vec::new();
        collect_refs(&component.configuration, &mut refs)?;
        if let Some(cond) = &component.condition {
            refs.push(cond.clone());
        }
        for raw in refs {
            match classify(&raw, &order_index)? {
                RefSource::Start => {}
                RefSource::Component(from) => {
                    if from == component.id {
                        return Err(Error::InvalidRecipe(format!(
                            "component {} references itself",
                            component.id
                        )));
                    }
                    edges.push((from.clone(), component.id.clone()));
                    adjacency.get_mut(&from).unwrap().push(component.id.clone());
                    *in_degree.get_mut(&component.id).unwrap() += 1;
                }
            }
        }
    }

    // Kahn's algorithm, ties broken by original recipe order: the ready set is a
    // BTreeSet of (original_index, id) so popping the minimum always yields the
    // earliest-declared ready component.
    let mut ready: BTreeSet<(usize, String)> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| (order_index[id], id.clone()))
        .collect();

    let mut remaining = in_degree.clone();
    let mut order = Vec::with_capacity(recipe.component.len());

    while let Some((_, id)) = ready.iter().next().cloned() {
        ready.remove(&(order_index[&id], id.clone()));
        order.push(id.clone());
        for next in &adjacency[&id] {
            let deg = remaining.get_mut(next).unwrap();
            *deg -= 1;
            if *deg == 0 {
                ready.insert((order_index[next], next.clone()));
            }
        }
    }

    if order.len() != recipe.component.len() {
        let stuck: Vec<_> = remaining
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id)
            .collect();
        return Err(Error::InvalidRecipe(format!(
            "cycle detected among components: {}",
            stuck.join(", ")
        )));
    }

    Ok(Dag {
        nodes: recipe.component.iter().map(|c| c.id.clone()).collect(),
        edges,
        order,
    })
}
