//! Pre-explode id normalization: rewrites opaque generated ids to human-readable
//! slugs derived from each node's `name` field.
//!
//! Node-RED auto-assigns opaque hex-ish ids (`a1b2c3d4.e5f6g7`, sometimes with a
//! `.`-separated instance suffix for subflow instances). Before anything is written to
//! disk, rewrite every such id that has a human-readable `name` into a readable slug,
//! then rewrite every reference to it (`z`, `g`, `wires`, `links`, `scope`) in the same
//! pass: collect all rewrites into a table first, then apply that table to every
//! id-bearing field in one pass, so a rewritten id and a reference to it never
//! observe each other mid-rewrite.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use flowsplit_core::{Document, FlowsplitError, Node};
use serde_json::Value;

use crate::stages::PreExplodePlugin;

pub const NAME: &str = "id-normalizer";

/// Fields, beyond `id`/`z`/`g`, that carry nested id references and must be rewritten
/// alongside the node's own id.
const WIRE_FIELDS: [&str; 3] = ["wires", "links", "scope"];

pub struct IdNormalizerPlugin;

fn is_opaque_id(id: &str) -> bool {
    !id.is_empty()
        && id.split('.').all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_hexdigit()))
}

fn slugify(input: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = true; // suppress a leading separator
    for ch in input.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_sep = false;
        } else if !prev_sep {
            out.push('_');
            prev_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

fn rewrite_value_ids(value: &mut Value, rewrites: &HashMap<String, String>) {
    match value {
        Value::String(s) => {
            if let Some(new_id) = rewrites.get(s.as_str()) {
                *s = new_id.clone();
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_value_ids(item, rewrites);
            }
        }
        _ => {}
    }
}

fn rewrite_node_ids(node: &mut Node, rewrites: &HashMap<String, String>) {
    for id_field in ["id", "z", "g"] {
        if let Some(Value::String(s)) = node.0.get_mut(id_field) {
            if let Some(new_id) = rewrites.get(s.as_str()) {
                *s = new_id.clone();
            }
        }
    }
    for field in WIRE_FIELDS {
        if let Some(value) = node.0.get_mut(field) {
            rewrite_value_ids(value, rewrites);
        }
    }
}

#[async_trait]
impl PreExplodePlugin for IdNormalizerPlugin {
    async fn run(&self, document: &mut Document) -> Result<bool, FlowsplitError> {
        let mut used: HashSet<String> =
            document.iter().filter_map(|n| n.id().map(|i| i.0)).collect();
        let mut rewrites: HashMap<String, String> = HashMap::new();

        for node in document.iter() {
            let Some(id) = node.id() else { continue };
            if !is_opaque_id(&id.0) {
                continue;
            }
            let Some(name) = node
                .get("name")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
            else {
                continue;
            };
            let type_prefix = slugify(node.node_type().unwrap_or("node"));
            let base = format!("{type_prefix}_{}", slugify(name));

            let mut candidate = base.clone();
            let mut suffix = 1u32;
            while used.contains(&candidate) {
                suffix += 1;
                candidate = format!("{base}_{suffix}");
            }
            used.insert(candidate.clone());
            rewrites.insert(id.0, candidate);
        }

        if rewrites.is_empty() {
            return Ok(false);
        }

        for node in document.0.iter_mut() {
            rewrite_node_ids(node, &rewrites);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsplit_core::Document;
    use serde_json::json;

    fn node(value: Value) -> Node {
        Node::new(value.as_object().unwrap().clone())
    }

    #[tokio::test]
    async fn rewrites_opaque_id_and_its_wire_references() {
        let n1 = node(json!({
            "id": "a1b2c3d4.e5f6g7",
            "type": "function",
            "name": "Process Data",
            "z": "t1",
            "wires": [["x0y0z0w0"]],
        }));
        let n2 = node(json!({"id": "x0y0z0w0", "type": "debug", "z": "t1"}));
        let mut doc = Document::from_nodes(vec![n1, n2]).unwrap();

        let changed = IdNormalizerPlugin.run(&mut doc).await.unwrap();
        assert!(changed);

        let renamed = &doc.0[0];
        assert_eq!(renamed.id().unwrap().0, "func_process_data");
        assert_eq!(
            renamed.0.get("wires").unwrap(),
            &json!([["x0y0z0w0"]]), // target id has no name, left unrewritten
        );
    }

    #[tokio::test]
    async fn leaves_non_opaque_and_unnamed_ids_alone() {
        let n1 = node(json!({"id": "my-readable-id", "type": "function", "z": "t1"}));
        let mut doc = Document::from_nodes(vec![n1]).unwrap();
        let changed = IdNormalizerPlugin.run(&mut doc).await.unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn collisions_get_a_numeric_suffix() {
        let n1 = node(json!({"id": "a1b2", "type": "function", "name": "Dup", "z": "t1"}));
        let n2 = node(json!({"id": "c3d4", "type": "function", "name": "Dup", "z": "t1"}));
        let mut doc = Document::from_nodes(vec![n1, n2]).unwrap();
        IdNormalizerPlugin.run(&mut doc).await.unwrap();
        let ids: Vec<String> = doc.0.iter().map(|n| n.id().unwrap().0).collect();
        assert_eq!(ids, vec!["function_dup", "function_dup_2"]);
    }
}
