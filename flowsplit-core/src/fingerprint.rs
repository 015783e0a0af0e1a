//! Semantic equality for round-trip verification.
//!
//! Two documents are equal when, after sorting keys in every object and normalising
//! number representations, their canonical JSON forms are identical. Sibling order is
//! preserved — only *within* a node's own object are keys reordered.

use serde_json::{Map, Number, Value};

use crate::model::{Document, Node};

/// A content-addressed digest of a document or node's canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    pub fn of_document(doc: &Document) -> Self {
        let canonical: Vec<Value> = doc
            .nodes()
            .iter()
            .map(|n| canonicalize(&Value::Object(n.0.clone())))
            .collect();
        Self::of_canonical_value(&Value::Array(canonical))
    }

    pub fn of_node(node: &Node) -> Self {
        Self::of_canonical_value(&canonicalize(&Value::Object(node.0.clone())))
    }

    fn of_canonical_value(value: &Value) -> Self {
        // serde_json's default Map is BTreeMap-backed, so object keys serialize in
        // sorted order already; canonicalize() normalises numbers on top of that.
        let bytes = serde_json::to_vec(value).expect("canonical value always serializes");
        Fingerprint(blake3::hash(&bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Recursively rebuild a `Value` with sorted object keys and normalised numbers.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => Value::Number(normalize_number(n)),
        other => other.clone(),
    }
}

/// Collapse `1` and `1.0` (and similar) to the same representation so that documents
/// differing only in how a number was printed still compare equal.
fn normalize_number(n: &Number) -> Number {
    if let Some(i) = n.as_i64() {
        return Number::from(i);
    }
    if let Some(u) = n.as_u64() {
        return Number::from(u);
    }
    if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < 1e15 {
            return Number::from(f as i64);
        }
        if let Some(normalized) = Number::from_f64(f) {
            return normalized;
        }
    }
    n.clone()
}

/// Whether two documents are semantically equal under the fingerprint rules.
pub fn documents_equal(a: &Document, b: &Document) -> bool {
    Fingerprint::of_document(a) == Fingerprint::of_document(b)
}
