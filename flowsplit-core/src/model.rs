//! The document/node data model.
//!
//! A `Document` is an ordered list of `Node`s; order is semantically significant
//! because Node-RED preserves sibling order within a container. A `Node` is a thin
//! wrapper over a JSON object that knows how to read its own `id`, `type`, and `z`
//! (parent container) fields without committing to a richer schema — the rest of a
//! node's fields are opaque to the core and owned by whichever plugin claims them.

use std::collections::{HashSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FlowsplitError;

/// Node type strings that partition the document into directories at explode time.
pub const CONTAINER_TYPES: [&str; 3] = ["tab", "subflow", "group"];

/// A node identifier. Newtype only so call sites can't accidentally compare a node id
/// against an unrelated string without saying so.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// A single node in the flow document: a JSON object with at least `id` and `type`.
///
/// Deliberately not a typed struct with named fields beyond the three the engine needs
/// to reason about (`id`, `type`, `z`) — everything else is arbitrary per-type content
/// that belongs to plugins, not to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node(pub Map<String, Value>);

impl Node {
    pub fn new(fields: Map<String, Value>) -> Self {
        Node(fields)
    }

    pub fn id(&self) -> Option<NodeId> {
        self.0.get("id")?.as_str().map(NodeId::from)
    }

    pub fn node_type(&self) -> Option<&str> {
        self.0.get("type")?.as_str()
    }

    /// Parent container id. Absent for top-level/config nodes.
    pub fn parent(&self) -> Option<NodeId> {
        self.0.get("z")?.as_str().map(NodeId::from)
    }

    pub fn is_container(&self) -> bool {
        matches!(self.node_type(), Some(t) if CONTAINER_TYPES.contains(&t))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Remove and return a field, for plugins claiming ownership of it.
    pub fn take(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// An ordered sequence of nodes. Order is preserved end-to-end; duplicates by id are
/// rejected at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub Vec<Node>);

impl Document {
    /// Build a document from a node list, rejecting duplicate or missing ids.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, FlowsplitError> {
        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            let id = node
                .id()
                .ok_or_else(|| FlowsplitError::Config("node missing 'id' field".into()))?;
            if !seen.insert(id.clone()) {
                return Err(FlowsplitError::Config(format!(
                    "duplicate node id '{id}' in document"
                )));
            }
        }
        Ok(Document(nodes))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.0.iter()
    }

    /// Look a node up by id. O(n); callers doing this repeatedly should build an index.
    pub fn find(&self, id: &NodeId) -> Option<&Node> {
        self.0.iter().find(|n| n.id().as_ref() == Some(id))
    }

    /// Group node indices by container id (`z`). Config nodes (`z` absent) are grouped
    /// under `None`. Order within each group matches document order.
    pub fn group_by_container(&self) -> HashMap<Option<NodeId>, Vec<usize>> {
        let mut groups: HashMap<Option<NodeId>, Vec<usize>> = HashMap::new();
        for (idx, node) in self.0.iter().enumerate() {
            groups.entry(node.parent()).or_default().push(idx);
        }
        groups
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, FlowsplitError> {
        let raw: Vec<Map<String, Value>> = serde_json::from_slice(bytes)
            .map_err(|e| FlowsplitError::Config(format!("invalid document JSON: {e}")))?;
        Self::from_nodes(raw.into_iter().map(Node::new).collect())
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>, FlowsplitError> {
        serde_json::to_vec(self).map_err(|e| FlowsplitError::Config(e.to_string()))
    }
}

/// The set of field names already extracted from a node during a single explode pass.
///
/// Per node, per call: owned by the worker processing that node, folded through the
/// plugin chain in priority order. No shared mutable set is needed across nodes
/// processed concurrently — each gets its own.
#[derive(Debug, Clone, Default)]
pub struct ClaimedFields {
    claims: HashMap<String, String>,
}

impl ClaimedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self, field: &str) -> bool {
        self.claims.contains_key(field)
    }

    pub fn claimed_by(&self, field: &str) -> Option<&str> {
        self.claims.get(field).map(String::as_str)
    }

    /// Record that `plugin` claims `field`. Returns an error naming both plugins if the
    /// field was already claimed by someone else.
    pub fn claim(&mut self, field: &str, plugin: &str) -> Result<(), FlowsplitError> {
        if let Some(existing) = self.claims.get(field) {
            if existing != plugin {
                return Err(FlowsplitError::FieldClaimConflict {
                    field: field.to_string(),
                    first: existing.to_string(),
                    second: plugin.to_string(),
                });
            }
            return Ok(());
        }
        self.claims.insert(field.to_string(), plugin.to_string());
        Ok(())
    }

    pub fn claimed_fields(&self) -> impl Iterator<Item = &str> {
        self.claims.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, typ: &str, z: Option<&str>) -> Node {
        let mut map = Map::new();
        map.insert("id".into(), json!(id));
        map.insert("type".into(), json!(typ));
        if let Some(z) = z {
            map.insert("z".into(), json!(z));
        }
        Node::new(map)
    }

    #[test]
    fn rejects_duplicate_ids() {
        let nodes = vec![node("n1", "function", Some("t1")), node("n1", "debug", Some("t1"))];
        assert!(Document::from_nodes(nodes).is_err());
    }

    #[test]
    fn groups_by_container_preserve_order() {
        let nodes = vec![
            node("n1", "function", Some("t1")),
            node("n2", "debug", Some("t1")),
            node("cfg", "mqtt-broker", None),
        ];
        let doc = Document::from_nodes(nodes).unwrap();
        let groups = doc.group_by_container();
        let t1 = groups.get(&Some(NodeId::from("t1"))).unwrap();
        assert_eq!(t1, &vec![0, 1]);
        let cfg = groups.get(&None).unwrap();
        assert_eq!(cfg, &vec![2]);
    }

    #[test]
    fn claimed_fields_disjoint() {
        let mut claims = ClaimedFields::new();
        claims.claim("func", "wrapped-function").unwrap();
        let err = claims.claim("func", "other-plugin").unwrap_err();
        assert!(matches!(err, FlowsplitError::FieldClaimConflict { .. }));
    }

    #[test]
    fn container_type_detection() {
        assert!(node("t1", "tab", None).is_container());
        assert!(!node("n1", "function", Some("t1")).is_container());
    }
}
