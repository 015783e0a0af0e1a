//! The minimal diff shape the verifier reports when two documents are not
//! fingerprint-equal: a minimal diff path of (container, node id, field).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffKind {
    /// A node present in the original document is missing from the rebuilt one.
    MissingNode,
    /// A node present in the rebuilt document has no counterpart in the original.
    ExtraNode,
    /// A field differs in value between the original and rebuilt node.
    FieldMismatch,
    /// Sibling order within a container differs.
    OrderMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDiff {
    pub container: Option<String>,
    pub node_id: String,
    pub field: Option<String>,
    pub kind: DiffKind,
}

impl DocumentDiff {
    pub fn missing_node(container: Option<String>, node_id: impl Into<String>) -> Self {
        Self { container, node_id: node_id.into(), field: None, kind: DiffKind::MissingNode }
    }

    pub fn extra_node(container: Option<String>, node_id: impl Into<String>) -> Self {
        Self { container, node_id: node_id.into(), field: None, kind: DiffKind::ExtraNode }
    }

    pub fn field_mismatch(
        container: Option<String>,
        node_id: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            container,
            node_id: node_id.into(),
            field: Some(field.into()),
            kind: DiffKind::FieldMismatch,
        }
    }

    pub fn order_mismatch(container: Option<String>, node_id: impl Into<String>) -> Self {
        Self { container, node_id: node_id.into(), field: None, kind: DiffKind::OrderMismatch }
    }
}
