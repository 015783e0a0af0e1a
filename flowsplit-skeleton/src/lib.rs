//! # flowsplit-skeleton
//!
//! Owns the on-disk format of the hidden skeleton file: the structural summary — id,
//! type, container membership, sibling order, and structural fields (position,
//! wiring) — that the rebuild engine needs to reassemble a document from per-node
//! content files without the content files themselves carrying any of it.
//!
//! The skeleton is never the source of truth for node *content*; it only carries what
//! is needed to place a rebuilt node back where it came from.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use flowsplit_core::{FlowsplitError, Node, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const SKELETON_FILENAME: &str = ".flow-skeleton.json";

/// Structural record for a single node: everything the rebuild engine needs to place
/// it back correctly, but none of its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonEntry {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<String>,
    /// Position within `z`'s sibling order (or within the config-node list for entries
    /// with no `z`).
    pub order: usize,
    /// Position in the *original flat document array*, spanning containers.
    /// Concatenating containers in skeleton order and appending config nodes alone
    /// only guarantees per-container sibling order, not byte-identical top-level
    /// array order, and fingerprint equality does not resort the top-level array. The
    /// rebuild engine sorts its final assembly by this field to reproduce the exact
    /// original sequence — a total order that, by construction, also preserves every
    /// container's relative sibling order.
    #[serde(rename = "documentIndex")]
    pub document_index: usize,
    /// Everything structural beyond id/type/z/order: `x`, `y`, `wires`, and any other
    /// fields a plugin declared structural (`links`, `scope`, ...).
    #[serde(rename = "structuralFields")]
    pub structural_fields: Map<String, Value>,
}

/// The skeleton file's on-disk shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Skeleton {
    pub nodes: BTreeMap<String, SkeletonEntry>,
    #[serde(rename = "containerOrder")]
    pub container_order: Vec<String>,
    /// When this skeleton was last written. Informational only — nothing in the
    /// rebuild path reads it; it's here so an operator staring at the file can tell a
    /// stale skeleton from a fresh one without cross-referencing filesystem mtimes.
    #[serde(rename = "explodedAt", skip_serializing_if = "Option::is_none")]
    pub exploded_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// All container ids, in the order they were first encountered during explode.
    pub fn list_containers(&self) -> &[String] {
        &self.container_order
    }

    /// Node ids belonging to `container_id`, in sibling order. `None` returns config
    /// nodes (no `z`).
    pub fn nodes_in(&self, container_id: Option<&str>) -> Vec<&str> {
        let mut entries: Vec<(&str, usize)> = self
            .nodes
            .iter()
            .filter(|(_, e)| e.z.as_deref() == container_id)
            .map(|(id, e)| (id.as_str(), e.order))
            .collect();
        entries.sort_by_key(|(_, order)| *order);
        entries.into_iter().map(|(id, _)| id).collect()
    }

    pub fn structural_fields_for(&self, id: &str) -> Option<&Map<String, Value>> {
        self.nodes.get(id).map(|e| &e.structural_fields)
    }

    pub fn entry(&self, id: &str) -> Option<&SkeletonEntry> {
        self.nodes.get(id)
    }

    pub fn append(&mut self, id: impl Into<String>, entry: SkeletonEntry) {
        let id = id.into();
        if let Some(container) = &entry.z {
            if !self.container_order.contains(container) {
                self.container_order.push(container.clone());
            }
        }
        self.nodes.insert(id, entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<SkeletonEntry> {
        self.nodes.remove(id)
    }

    pub fn replace(&mut self, id: impl Into<String>, entry: SkeletonEntry) {
        self.append(id, entry);
    }

    /// Derive structural fields for a node: the caller decides which fields are
    /// "structural" (x, y, wires, and anything a plugin registered) versus content.
    pub fn structural_subset(node: &Node, structural_field_names: &[&str]) -> Map<String, Value> {
        let mut out = Map::new();
        for field in structural_field_names {
            if let Some(value) = node.get(field) {
                out.insert(field.to_string(), value.clone());
            }
        }
        out
    }

    pub fn path_in(tree_root: &Path) -> PathBuf {
        tree_root.join(SKELETON_FILENAME)
    }

    /// Load the skeleton from `tree_root/.flow-skeleton.json`. Rebuild without a
    /// skeleton would lose sibling order and wiring, so a missing file is fatal.
    pub fn load(tree_root: &Path) -> Result<Self, FlowsplitError> {
        let path = Self::path_in(tree_root);
        if !path.exists() {
            return Err(FlowsplitError::SkeletonMissing(path));
        }
        let bytes = fs::read(&path).map_err(|e| FlowsplitError::io(&path, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FlowsplitError::Config(format!("malformed skeleton at {path:?}: {e}")))
    }

    /// Atomically persist the skeleton: write to a sibling temp file, fsync, then
    /// rename over the target. Readers never observe a partially written skeleton.
    pub fn save(&self, tree_root: &Path) -> Result<(), FlowsplitError> {
        fs::create_dir_all(tree_root).map_err(|e| FlowsplitError::io(tree_root, e))?;
        let path = Self::path_in(tree_root);
        let tmp_path = path.with_extension("json.tmp");
        let mut stamped = self.clone();
        stamped.exploded_at = Some(chrono::Utc::now());
        let bytes =
            serde_json::to_vec_pretty(&stamped).map_err(|e| FlowsplitError::Config(e.to_string()))?;

        let mut file =
            fs::File::create(&tmp_path).map_err(|e| FlowsplitError::io(&tmp_path, e))?;
        use std::io::Write;
        file.write_all(&bytes).map_err(|e| FlowsplitError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| FlowsplitError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| FlowsplitError::io(&path, e))?;
        debug!(path = %path.display(), nodes = self.nodes.len(), "skeleton written");
        Ok(())
    }
}

/// Given a document-derived id lookup, find the container a node belongs to from the
/// skeleton alone (used by the rebuild engine to place a node it read off disk).
pub fn container_of(skeleton: &Skeleton, id: &NodeId) -> Option<String> {
    skeleton.nodes.get(&id.0).and_then(|e| e.z.clone())
}
