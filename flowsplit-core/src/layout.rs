//! Tree layout: where a node's directory lives, given its container membership.
//!
//! - A partitioning container (`tab`/`subflow`) owns a top-level directory named after
//!   its own id; its own residual file sits flattened directly in that directory
//!   rather than in a further nested `<dir>/<id>/` (it would otherwise be its own
//!   parent).
//! - A non-container node with a `z` gets `<container-dir>/<id>/`.
//! - A true config node (no `z`, not itself a container) gets `config/<id>/` at the
//!   tree root — a reserved directory, kept separate from containers so the root stays
//!   readable.
//!
//! Shared between the explode and rebuild engines so both agree on where a node
//! lives without either depending on the other.

use std::path::{Path, PathBuf};

use crate::model::Node;

pub const CONFIG_DIR: &str = "config";
pub const ORPHANED_DIR: &str = ".orphaned";
pub const QUARANTINE_DIR: &str = ".quarantine";

const PARTITIONING_CONTAINER_TYPES: [&str; 2] = ["tab", "subflow"];

pub fn is_partitioning_type(node_type: &str) -> bool {
    PARTITIONING_CONTAINER_TYPES.contains(&node_type)
}

pub fn partitions_tree(node: &Node) -> bool {
    matches!(node.node_type(), Some(t) if is_partitioning_type(t))
}

/// Structural fields every node may carry: position, wiring, and group membership.
/// Content fields never appear here — they're either claimed by a plugin or fall
/// through to the per-node residual.
pub const STRUCTURAL_FIELD_NAMES: [&str; 6] = ["x", "y", "wires", "links", "scope", "nodes"];

/// Sanitize a node id for use as a single path component. Node-RED ids are normally
/// hex or (after the id-normalizer plugin) slugs, but nothing stops a hand-edited
/// document from carrying something else.
pub fn sanitize_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Directory that should hold `node`'s own residual/claimed-field files.
pub fn node_dir(tree_root: &Path, node: &Node) -> PathBuf {
    let id = node.id().map(|i| i.0).unwrap_or_default();
    let id_component = sanitize_component(&id);

    match node.parent() {
        Some(parent) => tree_root.join(sanitize_component(&parent.0)).join(id_component),
        None if partitions_tree(node) => tree_root.join(id_component),
        None => tree_root.join(CONFIG_DIR).join(id_component),
    }
}

/// Directory for a node given only its id and z (used at rebuild time, before the
/// node's own type is known).
pub fn node_dir_for(tree_root: &Path, id: &str, z: Option<&str>, is_partitioning_container: bool) -> PathBuf {
    let id_component = sanitize_component(id);
    match z {
        Some(parent) => tree_root.join(sanitize_component(parent)).join(id_component),
        None if is_partitioning_container => tree_root.join(id_component),
        None => tree_root.join(CONFIG_DIR).join(id_component),
    }
}
