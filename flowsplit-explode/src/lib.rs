//! # flowsplit-explode
//!
//! Turns a flat flow document into a tree of per-node directories plus a hidden
//! skeleton file recording everything needed to put it back together.
//!
//! The engine does four things per run: runs whole-document plugins, writes one
//! directory per node (residual content plus whatever files the active explode
//! plugins produce), persists the skeleton, and reconciles against whatever skeleton
//! was already on disk to find and handle orphaned node directories.

pub mod layout;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use flowsplit_core::{Document, Fingerprint, FlowsplitConfig, FlowsplitError, Node, NodeId};
use flowsplit_plugins::{NodeDirContext, PluginHost};
use flowsplit_skeleton::{Skeleton, SkeletonEntry};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

/// Outcome of exploding a single node: what got written, whether the node round-trips
/// cleanly through its own freshly exploded files, and any isolated plugin errors.
#[derive(Debug)]
struct NodeOutcome {
    order: usize,
    document_index: usize,
    z: Option<String>,
    node_type: String,
    structural_fields: serde_json::Map<String, serde_json::Value>,
    files_created: Vec<PathBuf>,
    errors: Vec<FlowsplitError>,
    stable: bool,
}

/// Everything the caller needs to know about one explode run.
#[derive(Debug, Default)]
pub struct ExplodeReport {
    pub skeleton: Skeleton,
    pub files_written: Vec<PathBuf>,
    pub unstable_nodes: Vec<NodeId>,
    pub errors: Vec<FlowsplitError>,
    pub orphans_quarantined: Vec<PathBuf>,
    pub orphans_deleted: Vec<NodeId>,
    pub pre_explode_modified: bool,
    pub post_explode_modified: bool,
    /// Names of plugins that reported a modification in pre- or post-explode, for the
    /// watch orchestrator's oscillation diagnostics.
    pub modified_by: Vec<String>,
}

pub struct ExplodeEngine {
    host: Arc<PluginHost>,
    config: FlowsplitConfig,
}

impl ExplodeEngine {
    pub fn new(host: PluginHost, config: FlowsplitConfig) -> Self {
        Self { host: Arc::new(host), config }
    }

    /// Explode `document` into `tree_root`. `document_path` is passed through to
    /// post-explode plugins unchanged; the engine itself never reads or writes it.
    pub async fn explode(
        &self,
        mut document: Document,
        tree_root: &Path,
        document_path: &Path,
    ) -> Result<ExplodeReport, FlowsplitError> {
        fs::create_dir_all(tree_root).map_err(|e| FlowsplitError::io(tree_root, e))?;

        let pre_report = self.host.run_pre_explode(&mut document).await;

        let previous_skeleton = match Skeleton::load(tree_root) {
            Ok(s) => Some(s),
            Err(FlowsplitError::SkeletonMissing(_)) => None,
            Err(e) => return Err(e),
        };

        let groups = document.group_by_container();
        let results: Arc<DashMap<String, NodeOutcome>> = Arc::new(DashMap::new());

        for (container, indices) in groups {
            let container_key = container.as_ref().map(|id| id.0.clone());
            let nodes: Vec<(usize, usize, Node)> = indices
                .into_iter()
                .enumerate()
                .map(|(order, doc_index)| (order, doc_index, document.nodes()[doc_index].clone()))
                .collect();

            if nodes.len() > self.config.parallel_threshold {
                let host = Arc::clone(&self.host);
                let results = Arc::clone(&results);
                let tree_root = tree_root.to_path_buf();
                stream::iter(nodes)
                    .for_each_concurrent(Some(self.config.worker_pool_size), |(order, doc_index, node)| {
                        let host = Arc::clone(&host);
                        let results = Arc::clone(&results);
                        let tree_root = tree_root.clone();
                        let container_key = container_key.clone();
                        async move {
                            let id = node.id().expect("document guarantees every node has an id");
                            let outcome = process_node(&host, &tree_root, &node, order, doc_index, container_key).await;
                            results.insert(id.0, outcome);
                        }
                    })
                    .await;
            } else {
                for (order, doc_index, node) in nodes {
                    let id = node.id().expect("document guarantees every node has an id");
                    let outcome =
                        process_node(&self.host, tree_root, &node, order, doc_index, container_key.clone()).await;
                    results.insert(id.0, outcome);
                }
            }
        }

        let mut skeleton = Skeleton::new();
        let mut files_written = Vec::new();
        let mut unstable_nodes = Vec::new();
        let mut errors = Vec::new();

        // Deterministic order for the report: walk the document itself, not the
        // concurrent map, so repeated runs produce identical file-listing order.
        for node in document.iter() {
            let Some(id) = node.id() else { continue };
            let Some((_, outcome)) = results.remove(&id.0) else { continue };
            if !outcome.stable {
                unstable_nodes.push(id.clone());
            }
            files_written.extend(outcome.files_created.iter().cloned());
            errors.extend(outcome.errors.into_iter());
            skeleton.append(
                id.0.clone(),
                SkeletonEntry {
                    node_type: outcome.node_type,
                    z: outcome.z,
                    order: outcome.order,
                    document_index: outcome.document_index,
                    structural_fields: outcome.structural_fields,
                },
            );
        }

        let (orphans_quarantined, orphans_deleted) =
            self.reconcile_orphans(tree_root, previous_skeleton.as_ref(), &skeleton)?;

        skeleton.save(tree_root)?;
        files_written.push(Skeleton::path_in(tree_root));

        let post_report = self.host.run_post_explode(tree_root, document_path).await;

        let mut modified_by = pre_report.modified_by.clone();
        modified_by.extend(post_report.modified_by.clone());

        info!(
            nodes = skeleton.nodes.len(),
            unstable = unstable_nodes.len(),
            orphans_quarantined = orphans_quarantined.len(),
            orphans_deleted = orphans_deleted.len(),
            "explode complete"
        );

        Ok(ExplodeReport {
            skeleton,
            files_written,
            unstable_nodes,
            errors,
            orphans_quarantined,
            orphans_deleted,
            pre_explode_modified: pre_report.modified,
            post_explode_modified: post_report.modified,
            modified_by,
        })
    }

    /// Diff the previous skeleton (if any) against the one just built; move or delete
    /// directories for node ids that no longer exist, per the configured policy.
    fn reconcile_orphans(
        &self,
        tree_root: &Path,
        previous: Option<&Skeleton>,
        current: &Skeleton,
    ) -> Result<(Vec<PathBuf>, Vec<NodeId>), FlowsplitError> {
        let mut quarantined = Vec::new();
        let mut deleted = Vec::new();
        let Some(previous) = previous else {
            return Ok((quarantined, deleted));
        };

        for (id, entry) in &previous.nodes {
            if current.nodes.contains_key(id) {
                continue;
            }
            let old_dir = layout::node_dir_for(
                tree_root,
                id,
                entry.z.as_deref(),
                layout::is_partitioning_type(&entry.node_type),
            );
            if !old_dir.exists() {
                continue;
            }
            match self.config.orphan_policy {
                flowsplit_core::config::OrphanPolicy::Delete => {
                    fs::remove_dir_all(&old_dir).map_err(|e| FlowsplitError::io(&old_dir, e))?;
                    deleted.push(NodeId::from(id.clone()));
                }
                flowsplit_core::config::OrphanPolicy::Quarantine => {
                    let relative = old_dir.strip_prefix(tree_root).unwrap_or(&old_dir);
                    let target = tree_root.join(layout::ORPHANED_DIR).join(relative);
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).map_err(|e| FlowsplitError::io(parent, e))?;
                    }
                    fs::rename(&old_dir, &target).map_err(|e| FlowsplitError::io(&target, e))?;
                    warn!(id = %id, target = %target.display(), "node removed from document, directory quarantined");
                    quarantined.push(target);
                }
            }
        }

        Ok((quarantined, deleted))
    }
}

async fn process_node(
    host: &PluginHost,
    tree_root: &Path,
    node: &Node,
    order: usize,
    document_index: usize,
    container: Option<String>,
) -> NodeOutcome {
    let id = node.id().expect("document guarantees every node has an id");
    let node_type = node.node_type().unwrap_or_default().to_string();
    let structural_fields = Skeleton::structural_subset(node, &layout::STRUCTURAL_FIELD_NAMES);

    let dir = layout::node_dir(tree_root, node);
    let ctx = NodeDirContext::new(dir.clone(), id.clone());

    let explode_result = host.run_explode_node(node, &ctx).await;
    let mut files_created = explode_result.files_created.clone();
    let mut errors = explode_result.errors;

    let mut residual = node.0.clone();
    for field in layout::STRUCTURAL_FIELD_NAMES {
        residual.remove(field);
    }
    let claimed: Vec<String> = explode_result.claimed.claimed_fields().map(str::to_string).collect();
    for field in &claimed {
        residual.remove(field);
    }

    let residual_path = ctx.residual_path();
    match write_residual(&dir, &residual_path, &residual) {
        Ok(()) => files_created.push(residual_path),
        Err(e) => errors.push(e),
    }

    let mut rebuilt = Node::new(residual.clone());
    for (key, value) in &structural_fields {
        rebuilt.insert(key.clone(), value.clone());
    }
    let rebuild_result = host.run_rebuild_node(&ctx, &id, &mut rebuilt).await;
    let stable = rebuild_result.errors.is_empty() && Fingerprint::of_node(node) == Fingerprint::of_node(&rebuilt);

    NodeOutcome {
        order,
        document_index,
        z: container,
        node_type,
        structural_fields,
        files_created,
        errors,
        stable,
    }
}

fn write_residual(
    dir: &Path,
    path: &Path,
    residual: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), FlowsplitError> {
    fs::create_dir_all(dir).map_err(|e| FlowsplitError::io(dir, e))?;
    let bytes = serde_json::to_vec_pretty(residual).map_err(|e| FlowsplitError::Config(e.to_string()))?;
    fs::write(path, &bytes).map_err(|e| FlowsplitError::io(path, e))
}

/// Convenience used by the watch orchestrator: build a fresh host from the default
/// plugin set and an explicit selection.
pub fn default_engine(config: FlowsplitConfig, selection: &flowsplit_plugins::PluginSelection) -> ExplodeEngine {
    let host = PluginHost::new(flowsplit_plugins::builtin::default_plugins(), selection);
    ExplodeEngine::new(host, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsplit_plugins::PluginSelection;
    use serde_json::json;

    fn node(id: &str, typ: &str, z: Option<&str>, extra: serde_json::Value) -> Node {
        let mut map = extra.as_object().cloned().unwrap_or_default();
        map.insert("id".into(), json!(id));
        map.insert("type".into(), json!(typ));
        if let Some(z) = z {
            map.insert("z".into(), json!(z));
        }
        Node::new(map)
    }

    #[tokio::test]
    async fn explodes_a_small_flow_into_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = vec![
            node("t1", "tab", None, json!({"label": "Flow 1"})),
            node("n1", "function", Some("t1"), json!({"x": 10, "y": 20, "wires": [[]], "func": "return msg;"})),
            node("n2", "debug", Some("t1"), json!({"x": 30, "y": 20, "wires": [[]]})),
            node("cfg1", "mqtt-broker", None, json!({"broker": "localhost"})),
        ];
        let document = Document::from_nodes(nodes).unwrap();

        let engine = default_engine(FlowsplitConfig::default(), &PluginSelection::all());
        let report = engine
            .explode(document, dir.path(), &dir.path().join("flow.json"))
            .await
            .unwrap();

        assert_eq!(report.skeleton.nodes.len(), 4);
        assert!(report.unstable_nodes.is_empty(), "unstable: {:?}", report.unstable_nodes);
        assert!(dir.path().join("t1").join("n1").join("n1.wrapped.js").is_file());
        assert!(dir.path().join("t1").join("n1").join("n1.json").is_file());
        assert!(dir.path().join("config").join("cfg1").join("cfg1.json").is_file());
        assert!(Skeleton::path_in(dir.path()).is_file());
    }

    #[tokio::test]
    async fn removed_node_is_quarantined_on_next_explode() {
        let dir = tempfile::tempdir().unwrap();
        let engine = default_engine(FlowsplitConfig::default(), &PluginSelection::all());

        let first = Document::from_nodes(vec![
            node("t1", "tab", None, json!({})),
            node("n1", "function", Some("t1"), json!({"x": 1, "y": 1, "wires": [[]]})),
        ])
        .unwrap();
        engine.explode(first, dir.path(), &dir.path().join("flow.json")).await.unwrap();
        assert!(dir.path().join("t1").join("n1").join("n1.json").is_file());

        let second = Document::from_nodes(vec![node("t1", "tab", None, json!({}))]).unwrap();
        let report = engine.explode(second, dir.path(), &dir.path().join("flow.json")).await.unwrap();

        assert_eq!(report.orphans_quarantined.len(), 1);
        assert!(!dir.path().join("t1").join("n1").exists());
        assert!(dir.path().join(layout::ORPHANED_DIR).join("t1").join("n1").join("n1.json").is_file());
    }
}
