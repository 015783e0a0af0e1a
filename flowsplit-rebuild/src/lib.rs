//! # flowsplit-rebuild
//!
//! Reassembles a flat document from a tree of node directories and the skeleton left
//! behind by the explode engine. Walks the tree looking for node directories the
//! skeleton doesn't know about (hand-added by a local edit) as well as checking that
//! every directory the skeleton does know about still exists on disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowsplit_core::{layout, Document, FlowsplitConfig, FlowsplitError, Node, NodeId};
use flowsplit_plugins::{NodeDirContext, PluginHost};
use flowsplit_skeleton::Skeleton;
use tracing::warn;

/// Everything the caller needs to know about one rebuild run.
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub document: Document,
    pub new_nodes: Vec<NodeId>,
    pub missing_nodes: Vec<NodeId>,
    pub quarantined: Vec<PathBuf>,
    pub errors: Vec<FlowsplitError>,
    pub pre_rebuild_continued_from_explode: bool,
    pub post_rebuild_modified: bool,
    pub post_rebuild_modified_by: Vec<String>,
}

pub struct RebuildEngine {
    host: Arc<PluginHost>,
    config: FlowsplitConfig,
}

impl RebuildEngine {
    pub fn new(host: PluginHost, config: FlowsplitConfig) -> Self {
        Self { host: Arc::new(host), config }
    }

    /// Rebuild the document rooted at `tree_root`. `continued_from_explode` tells
    /// pre-rebuild plugins whether this call immediately follows an explode in the
    /// same process (letting them skip work an explode already did).
    pub async fn rebuild(
        &self,
        tree_root: &Path,
        document_path: &Path,
        continued_from_explode: bool,
    ) -> Result<RebuildReport, FlowsplitError> {
        let skeleton = Skeleton::load(tree_root)?;

        self.host.run_pre_rebuild(tree_root, continued_from_explode).await;

        let mut candidates = Vec::new();
        collect_candidate_dirs(tree_root, &mut candidates)
            .map_err(|e| FlowsplitError::io(tree_root, e))?;

        let mut nodes: Vec<(usize, Node)> = Vec::new();
        let mut new_nodes = Vec::new();
        let mut missing_nodes = Vec::new();
        let mut quarantined = Vec::new();
        let mut errors = Vec::new();
        let mut next_document_index =
            skeleton.nodes.values().map(|e| e.document_index).max().map(|m| m + 1).unwrap_or(0);

        let known_dirs: HashMap<PathBuf, String> = skeleton
            .nodes
            .iter()
            .map(|(id, entry)| {
                let dir = layout::node_dir_for(
                    tree_root,
                    id,
                    entry.z.as_deref(),
                    layout::is_partitioning_type(&entry.node_type),
                );
                (dir, id.clone())
            })
            .collect();

        for (id, entry) in &skeleton.nodes {
            let dir = layout::node_dir_for(
                tree_root,
                id,
                entry.z.as_deref(),
                layout::is_partitioning_type(&entry.node_type),
            );
            let ctx = NodeDirContext::new(dir.clone(), NodeId::from(id.clone()));
            if !ctx.residual_path().is_file() {
                missing_nodes.push(NodeId::from(id.clone()));
                if self.config.tolerant_rebuild {
                    warn!(id = %id, "node missing from disk, dropped (tolerant_rebuild)");
                    continue;
                }
                return Err(FlowsplitError::Config(format!(
                    "node '{id}' present in skeleton but missing from disk at {dir:?}"
                )));
            }

            let mut node = read_residual(&ctx)?;
            for (key, value) in &entry.structural_fields {
                node.insert(key.clone(), value.clone());
            }
            let rebuild_result = self.host.run_rebuild_node(&ctx, &NodeId::from(id.clone()), &mut node).await;
            errors.extend(rebuild_result.errors);

            nodes.push((entry.document_index, node));
        }

        for dir in candidates {
            if known_dirs.contains_key(&dir) {
                continue;
            }
            let id_str = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let id = NodeId::from(id_str.clone());
            let ctx = NodeDirContext::new(dir.clone(), id.clone());

            let mut node = match read_residual(&ctx) {
                Ok(node) => node,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let rebuild_result = self.host.run_rebuild_node(&ctx, &id, &mut node).await;
            errors.extend(rebuild_result.errors);

            if node.node_type().is_none() {
                if let Some(inferred) = self.host.infer_node_type(&ctx, &id) {
                    node.insert("type", serde_json::Value::String(inferred));
                }
            }

            let parent = dir.parent().unwrap_or(tree_root);
            let z = if parent == tree_root.join(layout::CONFIG_DIR) || parent == tree_root {
                None
            } else {
                parent.file_name().map(|n| n.to_string_lossy().to_string())
            };
            if let Some(parent) = &z {
                node.insert("z", serde_json::Value::String(parent.clone()));
            }
            if node.id().is_none() {
                node.insert("id", serde_json::Value::String(id_str.clone()));
            }

            if node.node_type().is_none() {
                warn!(id = %id, dir = %dir.display(), "new node directory has no inferable type, quarantined");
                let target = quarantine_new_node(tree_root, &dir, &id_str)?;
                quarantined.push(target);
                continue;
            }

            new_nodes.push(id.clone());
            nodes.push((next_document_index, node));
            next_document_index += 1;
        }

        nodes.sort_by_key(|(idx, _)| *idx);
        let document = Document::from_nodes(nodes.into_iter().map(|(_, n)| n).collect())?;

        let post_report = self.host.run_post_rebuild(document_path).await;

        Ok(RebuildReport {
            document,
            new_nodes,
            missing_nodes,
            quarantined,
            errors,
            pre_rebuild_continued_from_explode: continued_from_explode,
            post_rebuild_modified: post_report.modified,
            post_rebuild_modified_by: post_report.modified_by,
        })
    }
}

fn read_residual(ctx: &NodeDirContext) -> Result<Node, FlowsplitError> {
    let path = ctx.residual_path();
    let bytes = fs::read(&path).map_err(|e| FlowsplitError::io(&path, e))?;
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)
        .map_err(|e| FlowsplitError::Config(format!("malformed residual at {path:?}: {e}")))?;
    Ok(Node::new(map))
}

/// Move an undiscoverable new node directory under `.quarantine/<id>/`. A prior
/// quarantine of the same id (the operator keeps re-adding a file the plugins can
/// never type) is never clobbered — the new one gets a synthetic suffix instead.
fn quarantine_new_node(tree_root: &Path, dir: &Path, id: &str) -> Result<PathBuf, FlowsplitError> {
    let quarantine_root = tree_root.join(layout::QUARANTINE_DIR);
    let mut target = quarantine_root.join(id);
    if target.exists() {
        target = quarantine_root.join(format!("{id}-{}", uuid::Uuid::new_v4()));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| FlowsplitError::io(parent, e))?;
    }
    fs::rename(dir, &target).map_err(|e| FlowsplitError::io(&target, e))?;
    Ok(target)
}

/// Walk the tree looking for directories whose own name matches a residual file
/// inside them (`<dir>/<dir-name>.json`) — the on-disk signature of a node directory,
/// whether or not the skeleton already knows about it.
fn collect_candidate_dirs(root: &Path, acc: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == layout::ORPHANED_DIR || name == layout::QUARANTINE_DIR {
            continue;
        }
        let residual = path.join(format!("{name}.json"));
        if residual.is_file() {
            acc.push(path.clone());
        }
        collect_candidate_dirs(&path, acc)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsplit_explode::{default_engine, ExplodeEngine};
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

    fn engine() -> (ExplodeEngine, RebuildEngine) {
        let config = FlowsplitConfig::default();
        let explode = default_engine(config.clone(), &PluginSelection::all());
        let host = PluginHost::new(flowsplit_plugins::builtin::default_plugins(), &PluginSelection::all());
        (explode, RebuildEngine::new(host, config))
    }

    #[tokio::test]
    async fn round_trips_a_small_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (explode, rebuild) = engine();
        let doc_path = dir.path().join("flow.json");

        let nodes = vec![
            node("t1", "tab", None, json!({"label": "Flow 1"})),
            node("n1", "function", Some("t1"), json!({"x": 10, "y": 20, "wires": [[]], "func": "return msg;"})),
            node("cfg1", "mqtt-broker", None, json!({"broker": "localhost"})),
        ];
        let original = Document::from_nodes(nodes).unwrap();

        explode.explode(original.clone(), dir.path(), &doc_path).await.unwrap();
        let report = rebuild.rebuild(dir.path(), &doc_path, true).await.unwrap();

        assert!(report.missing_nodes.is_empty());
        assert!(report.new_nodes.is_empty());
        assert_eq!(report.document.len(), original.len());
        assert!(flowsplit_core::fingerprint::documents_equal(&original, &report.document));
    }

    #[tokio::test]
    async fn hand_added_node_directory_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let (explode, rebuild) = engine();
        let doc_path = dir.path().join("flow.json");

        let original = Document::from_nodes(vec![node("t1", "tab", None, json!({}))]).unwrap();
        explode.explode(original, dir.path(), &doc_path).await.unwrap();

        let new_node_dir = dir.path().join("t1").join("n-new");
        std::fs::create_dir_all(&new_node_dir).unwrap();
        std::fs::write(
            new_node_dir.join("n-new.json"),
            serde_json::to_vec(&json!({"id": "n-new", "type": "debug"})).unwrap(),
        )
        .unwrap();

        let report = rebuild.rebuild(dir.path(), &doc_path, false).await.unwrap();
        assert_eq!(report.new_nodes, vec![NodeId::from("n-new")]);
        assert!(report.document.find(&NodeId::from("n-new")).is_some());
    }

    #[tokio::test]
    async fn missing_node_is_fatal_unless_tolerant() {
        let dir = tempfile::tempdir().unwrap();
        let (explode, _rebuild) = engine();
        let doc_path = dir.path().join("flow.json");

        let original = Document::from_nodes(vec![
            node("t1", "tab", None, json!({})),
            node("n1", "function", Some("t1"), json!({"x": 1, "y": 1, "wires": [[]]})),
        ])
        .unwrap();
        explode.explode(original, dir.path(), &doc_path).await.unwrap();
        std::fs::remove_dir_all(dir.path().join("t1").join("n1")).unwrap();

        let host = PluginHost::new(flowsplit_plugins::builtin::default_plugins(), &PluginSelection::all());
        let strict = RebuildEngine::new(host, FlowsplitConfig::default());
        assert!(strict.rebuild(dir.path(), &doc_path, false).await.is_err());

        let mut tolerant_config = FlowsplitConfig::default();
        tolerant_config.tolerant_rebuild = true;
        let host = PluginHost::new(flowsplit_plugins::builtin::default_plugins(), &PluginSelection::all());
        let tolerant = RebuildEngine::new(host, tolerant_config);
        let report = tolerant.rebuild(dir.path(), &doc_path, false).await.unwrap();
        assert_eq!(report.missing_nodes, vec![NodeId::from("n1")]);
        assert!(report.document.find(&NodeId::from("n1")).is_none());
    }
}
