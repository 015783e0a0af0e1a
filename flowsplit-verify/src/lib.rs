//! # flowsplit-verify
//!
//! Round-trip harness: `Document₀ → Explode → Rebuild → Document₁`, compared under
//! `Fingerprint`. Used as an offline correctness check (a CLI subcommand or a CI job),
//! never by the watch orchestrator's own reaction loop.
//!
//! The comparison itself never looks at sibling files or plugin output directly — it
//! only fingerprints the two `Document` values, so whatever a formatting plugin does to
//! a node's on-disk representation is irrelevant as long as rebuild reconstructs the
//! same field values. A plugin that genuinely fails to round-trip its own fields shows
//! up as an ordinary field mismatch, not a special "formatting" case.

use std::path::Path;

use flowsplit_core::diff::DocumentDiff;
use flowsplit_core::{Document, Fingerprint, FlowsplitConfig, FlowsplitError, Node, NodeId};
use flowsplit_explode::ExplodeEngine;
use flowsplit_plugins::PluginHost;
use flowsplit_rebuild::RebuildEngine;
use tracing::info;

/// Outcome of a single round-trip verification.
#[derive(Debug)]
pub struct VerifyReport {
    pub equal: bool,
    pub diffs: Vec<DocumentDiff>,
}

/// Runs a document through explode and rebuild in a scratch tree rooted at
/// `tree_root`, and reports whether the result is fingerprint-equal to the input.
///
/// `tree_root` is used as working storage; it is created if missing and left
/// populated with the exploded tree afterwards so a caller can inspect it. The same
/// `PluginHost` is used for both passes, matching how the watch orchestrator always
/// explodes and rebuilds with one live plugin set rather than a reduced one — a
/// formatting plugin that isn't a fixpoint on its own fields is a real bug, not
/// something the verifier should paper over.
pub async fn verify_round_trip(
    host: PluginHost,
    config: FlowsplitConfig,
    document: Document,
    tree_root: &Path,
    document_path: &Path,
) -> Result<VerifyReport, FlowsplitError> {
    let explode = ExplodeEngine::new(host.clone(), config.clone());
    let explode_report = explode.explode(document.clone(), tree_root, document_path).await?;

    let report = rebuild_and_diff(host, config, &document, tree_root, document_path).await?;

    info!(
        equal = report.equal,
        diffs = report.diffs.len(),
        unstable_nodes = explode_report.unstable_nodes.len(),
        "round-trip verification complete"
    );

    Ok(report)
}

/// Rebuilds whatever tree already sits at `tree_root` and diffs the result against
/// `original`, without re-exploding first. Used to check a tree that may have since
/// been hand-edited, as well as by `verify_round_trip` itself.
pub async fn rebuild_and_diff(
    host: PluginHost,
    config: FlowsplitConfig,
    original: &Document,
    tree_root: &Path,
    document_path: &Path,
) -> Result<VerifyReport, FlowsplitError> {
    let rebuild = RebuildEngine::new(host, config);
    let rebuild_report = rebuild.rebuild(tree_root, document_path, true).await?;
    let rebuilt = rebuild_report.document;

    let equal = flowsplit_core::fingerprint::documents_equal(original, &rebuilt);
    let diffs = if equal { Vec::new() } else { diff_documents(original, &rebuilt) };

    info!(
        equal,
        diffs = diffs.len(),
        new_nodes = rebuild_report.new_nodes.len(),
        missing_nodes = rebuild_report.missing_nodes.len(),
        "rebuild diff complete"
    );

    Ok(VerifyReport { equal, diffs })
}

/// Build the minimal diff between two documents: missing/extra nodes by id, then
/// field-level and order mismatches for every id present in both.
fn diff_documents(original: &Document, rebuilt: &Document) -> Vec<DocumentDiff> {
    let mut diffs = Vec::new();

    let original_ids: Vec<&NodeId> = original.nodes().iter().filter_map(|n| n.id()).collect();
    let rebuilt_ids: Vec<&NodeId> = rebuilt.nodes().iter().filter_map(|n| n.id()).collect();

    for node in original.iter() {
        let Some(id) = node.id() else { continue };
        if rebuilt.find(id).is_none() {
            diffs.push(DocumentDiff::missing_node(container_of(node), id.0.clone()));
        }
    }
    for node in rebuilt.iter() {
        let Some(id) = node.id() else { continue };
        if original.find(id).is_none() {
            diffs.push(DocumentDiff::extra_node(container_of(node), id.0.clone()));
        }
    }

    for node in original.iter() {
        let Some(id) = node.id() else { continue };
        let Some(other) = rebuilt.find(id) else { continue };
        if Fingerprint::of_node(node) == Fingerprint::of_node(other) {
            continue;
        }
        diffs.extend(diff_fields(node, other));
    }

    let original_shared: Vec<&str> =
        original_ids.iter().map(|id| id.0.as_str()).filter(|id| rebuilt_ids.iter().any(|r| r.0 == *id)).collect();
    let rebuilt_shared: Vec<&str> =
        rebuilt_ids.iter().map(|id| id.0.as_str()).filter(|id| original_ids.iter().any(|o| o.0 == *id)).collect();
    if original_shared != rebuilt_shared {
        if let Some(first) = original_shared.first() {
            diffs.push(DocumentDiff::order_mismatch(
                original.find(&NodeId::from(*first)).and_then(container_of),
                first.to_string(),
            ));
        }
    }

    diffs
}

fn container_of(node: &Node) -> Option<String> {
    node.parent().map(|id| id.0.clone())
}

fn diff_fields(original: &Node, rebuilt: &Node) -> Vec<DocumentDiff> {
    let mut diffs = Vec::new();
    let id = original.id().map(|id| id.0.clone()).unwrap_or_default();
    let container = container_of(original);

    let mut keys: Vec<&String> = original.0.keys().chain(rebuilt.0.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let a = original.0.get(key);
        let b = rebuilt.0.get(key);
        let equal = match (a, b) {
            (Some(a), Some(b)) => {
                flowsplit_core::fingerprint::canonicalize(a) == flowsplit_core::fingerprint::canonicalize(b)
            }
            (None, None) => true,
            _ => false,
        };
        if !equal {
            diffs.push(DocumentDiff::field_mismatch(container.clone(), id.clone(), key.clone()));
        }
    }

    diffs
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

    fn host() -> PluginHost {
        PluginHost::new(flowsplit_plugins::builtin::default_plugins(), &PluginSelection::all())
    }

    #[tokio::test]
    async fn a_stable_flow_round_trips_with_no_diffs() {
        let dir = tempfile::tempdir().unwrap();
        let doc_path = dir.path().join("flow.json");
        let document = Document::from_nodes(vec![
            node("t1", "tab", None, json!({"label": "Flow 1"})),
            node("n1", "function", Some("t1"), json!({"x": 10, "y": 20, "wires": [[]], "func": "return msg;"})),
        ])
        .unwrap();

        let report =
            verify_round_trip(host(), FlowsplitConfig::default(), document, dir.path(), &doc_path).await.unwrap();

        assert!(report.equal, "diffs: {:?}", report.diffs);
        assert!(report.diffs.is_empty());
    }

    #[tokio::test]
    async fn a_locally_edited_tree_reports_a_field_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let doc_path = dir.path().join("flow.json");
        let document = Document::from_nodes(vec![
            node("t1", "tab", None, json!({"label": "Flow 1"})),
            node("n1", "function", Some("t1"), json!({"x": 10, "y": 20, "wires": [[]], "func": "return msg;"})),
        ])
        .unwrap();

        let explode = ExplodeEngine::new(host(), FlowsplitConfig::default());
        explode.explode(document.clone(), dir.path(), &doc_path).await.unwrap();

        let residual_path = dir.path().join("t1").join("n1").join("n1.json");
        let mut residual: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&residual_path).unwrap()).unwrap();
        residual["x"] = json!(999);
        std::fs::write(&residual_path, serde_json::to_vec(&residual).unwrap()).unwrap();

        let report = rebuild_and_diff(host(), FlowsplitConfig::default(), &document, dir.path(), &doc_path)
            .await
            .unwrap();

        assert!(!report.equal);
        assert!(report
            .diffs
            .iter()
            .any(|d| d.node_id == "n1" && d.field.as_deref() == Some("x")));
    }
}
