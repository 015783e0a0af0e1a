//! Explode/rebuild of `function`-node code bodies.
//!
//! Claims `func`, `initialize`, and `finalize` on `function`-typed nodes and writes
//! them to `<id>.wrapped.js`, `<id>.initialize.js`, `<id>.finalize.js` respectively —
//! only the fields actually present on the node are claimed and written.

use async_trait::async_trait;
use flowsplit_core::{ClaimedFields, FlowsplitError, Node, NodeId};
use serde_json::Value;

use crate::context::NodeDirContext;
use crate::stages::{ExplodeOutcome, ExplodePlugin, RebuildPlugin};

pub const NAME: &str = "wrapped-function";
const TARGET_TYPE: &str = "function";
const FIELDS: [(&str, &str); 3] =
    [("func", ".wrapped.js"), ("initialize", ".initialize.js"), ("finalize", ".finalize.js")];

pub struct WrappedFunctionExplode;

#[async_trait]
impl ExplodePlugin for WrappedFunctionExplode {
    async fn explode_node(
        &self,
        node: &Node,
        dir: &NodeDirContext,
        claimed: &mut ClaimedFields,
    ) -> Result<ExplodeOutcome, FlowsplitError> {
        if node.node_type() != Some(TARGET_TYPE) {
            return Ok(ExplodeOutcome::default());
        }
        let mut outcome = ExplodeOutcome::default();
        for (field, extension) in FIELDS {
            let Some(text) = node.get(field).and_then(Value::as_str) else { continue };
            claimed.claim(field, NAME)?;
            outcome.files_created.push(dir.write_sibling(extension, text.as_bytes())?);
        }
        Ok(outcome)
    }
}

pub struct WrappedFunctionRebuild;

#[async_trait]
impl RebuildPlugin for WrappedFunctionRebuild {
    async fn rebuild_node(
        &self,
        dir: &NodeDirContext,
        _id: &NodeId,
        node: &mut Node,
    ) -> Result<(), FlowsplitError> {
        for (field, extension) in FIELDS {
            if let Some(bytes) = dir.read_sibling(extension)? {
                let text = String::from_utf8(bytes).map_err(|e| FlowsplitError::Plugin {
                    plugin: NAME.to_string(),
                    message: format!("{extension} is not valid UTF-8: {e}"),
                })?;
                node.insert(field, Value::String(text));
            }
        }
        Ok(())
    }

    fn can_infer_type(&self, dir: &NodeDirContext, _id: &NodeId) -> Option<String> {
        dir.sibling_exists(".wrapped.js").then(|| TARGET_TYPE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsplit_core::NodeId;
    use serde_json::json;

    #[tokio::test]
    async fn explode_then_rebuild_round_trips_function_body() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = NodeDirContext::new(dir.path().join("n1"), NodeId::from("n1"));

        let node = Node::new(
            json!({
                "id": "n1",
                "type": "function",
                "name": "double",
                "func": "msg.payload*=2;return msg;",
                "z": "t1"
            })
            .as_object()
            .unwrap()
            .clone(),
        );

        let mut claimed = ClaimedFields::new();
        let outcome = WrappedFunctionExplode.explode_node(&node, &ctx, &mut claimed).await.unwrap();
        assert_eq!(outcome.files_created.len(), 1);
        assert!(claimed.is_claimed("func"));

        let mut residual = node.clone();
        residual.take("func");
        WrappedFunctionRebuild.rebuild_node(&ctx, &NodeId::from("n1"), &mut residual).await.unwrap();
        assert_eq!(residual.get("func"), node.get("func"));
    }

    #[tokio::test]
    async fn ignores_non_function_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = NodeDirContext::new(dir.path().join("n2"), NodeId::from("n2"));
        let node = Node::new(json!({"id": "n2", "type": "debug", "z": "t1"}).as_object().unwrap().clone());
        let mut claimed = ClaimedFields::new();
        let outcome = WrappedFunctionExplode.explode_node(&node, &ctx, &mut claimed).await.unwrap();
        assert!(outcome.files_created.is_empty());
    }
}
