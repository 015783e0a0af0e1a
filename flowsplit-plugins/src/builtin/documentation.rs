//! Explode/rebuild of free-text documentation: claims a node's `info` field and
//! writes it to `<id>.md`.

use async_trait::async_trait;
use flowsplit_core::{ClaimedFields, FlowsplitError, Node, NodeId};
use serde_json::Value;

use crate::context::NodeDirContext;
use crate::stages::{ExplodeOutcome, ExplodePlugin, RebuildPlugin};

pub const NAME: &str = "documentation";
const EXTENSION: &str = ".md";

pub struct DocumentationExplode;

#[async_trait]
impl ExplodePlugin for DocumentationExplode {
    async fn explode_node(
        &self,
        node: &Node,
        dir: &NodeDirContext,
        claimed: &mut ClaimedFields,
    ) -> Result<ExplodeOutcome, FlowsplitError> {
        let Some(text) = node.get("info").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            return Ok(ExplodeOutcome::default());
        };
        claimed.claim("info", NAME)?;
        let path = dir.write_sibling(EXTENSION, text.as_bytes())?;
        Ok(ExplodeOutcome { files_created: vec![path] })
    }
}

pub struct DocumentationRebuild;

#[async_trait]
impl RebuildPlugin for DocumentationRebuild {
    async fn rebuild_node(
        &self,
        dir: &NodeDirContext,
        _id: &NodeId,
        node: &mut Node,
    ) -> Result<(), FlowsplitError> {
        if let Some(bytes) = dir.read_sibling(EXTENSION)? {
            let text = String::from_utf8(bytes).map_err(|e| FlowsplitError::Plugin {
                plugin: NAME.to_string(),
                message: format!("{EXTENSION} is not valid UTF-8: {e}"),
            })?;
            node.insert("info", Value::String(text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn empty_info_is_not_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = NodeDirContext::new(dir.path().join("n1"), NodeId::from("n1"));
        let node =
            Node::new(json!({"id": "n1", "type": "function", "info": "", "z": "t1"}).as_object().unwrap().clone());
        let mut claimed = ClaimedFields::new();
        let outcome = DocumentationExplode.explode_node(&node, &ctx, &mut claimed).await.unwrap();
        assert!(outcome.files_created.is_empty());
        assert!(!claimed.is_claimed("info"));
    }
}
