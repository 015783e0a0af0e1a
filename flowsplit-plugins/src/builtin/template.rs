//! Explode/rebuild of template content: dashboard `ui_template` nodes go to
//! `.ui-template.html`; any other node carrying a `template` field goes to
//! `.template.<fmt>`, where `<fmt>` is read from the node's own `format` field
//! (defaulting to `txt`).

use async_trait::async_trait;
use flowsplit_core::{ClaimedFields, FlowsplitError, Node, NodeId};
use serde_json::Value;

use crate::context::NodeDirContext;
use crate::stages::{ExplodeOutcome, ExplodePlugin, RebuildPlugin};

pub const NAME: &str = "template";
const UI_TEMPLATE_TYPE: &str = "ui_template";
const UI_EXTENSION: &str = ".ui-template.html";

fn template_extension(node: &Node) -> String {
    if node.node_type() == Some(UI_TEMPLATE_TYPE) {
        return UI_EXTENSION.to_string();
    }
    let fmt = node.get("format").and_then(Value::as_str).unwrap_or("txt");
    format!(".template.{fmt}")
}

pub struct TemplateExplode;

#[async_trait]
impl ExplodePlugin for TemplateExplode {
    async fn explode_node(
        &self,
        node: &Node,
        dir: &NodeDirContext,
        claimed: &mut ClaimedFields,
    ) -> Result<ExplodeOutcome, FlowsplitError> {
        let Some(text) = node.get("template").and_then(Value::as_str) else {
            return Ok(ExplodeOutcome::default());
        };
        claimed.claim("template", NAME)?;
        let extension = template_extension(node);
        let path = dir.write_sibling(&extension, text.as_bytes())?;
        Ok(ExplodeOutcome { files_created: vec![path] })
    }
}

pub struct TemplateRebuild;

#[async_trait]
impl RebuildPlugin for TemplateRebuild {
    async fn rebuild_node(
        &self,
        dir: &NodeDirContext,
        _id: &NodeId,
        node: &mut Node,
    ) -> Result<(), FlowsplitError> {
        let extension = template_extension(node);
        if let Some(bytes) = dir.read_sibling(&extension)? {
            let text = String::from_utf8(bytes).map_err(|e| FlowsplitError::Plugin {
                plugin: NAME.to_string(),
                message: format!("{extension} is not valid UTF-8: {e}"),
            })?;
            node.insert("template", Value::String(text));
        }
        Ok(())
    }

    fn can_infer_type(&self, dir: &NodeDirContext, _id: &NodeId) -> Option<String> {
        dir.sibling_exists(UI_EXTENSION).then(|| UI_TEMPLATE_TYPE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn ui_template_nodes_use_html_extension() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = NodeDirContext::new(dir.path().join("n1"), NodeId::from("n1"));
        let node = Node::new(
            json!({"id": "n1", "type": "ui_template", "template": "<div></div>", "z": "t1"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let mut claimed = ClaimedFields::new();
        let outcome = TemplateExplode.explode_node(&node, &ctx, &mut claimed).await.unwrap();
        assert_eq!(outcome.files_created[0].file_name().unwrap(), "n1.ui-template.html");
    }

    #[tokio::test]
    async fn plain_template_uses_format_field() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = NodeDirContext::new(dir.path().join("n2"), NodeId::from("n2"));
        let node = Node::new(
            json!({"id": "n2", "type": "email-template", "template": "Hi {{name}}", "format": "mustache", "z": "t1"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let mut claimed = ClaimedFields::new();
        let outcome = TemplateExplode.explode_node(&node, &ctx, &mut claimed).await.unwrap();
        assert_eq!(outcome.files_created[0].file_name().unwrap(), "n2.template.mustache");
    }
}
