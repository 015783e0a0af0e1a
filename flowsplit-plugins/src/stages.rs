//! Stage hooks and the plugin descriptor that ties a name and
//! priority to one of them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flowsplit_core::{ClaimedFields, Document, FlowsplitError, Node, NodeId};

use crate::context::NodeDirContext;

/// Runs once, over the whole `Document`, before any node files are written. May
/// rewrite the document in place (e.g. the id-normalizer rewriting opaque ids);
/// returns whether it did.
#[async_trait]
pub trait PreExplodePlugin: Send + Sync {
    async fn run(&self, document: &mut Document) -> Result<bool, FlowsplitError>;
}

/// What an explode plugin produced for one node.
#[derive(Debug, Clone, Default)]
pub struct ExplodeOutcome {
    pub files_created: Vec<PathBuf>,
}

/// Runs once per non-skeleton-only node, in priority order, offered the running
/// [`ClaimedFields`] accumulator. A plugin declines by claiming nothing.
#[async_trait]
pub trait ExplodePlugin: Send + Sync {
    async fn explode_node(
        &self,
        node: &Node,
        dir: &NodeDirContext,
        claimed: &mut ClaimedFields,
    ) -> Result<ExplodeOutcome, FlowsplitError>;
}

/// Runs once, over the whole tree, after all nodes are exploded.
#[async_trait]
pub trait PostExplodePlugin: Send + Sync {
    async fn run(&self, tree_root: &Path, document_path: &Path) -> Result<bool, FlowsplitError>;
}

/// Runs once, over the whole tree, before any node directory is read.
#[async_trait]
pub trait PreRebuildPlugin: Send + Sync {
    async fn run(&self, tree_root: &Path, continued_from_explode: bool) -> Result<(), FlowsplitError>;

    /// Whether this plugin should be skipped when the rebuild immediately follows an
    /// explode (its work would be redundant). Default: never skip.
    fn skip_when_continued(&self) -> bool {
        false
    }
}

/// Runs once per node directory during rebuild, in priority order, injecting claimed
/// fields back into the in-progress node.
#[async_trait]
pub trait RebuildPlugin: Send + Sync {
    async fn rebuild_node(
        &self,
        dir: &NodeDirContext,
        id: &NodeId,
        node: &mut Node,
    ) -> Result<(), FlowsplitError>;

    /// Attempt to infer a node's type from its directory contents alone, for files the
    /// rebuild engine found with no matching skeleton entry. `None` means "I don't
    /// recognize this"; the first plugin (in priority order) to answer wins.
    fn can_infer_type(&self, _dir: &NodeDirContext, _id: &NodeId) -> Option<String> {
        None
    }
}

/// Runs once, over the reconstructed `Document`.
#[async_trait]
pub trait PostRebuildPlugin: Send + Sync {
    async fn run(&self, document_path: &Path) -> Result<bool, FlowsplitError>;
}

/// A plugin's stage-specific behavior, boxed behind the trait its stage requires.
#[derive(Clone)]
pub enum PluginHook {
    PreExplode(std::sync::Arc<dyn PreExplodePlugin>),
    Explode(std::sync::Arc<dyn ExplodePlugin>),
    PostExplode(std::sync::Arc<dyn PostExplodePlugin>),
    PreRebuild(std::sync::Arc<dyn PreRebuildPlugin>),
    Rebuild(std::sync::Arc<dyn RebuildPlugin>),
    PostRebuild(std::sync::Arc<dyn PostRebuildPlugin>),
}

impl PluginHook {
    pub fn stage_name(&self) -> &'static str {
        match self {
            PluginHook::PreExplode(_) => "pre-explode",
            PluginHook::Explode(_) => "explode",
            PluginHook::PostExplode(_) => "post-explode",
            PluginHook::PreRebuild(_) => "pre-rebuild",
            PluginHook::Rebuild(_) => "rebuild",
            PluginHook::PostRebuild(_) => "post-rebuild",
        }
    }
}

/// A registered plugin: a stable name (used for selection and for tie-breaking when
/// two plugins share a priority), an integer priority (lower runs first; conventional
/// bands are 100 for pre-explode, 200 for explode, 300 for post-explode, 400 for
/// pre-rebuild, 500 for post-rebuild, with rebuild sharing the explode-side band of
/// whichever feature it mirrors), and the stage hook itself.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub priority: i32,
    pub hook: PluginHook,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, priority: i32, hook: PluginHook) -> Self {
        Self { name: name.into(), priority, hook }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("stage", &self.hook.stage_name())
            .finish()
    }
}
