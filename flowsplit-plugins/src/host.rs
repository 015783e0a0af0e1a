//! The plugin host: owns the ordered, selected descriptor list and routes each
//! stage's invocation, enforcing the field-claim protocol during explode.

use std::path::{Path, PathBuf};

use flowsplit_core::{ClaimedFields, Document, FlowsplitError, Node, NodeId};
use tracing::{debug, warn};

use crate::context::NodeDirContext;
use crate::selection::PluginSelection;
use crate::stages::{PluginDescriptor, PluginHook};

/// The result of running every active explode plugin against one node.
#[derive(Debug, Default)]
pub struct ExplodeNodeResult {
    pub claimed: ClaimedFields,
    pub files_created: Vec<PathBuf>,
    /// Non-fatal: plugin exceptions and field-claim conflicts are both isolated —
    /// recorded here, never aborting the rest of the plugin chain.
    pub errors: Vec<FlowsplitError>,
}

impl ExplodeNodeResult {
    pub fn is_stable(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The result of running every active rebuild plugin against one node directory.
#[derive(Debug, Default)]
pub struct RebuildNodeResult {
    pub errors: Vec<FlowsplitError>,
}

/// The result of a whole-document/whole-tree stage (pre-explode, post-explode,
/// post-rebuild): whether any plugin reported having modified something, and which
/// ones — the watch orchestrator's oscillation diagnostics name these plugins.
#[derive(Debug, Default, Clone)]
pub struct StageReport {
    pub modified: bool,
    pub modified_by: Vec<String>,
}

/// Owns plugins ordered by priority (ties broken by name, lexicographically) and
/// filtered by a [`PluginSelection`]. Immutable once built — `reload-plugins` in the
/// watch orchestrator swaps the whole host atomically between reactions rather than
/// mutating one in place.
#[derive(Clone)]
pub struct PluginHost {
    descriptors: Vec<PluginDescriptor>,
}

impl PluginHost {
    pub fn new(all: Vec<PluginDescriptor>, selection: &PluginSelection) -> Self {
        let all_names: Vec<String> = all.iter().map(|d| d.name.clone()).collect();
        let selected = selection.resolve(&all_names);

        let mut descriptors: Vec<PluginDescriptor> =
            all.into_iter().filter(|d| selected.contains(&d.name)).collect();
        descriptors.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        debug!(count = descriptors.len(), "plugin host assembled");
        Self { descriptors }
    }

    pub fn active_plugin_names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    pub async fn run_pre_explode(&self, document: &mut Document) -> StageReport {
        let mut report = StageReport::default();
        for desc in &self.descriptors {
            let PluginHook::PreExplode(plugin) = &desc.hook else { continue };
            match plugin.run(document).await {
                Ok(changed) => {
                    report.modified |= changed;
                    if changed {
                        report.modified_by.push(desc.name.clone());
                    }
                }
                Err(e) => warn!(plugin = %desc.name, error = %e, "pre-explode plugin failed"),
            }
        }
        report
    }

    pub async fn run_explode_node(&self, node: &Node, dir: &NodeDirContext) -> ExplodeNodeResult {
        let mut result = ExplodeNodeResult::default();
        for desc in &self.descriptors {
            let PluginHook::Explode(plugin) = &desc.hook else { continue };
            match plugin.explode_node(node, dir, &mut result.claimed).await {
                Ok(outcome) => result.files_created.extend(outcome.files_created),
                Err(e @ FlowsplitError::FieldClaimConflict { .. }) => {
                    warn!(plugin = %desc.name, error = %e, "field claim conflict");
                    result.errors.push(e);
                }
                Err(e) => {
                    warn!(plugin = %desc.name, error = %e, "explode plugin failed");
                    result.errors.push(FlowsplitError::Plugin {
                        plugin: desc.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        result
    }

    pub async fn run_post_explode(&self, tree_root: &Path, document_path: &Path) -> StageReport {
        let mut report = StageReport::default();
        for desc in &self.descriptors {
            let PluginHook::PostExplode(plugin) = &desc.hook else { continue };
            match plugin.run(tree_root, document_path).await {
                Ok(changed) => {
                    report.modified |= changed;
                    if changed {
                        report.modified_by.push(desc.name.clone());
                    }
                }
                Err(e) => warn!(plugin = %desc.name, error = %e, "post-explode plugin failed"),
            }
        }
        report
    }

    pub async fn run_pre_rebuild(&self, tree_root: &Path, continued_from_explode: bool) {
        for desc in &self.descriptors {
            let PluginHook::PreRebuild(plugin) = &desc.hook else { continue };
            if continued_from_explode && plugin.skip_when_continued() {
                debug!(plugin = %desc.name, "skipping pre-rebuild plugin, continued from explode");
                continue;
            }
            if let Err(e) = plugin.run(tree_root, continued_from_explode).await {
                warn!(plugin = %desc.name, error = %e, "pre-rebuild plugin failed");
            }
        }
    }

    pub async fn run_rebuild_node(
        &self,
        dir: &NodeDirContext,
        id: &NodeId,
        node: &mut Node,
    ) -> RebuildNodeResult {
        let mut result = RebuildNodeResult::default();
        for desc in &self.descriptors {
            let PluginHook::Rebuild(plugin) = &desc.hook else { continue };
            if let Err(e) = plugin.rebuild_node(dir, id, node).await {
                warn!(plugin = %desc.name, error = %e, "rebuild plugin failed");
                result.errors.push(FlowsplitError::Plugin {
                    plugin: desc.name.clone(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// First non-null wins, in priority order (lowest first): if more than one
    /// plugin could infer a type for an undeclared node, the highest-priority
    /// guess is authoritative.
    pub fn infer_node_type(&self, dir: &NodeDirContext, id: &NodeId) -> Option<String> {
        for desc in &self.descriptors {
            let PluginHook::Rebuild(plugin) = &desc.hook else { continue };
            if let Some(inferred) = plugin.can_infer_type(dir, id) {
                return Some(inferred);
            }
        }
        None
    }

    pub async fn run_post_rebuild(&self, document_path: &Path) -> StageReport {
        let mut report = StageReport::default();
        for desc in &self.descriptors {
            let PluginHook::PostRebuild(plugin) = &desc.hook else { continue };
            match plugin.run(document_path).await {
                Ok(changed) => {
                    report.modified |= changed;
                    if changed {
                        report.modified_by.push(desc.name.clone());
                    }
                }
                Err(e) => warn!(plugin = %desc.name, error = %e, "post-rebuild plugin failed"),
            }
        }
        report
    }
}
