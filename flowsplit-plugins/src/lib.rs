//! # flowsplit-plugins
//!
//! The plugin host: owns a collection of plugins ordered by priority, one of six
//! stages each, and enforces the field-claim protocol during explode.
//!
//! ## Dynamic dispatch, not filename prefixes
//!
//! Plugins are registered as an explicit [`PluginDescriptor`] value: `{ name,
//! priority, hook }`. Registration happens at startup; ordering is a pure function of
//! the descriptor list (priority, ties broken by name) — nothing is discovered by
//! scanning a directory at runtime or inferred from a filename convention.
//!
//! ## Field-claim protocol as a fold, not shared mutable state
//!
//! [`flowsplit_core::ClaimedFields`] is threaded through the chain of explode plugins
//! for a single node as an accumulator each plugin extends. It is owned by whichever
//! worker is processing that node — there is no cross-node shared set to lock.

pub mod builtin;
pub mod context;
pub mod host;
pub mod selection;
pub mod stages;

pub use context::NodeDirContext;
pub use host::{ExplodeNodeResult, PluginHost, RebuildNodeResult, StageReport};
pub use selection::PluginSelection;
pub use stages::{
    ExplodeOutcome, ExplodePlugin, PluginDescriptor, PluginHook, PostExplodePlugin,
    PostRebuildPlugin, PreExplodePlugin, PreRebuildPlugin, RebuildPlugin,
};
