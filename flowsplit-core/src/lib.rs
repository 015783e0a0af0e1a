//! # flowsplit-core
//!
//! Shared data model for the flowsplit explode/rebuild engine: the `Document`/`Node`
//! types that every other crate in the workspace builds on, the `Fingerprint` used to
//! decide semantic equality between two documents, the error taxonomy every subsystem
//! reports through, and the tunables (`FlowsplitConfig`) that the explode engine, the
//! rebuild engine, the remote client, and the watch orchestrator all read from.
//!
//! ## Layout
//!
//! - [`model`] — `Document`, `Node`, container classification.
//! - [`fingerprint`] — canonical-form semantic equality between two documents.
//! - [`diff`] — the minimal diff shape the verifier reports on inequality.
//! - [`error`] — `FlowsplitError`, one stable `kind()` tag per error class.
//! - [`config`] — `FlowsplitConfig`, the tunables shared across the pipeline.

pub mod config;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod layout;
pub mod model;

pub use config::FlowsplitConfig;
pub use diff::{DiffKind, DocumentDiff};
pub use error::FlowsplitError;
pub use fingerprint::Fingerprint;
pub use model::{ClaimedFields, Document, Node, NodeId};

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FlowsplitError>;
