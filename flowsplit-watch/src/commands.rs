//! The operator command surface: core-level, not a user-facing CLI. Whatever embeds
//! this crate is free to expose these over a socket, an admin HTTP endpoint, or a
//! REPL — this module only defines the vocabulary and the replies.

use flowsplit_core::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Force a RemoteUpdate reaction as if the cached ETag were cleared.
    Download,
    /// Force a LocalEdit reaction (rebuild and push) even without a filesystem event.
    Upload,
    /// Rebuild and compare against the last fetched document without pushing.
    Check,
    /// Read-only snapshot of orchestrator state.
    Status,
    Pause,
    Resume,
    ReloadPlugins,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub paused: Option<String>,
    pub current_etag: Option<String>,
    pub current_revision: Option<String>,
    pub consecutive_failures: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandAck {
    Ok,
    Status(StatusSnapshot),
    /// `check`'s result: whether the tree still fingerprint-matches the last fetched
    /// document, and, if not, the unstable/new/missing node ids implicated.
    CheckResult { matches: bool, unstable_or_changed: Vec<NodeId> },
    Error(String),
}
