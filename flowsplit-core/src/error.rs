//! The error taxonomy every subsystem in this workspace reports through.
//!
//! Every variant carries a stable `kind()` tag so operators (and the watch
//! orchestrator's own pause logic) can automate around error classes without string
//! matching on the `Display` text.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowsplitError {
    /// Missing or malformed plugin/config input. Fatal at start-up.
    #[error("configuration error: {0}")]
    Config(String),

    /// File open/read/write/rename failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rebuild attempted without a skeleton file. Fatal for that rebuild.
    #[error("skeleton file missing at {0}")]
    SkeletonMissing(PathBuf),

    /// An exception inside a plugin. Isolated: recorded, that plugin is skipped for
    /// this invocation, the host continues with the rest.
    #[error("plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// Two plugins tried to claim the same field on the same node.
    #[error("field '{field}' claimed by both '{first}' and '{second}'")]
    FieldClaimConflict { field: String, first: String, second: String },

    /// Timeout, connection refused, or 5xx from the remote endpoint. Retried with
    /// exponential backoff up to a cap.
    #[error("remote request failed transiently: {0}")]
    RemoteTransient(String),

    /// The remote endpoint rejected a push because the revision it was conditioned on
    /// is stale (HTTP 409).
    #[error("remote revision conflict: push was conditioned on a stale revision")]
    RemoteConflict,

    /// HTTP 429 or an internally enforced rate ceiling was hit.
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The watch loop detected a repeating push/fetch cycle within the observation
    /// window, implicating the named plugins (those that reported `modified = true`
    /// across the recent cycles).
    #[error("oscillation detected: {cycles} cycles in {window_secs}s, implicating {plugins:?}")]
    Oscillation { cycles: usize, window_secs: u64, plugins: Vec<String> },

    /// Round-trip verification found the rebuilt document unequal to the original.
    /// Reported by the verifier; never fatal to the pipeline on its own.
    #[error("round-trip verification failed: {0} mismatch(es)")]
    VerifyFailure(usize),
}

impl FlowsplitError {
    /// Stable kind tag for this error class, independent of the `Display` text.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowsplitError::Config(_) => "ConfigError",
            FlowsplitError::Io { .. } => "IOError",
            FlowsplitError::SkeletonMissing(_) => "SkeletonMissing",
            FlowsplitError::Plugin { .. } => "PluginError",
            FlowsplitError::FieldClaimConflict { .. } => "FieldClaimConflict",
            FlowsplitError::RemoteTransient(_) => "RemoteTransient",
            FlowsplitError::RemoteConflict => "RemoteConflict",
            FlowsplitError::RateLimited { .. } => "RateLimited",
            FlowsplitError::Oscillation { .. } => "Oscillation",
            FlowsplitError::VerifyFailure(_) => "VerifyFailure",
        }
    }

    /// Whether this error class is fatal to the current top-level operation (explode,
    /// rebuild, or a single watch reaction).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowsplitError::Config(_) | FlowsplitError::SkeletonMissing(_)
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FlowsplitError::Io { path: path.into(), source }
    }
}
