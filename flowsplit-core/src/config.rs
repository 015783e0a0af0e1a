//! Tunables shared across the explode engine, rebuild engine, remote client, and watch
//! orchestrator.
//!
//! Loading this struct from a file, environment, or flags is an external collaborator's
//! job — configuration-file parsing and validation are not a user-facing concern of
//! this crate. What lives here is the struct itself and sane defaults, in the style of
//! a per-subsystem config struct without the file-loading machinery around it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with a node directory whose id has vanished from a freshly written
/// skeleton, or with an on-disk file the rebuild engine can't attribute to any node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrphanPolicy {
    /// Move the orphan under `.orphaned/<original-path>/` (or `.quarantine/<id>/` for
    /// undiscoverable new files) instead of destroying it.
    Quarantine,
    /// Delete the orphan outright.
    Delete,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        OrphanPolicy::Quarantine
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowsplitConfig {
    /// Node count above which a container's nodes are exploded/rebuilt on a worker
    /// pool instead of sequentially.
    pub parallel_threshold: usize,

    /// Worker pool size for per-node explode/rebuild work. Defaults to the available
    /// parallelism capped at 8.
    pub worker_pool_size: usize,

    /// What to do with node directories whose id vanished from the skeleton, or with
    /// unattributable files found at rebuild time.
    pub orphan_policy: OrphanPolicy,

    /// If true, a rebuild whose skeleton names a node missing from disk drops it from
    /// the document and records the loss instead of failing fatally.
    pub tolerant_rebuild: bool,

    /// Remote poller interval. Default 1s.
    pub poll_interval: Duration,

    /// Filesystem watcher debounce window. Default 2s.
    pub debounce_window: Duration,

    /// Oscillation observation window. Default 60s.
    pub oscillation_window: Duration,

    /// Cycle count within `oscillation_window` that trips oscillation pause (`N`).
    /// Default 5.
    pub oscillation_cycle_threshold: usize,

    /// HTTP request timeout for the remote client. Default 30s.
    pub http_timeout: Duration,

    /// Exponential backoff schedule (seconds) for transient remote failures.
    pub retry_backoff_secs: Vec<u64>,

    /// Consecutive transient-failure cap before the remote client reports `Error` and
    /// the watch loop pauses. Default 5.
    pub consecutive_failure_cap: usize,

    /// Push rate ceiling: (max requests, window). Default 180/60s.
    pub rate_limit_short: (u32, Duration),

    /// Push rate ceiling: (max requests, window). Default 1200/600s.
    pub rate_limit_long: (u32, Duration),
}

impl Default for FlowsplitConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 20,
            worker_pool_size: std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(4),
            orphan_policy: OrphanPolicy::default(),
            tolerant_rebuild: false,
            poll_interval: Duration::from_secs(1),
            debounce_window: Duration::from_secs(2),
            oscillation_window: Duration::from_secs(60),
            oscillation_cycle_threshold: 5,
            http_timeout: Duration::from_secs(30),
            retry_backoff_secs: vec![1, 2, 4, 8, 16],
            consecutive_failure_cap: 5,
            rate_limit_short: (180, Duration::from_secs(60)),
            rate_limit_long: (1200, Duration::from_secs(600)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = FlowsplitConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.debounce_window, Duration::from_secs(2));
        assert_eq!(cfg.oscillation_window, Duration::from_secs(60));
        assert_eq!(cfg.oscillation_cycle_threshold, 5);
        assert_eq!(cfg.rate_limit_short, (180, Duration::from_secs(60)));
        assert_eq!(cfg.rate_limit_long, (1200, Duration::from_secs(600)));
        assert_eq!(cfg.retry_backoff_secs, vec![1, 2, 4, 8, 16]);
    }
}
