//! Filesystem watcher: observes the tree for creations, modifications, and deletions,
//! coalesces bursts with a debounce window, and emits one `LocalEdit` signal per
//! quiescent period.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Runs until `raw_rx` closes (the `notify::Watcher` is dropped). Emits on `edits`
/// once per debounce-quiescent burst of filesystem events.
pub async fn run(
    tree_root: PathBuf,
    debounce: Duration,
    edits: mpsc::Sender<()>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> notify::Result<()> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.send(res);
        },
        notify::Config::default(),
    )?;
    watcher.watch(&tree_root, RecursiveMode::Recursive)?;
    info!(path = %tree_root.display(), "watching tree for local edits");

    let mut pending_deadline: Option<Instant> = None;

    loop {
        let sleep = match pending_deadline {
            Some(deadline) => tokio::time::sleep_until(deadline),
            None => tokio::time::sleep(Duration::from_secs(3600)),
        };

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("filesystem watcher shutting down");
                return Ok(());
            }
            () = sleep, if pending_deadline.is_some() => {
                pending_deadline = None;
                if edits.send(()).await.is_err() {
                    return Ok(());
                }
            }
            event = raw_rx.recv() => {
                match event {
                    Some(Ok(ev)) if is_relevant(&ev) => {
                        pending_deadline = Some(Instant::now() + debounce);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(error = %e, "filesystem watch error"),
                    None => return Ok(()),
                }
            }
        }
    }
}

fn is_relevant(event: &notify::Event) -> bool {
    use notify::EventKind;
    !matches!(event.kind, EventKind::Access(_))
        && !event.paths.iter().any(|p| is_reserved(p))
}

/// Paths the orchestrator itself owns and that should never trip a `LocalEdit`:
/// the skeleton file, its atomic-write temp file, and the quarantine/orphan
/// subtrees the explode/rebuild engines write to on their own.
fn is_reserved(path: &Path) -> bool {
    if path
        .file_name()
        .map(|n| n == flowsplit_skeleton::SKELETON_FILENAME || n.to_string_lossy().ends_with(".json.tmp"))
        .unwrap_or(false)
    {
        return true;
    }
    path.components().any(|c| {
        let name = c.as_os_str();
        name == flowsplit_core::layout::ORPHANED_DIR || name == flowsplit_core::layout::QUARANTINE_DIR
    })
}
