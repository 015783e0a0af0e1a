//! The remote poller: a periodic timer task that asks the mailbox to attempt a fetch.
//! It never calls the remote client directly — `currentEtag` is single-writer state
//! owned by the reaction loop, so the poller is a pure producer, same as the
//! filesystem watcher.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(interval: Duration, tick: mpsc::Sender<()>, shutdown: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "remote poller started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("remote poller shutting down");
                return;
            }
            _ = ticker.tick() => {
                if tick.send(()).await.is_err() {
                    return;
                }
            }
        }
    }
}
