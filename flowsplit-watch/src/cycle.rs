//! Oscillation detection: a sliding window of recent push cycles. A "cycle" is
//! recorded whenever a `RemoteUpdate` reaction concludes that the tree needs to be
//! pushed back out again without any genuine local edit behind it — a plugin that
//! isn't a fixpoint on its own output. More than `threshold` such cycles inside
//! `window` means the pipeline isn't converging.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct CycleWindow {
    window: Duration,
    threshold: usize,
    events: VecDeque<Instant>,
}

impl CycleWindow {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self { window, threshold, events: VecDeque::new() }
    }

    /// Record a cycle now and report whether the window has tripped (more than
    /// `threshold` cycles observed within the trailing `window`).
    pub fn record_and_check(&mut self) -> bool {
        let now = Instant::now();
        self.events.push_back(now);
        self.prune(now);
        self.events.len() > self.threshold
    }

    pub fn len(&mut self) -> usize {
        self.prune(Instant::now());
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn prune(&mut self, now: Instant) {
        while matches!(self.events.front(), Some(t) if now.duration_since(*t) > self.window) {
            self.events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_plus_one_cycles() {
        let mut window = CycleWindow::new(Duration::from_secs(60), 5);
        for _ in 0..5 {
            assert!(!window.record_and_check());
        }
        assert!(window.record_and_check());
    }

    #[test]
    fn old_cycles_age_out_of_the_window() {
        let mut window = CycleWindow::new(Duration::from_millis(20), 1);
        assert!(!window.record_and_check());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!window.record_and_check());
    }
}
