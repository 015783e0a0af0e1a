//! A simple sliding-window request counter: refuses requests once `max` have been
//! recorded within the trailing `window`, reporting how long the caller should wait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct SlidingWindowLimiter {
    max: u32,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window, timestamps: VecDeque::new() }
    }

    /// Drop timestamps older than the window, then either record this request (and
    /// return `None`) or refuse it (returning how long until the oldest recorded
    /// request ages out).
    pub fn check_and_record(&mut self) -> Option<Duration> {
        let now = Instant::now();
        while matches!(self.timestamps.front(), Some(t) if now.duration_since(*t) >= self.window) {
            self.timestamps.pop_front();
        }
        if self.timestamps.len() as u32 >= self.max {
            let oldest = *self.timestamps.front().expect("len >= max > 0 implies non-empty");
            return Some(self.window.saturating_sub(now.duration_since(oldest)));
        }
        self.timestamps.push_back(now);
        None
    }

    /// Undo the most recent `check_and_record` that succeeded — used when a sibling
    /// window (e.g. the long-period ceiling) rejects a request the short window had
    /// already admitted.
    pub fn rollback_last(&mut self) {
        self.timestamps.pop_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_refuses() {
        let mut limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check_and_record().is_none());
        assert!(limiter.check_and_record().is_none());
        assert!(limiter.check_and_record().is_some());
    }

    #[test]
    fn rollback_frees_a_slot() {
        let mut limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_and_record().is_none());
        limiter.rollback_last();
        assert!(limiter.check_and_record().is_none());
    }
}
