//! Emergency-release detector.
//!
//! A peer that has grabbed its local keyboard and mouse must always offer a
//! way out, even if the relay is gone.  The escape hatch is pressing and
//! releasing Alt `N` times in quick succession: if `N` releases land within a
//! window of `T` seconds, focus is dropped locally.
//!
//! # Sliding window (for beginners)
//!
//! The detector keeps only the timestamps of the most recent `N` releases in
//! a `VecDeque`.  Each new release pushes onto the back; once the deque holds
//! more than `N` entries the oldest falls off the front.  The sequence fires
//! when the deque is full and the span between the oldest and newest entries
//! is at most `T`.  After firing the deque is emptied, so the next trigger
//! needs `N` fresh releases.
//!
//! Timestamps are passed in by the caller instead of read from a clock, which
//! keeps the detector a pure state machine and lets tests replay exact
//! timings.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window counter for rapid modifier releases.
#[derive(Debug, Clone)]
pub struct EmergencyReleaseDetector {
    key_count: usize,
    window: Duration,
    releases: VecDeque<Instant>,
}

impl EmergencyReleaseDetector {
    /// Creates a detector that fires after `key_count` releases within `window`.
    ///
    /// A `key_count` of zero is treated as one.
    pub fn new(key_count: usize, window: Duration) -> Self {
        let key_count = key_count.max(1);
        Self {
            key_count,
            window,
            releases: VecDeque::with_capacity(key_count + 1),
        }
    }

    /// Records one modifier release at `at`.
    ///
    /// Returns `true` exactly when this release completes the escape sequence.
    pub fn record(&mut self, at: Instant) -> bool {
        self.releases.push_back(at);
        if self.releases.len() > self.key_count {
            self.releases.pop_front();
        }
        if self.releases.len() < self.key_count {
            return false;
        }

        let (Some(&oldest), Some(&newest)) = (self.releases.front(), self.releases.back()) else {
            return false;
        };
        if newest.saturating_duration_since(oldest) <= self.window {
            self.releases.clear();
            true
        } else {
            false
        }
    }

    /// Forgets all recorded releases.
    pub fn reset(&mut self) {
        self.releases.clear();
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn test_three_quick_releases_fire() {
        // Arrange
        let base = Instant::now();
        let mut detector = EmergencyReleaseDetector::new(3, Duration::from_secs(1));

        // Act / Assert
        assert!(!detector.record(at(base, 100)));
        assert!(!detector.record(at(base, 300)));
        assert!(detector.record(at(base, 500)));
    }

    #[test]
    fn test_slow_releases_do_not_fire() {
        let base = Instant::now();
        let mut detector = EmergencyReleaseDetector::new(3, Duration::from_secs(1));

        assert!(!detector.record(at(base, 100)));
        assert!(!detector.record(at(base, 900)));
        assert!(!detector.record(at(base, 2500)));
        // window is now [0.9, 2.5, 2.6]: span 1.7s
        assert!(!detector.record(at(base, 2600)));
    }

    #[test]
    fn test_window_slides_past_stale_release() {
        let base = Instant::now();
        let mut detector = EmergencyReleaseDetector::new(3, Duration::from_secs(1));

        detector.record(at(base, 0));
        detector.record(at(base, 2000));
        detector.record(at(base, 2200));

        assert!(detector.record(at(base, 2400)));
    }

    #[test]
    fn test_span_equal_to_window_fires() {
        let base = Instant::now();
        let mut detector = EmergencyReleaseDetector::new(2, Duration::from_secs(1));

        detector.record(at(base, 0));

        assert!(detector.record(at(base, 1000)));
    }

    #[test]
    fn test_history_is_cleared_after_firing() {
        let base = Instant::now();
        let mut detector = EmergencyReleaseDetector::new(3, Duration::from_secs(1));
        for ms in [0, 100, 200] {
            detector.record(at(base, ms));
        }

        assert!(!detector.record(at(base, 300)));
        assert!(!detector.record(at(base, 400)));
        assert!(detector.record(at(base, 500)));
    }

    #[test]
    fn test_reset_discards_partial_sequence() {
        let base = Instant::now();
        let mut detector = EmergencyReleaseDetector::new(2, Duration::from_secs(1));
        detector.record(at(base, 0));

        detector.reset();

        assert!(!detector.record(at(base, 100)));
    }
}
