// src/session/timer.rs

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ExamConfig;

/// Cross-checks the countdown against wall-clock time.
///
/// A local countdown alone cannot tell a frozen-and-resumed process or an
/// artificially advanced clock from normal operation. Every resync interval
/// the runner asks this detector to compare the measured elapsed time since
/// the previous check against the expected interval; a gap beyond the
/// tolerance is treated as tampering and escalates to immediate forced
/// submission instead of waiting for the countdown to hit zero.
///
/// Invariant on the configured values: jitter < tolerance < interval.
#[derive(Debug)]
pub struct DriftDetector {
    last_check: Instant,
    interval: Duration,
    tolerance: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftVerdict {
    InSync,
    Tampered { drift: Duration },
}

impl DriftDetector {
    pub fn new(config: &ExamConfig, now: Instant) -> Self {
        Self {
            last_check: now,
            interval: Duration::from_secs(config.resync_interval_secs),
            tolerance: Duration::from_secs(config.drift_tolerance_secs),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One resync check. `now` is injected so the logic is testable without
    /// sleeping through a real interval.
    pub fn check(&mut self, now: Instant) -> DriftVerdict {
        // tokio's duration_since saturates to zero on clock weirdness.
        let elapsed = now.duration_since(self.last_check);
        let drift = elapsed.abs_diff(self.interval);
        self.last_check = now;

        if drift > self.tolerance {
            tracing::error!(drift_ms = drift.as_millis() as u64, "time sync drift detected");
            DriftVerdict::Tampered { drift }
        } else {
            DriftVerdict::InSync
        }
    }
}
