// src/session/monitor.rs

use serde::{Deserialize, Serialize};

use crate::config::ExamConfig;

/// An integrity-relevant environment signal reported by the client shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The exam window lost foreground focus (tab switch, app switch).
    FocusLost,
    /// A restricted key combination, conventionally used to open the
    /// runtime inspector, was attempted.
    RestrictedKeys,
}

impl ViolationKind {
    fn describe(&self) -> &'static str {
        match self {
            ViolationKind::FocusLost => "Tab switching detected",
            ViolationKind::RestrictedKeys => "Developer tools access attempt",
        }
    }
}

/// Decision for one recorded violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// Below the threshold: surface the warning and carry on.
    Warn { count: u32, warning: String },
    /// Threshold reached: the runner must call `submit(ViolationLimit)`.
    Escalate { count: u32 },
}

/// Escalation policy over the session's monotonic violation counter.
///
/// Violations are not exceptions: they flow through here as first-class
/// state. The counter itself lives on the session so it survives snapshots;
/// this type only judges it. Intake of signals is the runner's job, and the
/// runner stops listening entirely once the session is terminal.
#[derive(Debug, Clone, Copy)]
pub struct ViolationMonitor {
    threshold: u32,
}

impl ViolationMonitor {
    pub fn new(config: &ExamConfig) -> Self {
        Self {
            threshold: config.violation_threshold,
        }
    }

    pub fn assess(&self, count: u32, kind: ViolationKind) -> ViolationOutcome {
        if count >= self.threshold {
            tracing::warn!(count, "violation threshold reached, forcing submission");
            ViolationOutcome::Escalate { count }
        } else {
            let warning = format!("Warning: {}. Violation #{}", kind.describe(), count);
            tracing::warn!(count, kind = ?kind, "integrity violation recorded");
            ViolationOutcome::Warn { count, warning }
        }
    }
}
