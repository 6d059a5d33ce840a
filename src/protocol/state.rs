//! Protocol runner lifecycle.

use serde::{Deserialize, Serialize};

/// Runner execution state.
///
/// # State Machine
///
/// ```text
/// Idle ──Start──> Running ──last Tick──> Finished ──Acknowledge──> Idle
///   ▲               │   ▲
///   │           Pause│   │Resume
///   │               ▼   │
///   └────Stop──── Paused
///   └────Stop / device failure ── Running
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunnerState {
    /// No protocol loaded; manual device commands are allowed.
    #[default]
    Idle,
    /// Set-points are being applied on the tick timer.
    Running,
    /// Tick timer suspended; queue position kept.
    Paused,
    /// Queue exhausted; waiting for acknowledgement.
    Finished,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "Idle"),
            RunnerState::Running => write!(f, "Running"),
            RunnerState::Paused => write!(f, "Paused"),
            RunnerState::Finished => write!(f, "Finished"),
        }
    }
}

impl RunnerState {
    /// Check if the state allows starting a new run.
    pub fn can_start(&self) -> bool {
        matches!(self, RunnerState::Idle)
    }

    /// Check if the state allows pausing.
    pub fn can_pause(&self) -> bool {
        matches!(self, RunnerState::Running)
    }

    /// Check if the state allows resuming.
    pub fn can_resume(&self) -> bool {
        matches!(self, RunnerState::Paused)
    }

    /// Check if the state allows stopping.
    pub fn can_stop(&self) -> bool {
        matches!(self, RunnerState::Running | RunnerState::Paused)
    }

    /// Check if the state can be acknowledged back to `Idle`.
    pub fn can_acknowledge(&self) -> bool {
        matches!(self, RunnerState::Finished)
    }

    /// Whether the runner owns the device right now.
    ///
    /// Manual device commands are only valid when this is false.
    pub fn is_active(&self) -> bool {
        matches!(self, RunnerState::Running | RunnerState::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_gated() {
        assert!(RunnerState::Idle.can_start());
        assert!(!RunnerState::Finished.can_start());
        assert!(RunnerState::Running.can_pause());
        assert!(!RunnerState::Paused.can_pause());
        assert!(RunnerState::Paused.can_resume());
        assert!(RunnerState::Paused.can_stop());
        assert!(!RunnerState::Finished.can_stop());
        assert!(RunnerState::Finished.can_acknowledge());
        assert!(!RunnerState::Finished.is_active());
    }

    #[test]
    fn serializes_as_variant_name() {
        let json = serde_json::to_string(&RunnerState::Paused).unwrap();
        assert_eq!(json, "\"Paused\"");
    }
}
