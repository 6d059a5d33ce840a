//! Custom error types for the library.
//!
//! The taxonomy mirrors how a run can go wrong:
//!
//! - **`ValidationError`**: a protocol table was rejected before any device was
//!   touched. Nothing is partially applied.
//! - **`DeviceError`**: the instrument is unavailable or refused a command. The
//!   runner falls back to `Idle` and never retries on its own.
//! - **`FuncGenError`**: the crate-wide error that wraps the two above together
//!   with runner misuse, configuration and protocol-table failures.
//!
//! Clipping never produces an error; out-of-range values saturate silently.
//!
//! By using `#[from]`, `FuncGenError` can be created from the underlying error
//! types with the `?` operator.

use crate::protocol::RunnerState;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type FuncGenResult<T> = std::result::Result<T, FuncGenError>;

/// A protocol stage failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A single-point stage must hold one value: start and end must be equal.
    #[error(
        "Stage '{stage}' has one point but different endpoints \
         (U {start_amplitude} -> {end_amplitude}, F {start_frequency} -> {end_frequency})"
    )]
    StageInconsistent {
        /// Stage name.
        stage: String,
        /// Amplitude at the first point, Vpp.
        start_amplitude: f64,
        /// Amplitude at the last point, Vpp.
        end_amplitude: f64,
        /// Frequency at the first point, Hz.
        start_frequency: f64,
        /// Frequency at the last point, Hz.
        end_frequency: f64,
    },

    /// A stage needs at least one point.
    #[error("Stage '{stage}' has {points} points, at least 1 is required")]
    StagePointCountInvalid {
        /// Stage name.
        stage: String,
        /// Requested point count.
        points: u32,
    },

    /// Stage duration must be finite and non-negative.
    #[error("Stage '{stage}' has invalid duration {minutes} min")]
    StageDurationInvalid {
        /// Stage name.
        stage: String,
        /// Requested duration.
        minutes: f64,
    },

    /// Amplitudes and frequencies must be finite numbers.
    #[error("Stage '{stage}' has non-finite {field} {value}")]
    StageValueInvalid {
        /// Stage name.
        stage: String,
        /// Table column holding the value (`startU`, `endF`, ...).
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// The instrument could not be used.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No open bus to the instrument.
    #[error("Device not connected")]
    NotConnected,

    /// The instrument refused or did not answer a command.
    #[error("Device command failed: {0:#}")]
    DeviceCommandFailed(#[source] anyhow::Error),
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum FuncGenError {
    /// A stage was rejected before the run.
    #[error("Protocol validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The instrument failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Start was requested with an empty queue.
    #[error("No protocol specified")]
    NoProtocol,

    /// A runner command that the current state does not allow.
    #[error("Cannot {action} while runner is {state}")]
    InvalidTransition {
        /// State the runner was in.
        state: RunnerState,
        /// Rejected command.
        action: &'static str,
    },

    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration values out of range.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A protocol table row could not be read.
    #[error("Protocol table error: {0}")]
    Table(String),

    /// Malformed CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `--device` or `device.kind` named no supported instrument.
    #[error("Unknown device kind '{0}'")]
    UnknownDevice(String),

    /// The driver needs a cargo feature this build lacks.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// The runner task panicked or was cancelled.
    #[error("Runner task ended abnormally: {0}")]
    RunnerTask(String),
}

impl FuncGenError {
    /// True when the error came from the instrument rather than from the input.
    pub fn is_device_error(&self) -> bool {
        matches!(self, FuncGenError::Device(_))
    }
}

impl From<anyhow::Error> for DeviceError {
    fn from(err: anyhow::Error) -> Self {
        DeviceError::DeviceCommandFailed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_command_failure_keeps_context() {
        let err: DeviceError = anyhow::anyhow!("timeout").context("VOLT 1.0000").into();
        let text = err.to_string();
        assert!(text.contains("VOLT 1.0000"), "got: {text}");
        assert!(text.contains("timeout"), "got: {text}");
    }

    #[test]
    fn invalid_transition_names_state() {
        let err = FuncGenError::InvalidTransition {
            state: RunnerState::Idle,
            action: "pause",
        };
        assert_eq!(err.to_string(), "Cannot pause while runner is Idle");
        assert!(!err.is_device_error());
    }

    #[test]
    fn validation_converts_into_crate_error() {
        let err: FuncGenError = ValidationError::StagePointCountInvalid {
            stage: "Growing".into(),
            points: 0,
        }
        .into();
        assert!(matches!(err, FuncGenError::Validation(_)));
    }
}
