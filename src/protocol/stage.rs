//! Protocol stages and their expansion into timed set-points.
//!
//! A stage linearly interpolates amplitude and frequency over its duration.
//! With `N` points the values step by `(end - start)/(N - 1)` and every point
//! is held for `duration/N`, so the last point does not get extra time
//! reserved for "arriving" at the end value.
//!
//! ```text
//! Growing, 1 min, U 0.1 -> 2.5, F 500, N = 3
//!
//!   i   U     F     remaining  tick
//!   0   0.1   500   60 s       20 s
//!   1   1.3   500   40 s       20 s
//!   2   2.5   500   20 s       20 s
//! ```
//!
//! Expansion knows nothing about device limits; values are clipped when the
//! runner applies them.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One named phase of a protocol, as entered by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name shown on displays ("Growing", "Resting", ...).
    pub name: String,
    /// Total stage duration in minutes.
    pub minutes: f64,
    /// Amplitude at the first point, Vpp.
    pub start_amplitude: f64,
    /// Amplitude at the last point, Vpp.
    pub end_amplitude: f64,
    /// Frequency at the first point, Hz.
    pub start_frequency: f64,
    /// Frequency at the last point, Hz.
    pub end_frequency: f64,
    /// Number of set-points the stage is split into.
    pub points: u32,
}

impl Stage {
    /// Linear ramp from `(start_amplitude, start_frequency)` to
    /// `(end_amplitude, end_frequency)`.
    pub fn ramp(
        name: impl Into<String>,
        minutes: f64,
        (start_amplitude, start_frequency): (f64, f64),
        (end_amplitude, end_frequency): (f64, f64),
        points: u32,
    ) -> Self {
        Self {
            name: name.into(),
            minutes,
            start_amplitude,
            end_amplitude,
            start_frequency,
            end_frequency,
            points,
        }
    }

    /// Constant amplitude and frequency for the whole stage.
    pub fn hold(
        name: impl Into<String>,
        minutes: f64,
        amplitude: f64,
        frequency: f64,
        points: u32,
    ) -> Self {
        Self::ramp(
            name,
            minutes,
            (amplitude, frequency),
            (amplitude, frequency),
            points,
        )
    }

    /// Stage duration.
    ///
    /// Only meaningful after [`Stage::validate`] accepted the stage; invalid
    /// durations read as zero.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.minutes * 60.0).unwrap_or_default()
    }

    /// Check the stage can be expanded.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if Duration::try_from_secs_f64(self.minutes * 60.0).is_err() {
            return Err(ValidationError::StageDurationInvalid {
                stage: self.name.clone(),
                minutes: self.minutes,
            });
        }
        for (field, value) in [
            ("startU", self.start_amplitude),
            ("startF", self.start_frequency),
            ("endU", self.end_amplitude),
            ("endF", self.end_frequency),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::StageValueInvalid {
                    stage: self.name.clone(),
                    field,
                    value,
                });
            }
        }
        match self.points {
            0 => Err(ValidationError::StagePointCountInvalid {
                stage: self.name.clone(),
                points: self.points,
            }),
            1 if self.start_amplitude != self.end_amplitude
                || self.start_frequency != self.end_frequency =>
            {
                Err(ValidationError::StageInconsistent {
                    stage: self.name.clone(),
                    start_amplitude: self.start_amplitude,
                    end_amplitude: self.end_amplitude,
                    start_frequency: self.start_frequency,
                    end_frequency: self.end_frequency,
                })
            }
            _ => Ok(()),
        }
    }

    /// Expand a validated stage into its set-points.
    fn expand_into(&self, out: &mut Vec<SetPoint>) {
        let total = self.duration();
        let name: Arc<str> = Arc::from(self.name.as_str());

        if self.points == 1 {
            out.push(SetPoint {
                stage: name,
                amplitude: self.start_amplitude,
                frequency: self.start_frequency,
                time_remaining: total,
                tick_duration: total,
            });
            return;
        }

        let steps = f64::from(self.points - 1);
        let d_amplitude = (self.end_amplitude - self.start_amplitude) / steps;
        let d_frequency = (self.end_frequency - self.start_frequency) / steps;
        let tick = total / self.points;

        out.extend((0..self.points).map(|i| SetPoint {
            stage: Arc::clone(&name),
            amplitude: self.start_amplitude + f64::from(i) * d_amplitude,
            frequency: self.start_frequency + f64::from(i) * d_frequency,
            time_remaining: total.saturating_sub(tick * i),
            tick_duration: tick,
        }));
    }
}

/// One discrete `(amplitude, frequency)` pair scheduled during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPoint {
    /// Name of the stage this point belongs to.
    pub stage: Arc<str>,
    /// Requested amplitude, Vpp (unclipped).
    pub amplitude: f64,
    /// Requested frequency, Hz (unclipped).
    pub frequency: f64,
    /// Time left in the stage when this point is applied.
    pub time_remaining: Duration,
    /// How long this point is held before the next tick.
    pub tick_duration: Duration,
}

/// Time-ordered, immutable sequence of set-points for one run.
///
/// Built once by [`expand`]. The runner walks it with its own cursor; running
/// again means expanding again.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolQueue {
    points: Arc<[SetPoint]>,
}

impl Default for ProtocolQueue {
    fn default() -> Self {
        Self {
            points: Arc::from(Vec::new()),
        }
    }
}

impl ProtocolQueue {
    /// Number of set-points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Set-point at `index`.
    pub fn get(&self, index: usize) -> Option<&SetPoint> {
        self.points.get(index)
    }

    /// All set-points in run order.
    pub fn as_slice(&self) -> &[SetPoint] {
        &self.points
    }

    /// Iterate in run order.
    pub fn iter(&self) -> std::slice::Iter<'_, SetPoint> {
        self.points.iter()
    }

    /// Sum of all tick durations.
    pub fn total_duration(&self) -> Duration {
        self.points.iter().map(|p| p.tick_duration).sum()
    }

    /// Stage names in order of first appearance.
    pub fn stage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for point in self.points.iter() {
            if names.last() != Some(&&*point.stage) {
                names.push(&point.stage);
            }
        }
        names
    }
}

impl<'a> IntoIterator for &'a ProtocolQueue {
    type Item = &'a SetPoint;
    type IntoIter = std::slice::Iter<'a, SetPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Expand stages, in order, into one flat queue.
///
/// Every stage is validated before anything is produced, so a rejected
/// protocol never yields a partial queue.
pub fn expand(stages: &[Stage]) -> Result<ProtocolQueue, ValidationError> {
    for stage in stages {
        stage.validate()?;
    }

    let capacity = stages.iter().map(|s| s.points as usize).sum();
    let mut points = Vec::with_capacity(capacity);
    for stage in stages {
        stage.expand_into(&mut points);
    }

    tracing::debug!(
        stages = stages.len(),
        points = points.len(),
        "Expanded protocol"
    );

    Ok(ProtocolQueue {
        points: points.into(),
    })
}
