//! Built-in protocols.

use super::stage::Stage;
use crate::error::{FuncGenError, FuncGenResult};
use serde::{Deserialize, Serialize};

/// Parameters of the three-stage electroformation protocol.
///
/// Defaults suit high-salinity buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthParams {
    /// Initial amplitude, Vpp.
    pub u1: f64,
    /// Final amplitude, Vpp.
    pub u2: f64,
    /// Growth frequency, Hz.
    pub f1: f64,
    /// Detachment frequency, Hz.
    pub f2: f64,
    /// Growing stage, minutes.
    pub t1: f64,
    /// Resting stage, minutes.
    pub t2: f64,
    /// Detaching stage, minutes.
    pub t3: f64,
    /// Update interval, seconds.
    pub dt: f64,
}

impl Default for GrowthParams {
    fn default() -> Self {
        Self {
            u1: 0.1,
            u2: 2.5,
            f1: 500.0,
            f2: 50.0,
            t1: 30.0,
            t2: 60.0,
            t3: 30.0,
            dt: 5.0,
        }
    }
}

/// Points for a stage of `minutes` updated every `dt` seconds.
///
/// A ramp needs two points to reach its end value.
fn points_for(minutes: f64, dt: f64, ramp: bool) -> u32 {
    let n = (minutes * 60.0 / dt).floor().min(f64::from(u32::MAX)) as u32;
    n.max(if ramp { 2 } else { 1 })
}

/// Growing (U1 -> U2 at F1), Resting (U2 at F1), Detaching (F1 -> F2 at U2).
///
/// Stages with zero duration are left out.
pub fn three_stage_growth(params: &GrowthParams) -> FuncGenResult<Vec<Stage>> {
    if !(params.dt.is_finite() && params.dt > 0.0) {
        return Err(FuncGenError::Configuration(format!(
            "update interval must be positive, got {} s",
            params.dt
        )));
    }

    let mut stages = Vec::with_capacity(3);
    if params.t1 > 0.0 {
        stages.push(Stage::ramp(
            "Growing",
            params.t1,
            (params.u1, params.f1),
            (params.u2, params.f1),
            points_for(params.t1, params.dt, params.u1 != params.u2),
        ));
    }
    if params.t2 > 0.0 {
        stages.push(Stage::hold(
            "Resting",
            params.t2,
            params.u2,
            params.f1,
            points_for(params.t2, params.dt, false),
        ));
    }
    if params.t3 > 0.0 {
        stages.push(Stage::ramp(
            "Detaching",
            params.t3,
            (params.u2, params.f1),
            (params.u2, params.f2),
            points_for(params.t3, params.dt, params.f1 != params.f2),
        ));
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::stage::expand;
    use std::time::Duration;

    #[test]
    fn default_growth_protocol() {
        let stages = three_stage_growth(&GrowthParams::default()).unwrap();
        let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Growing", "Resting", "Detaching"]);
        assert_eq!(stages[0].points, 360);
        assert_eq!(stages[1].points, 720);
        assert_eq!(stages[2].points, 360);

        let queue = expand(&stages).unwrap();
        assert_eq!(queue.len(), 1440);
        assert_eq!(queue.total_duration(), Duration::from_secs(120 * 60));
        assert_eq!(queue.get(0).unwrap().tick_duration, Duration::from_secs(5));
    }

    #[test]
    fn zero_length_stages_are_omitted() {
        let params = GrowthParams {
            t2: 0.0,
            t3: 0.0,
            ..Default::default()
        };
        let stages = three_stage_growth(&params).unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name, "Growing");
    }

    #[test]
    fn short_ramp_still_reaches_end_value() {
        let params = GrowthParams {
            t1: 0.05,
            dt: 10.0,
            ..Default::default()
        };
        let stages = three_stage_growth(&params).unwrap();
        assert_eq!(stages[0].points, 2);
        assert!(expand(&stages).is_ok());
    }

    #[test]
    fn non_positive_interval_is_rejected() {
        let params = GrowthParams {
            dt: 0.0,
            ..Default::default()
        };
        assert!(three_stage_growth(&params).is_err());
    }
}
