//! CQ calibration scenarios
//!
//! Scores a unit Gaussian against copies of itself that differ in one
//! respect (amplitude, time shift, stretch or DC offset), showing how each
//! kind of misfit moves CQ.

use crate::cq::{calculate_cq, CqScores};
use crate::error::{ModelError, Result};
use crate::signal::Signal;
use serde::Serialize;
use tracing::debug;

pub const AMPLITUDES: [f64; 9] = [1.0, 0.75, 0.5, 0.33333, 0.0, -0.33333, -0.5, -0.75, -1.0];
pub const TIME_SHIFTS: [f64; 9] = [-1.6, -1.2, -0.8, -0.4, 0.0, 0.4, 0.8, 1.2, 1.6];
pub const STRETCHES: [f64; 6] = [0.5, 0.6666, 0.8, 1.0, 1.25, 1.5];
pub const DC_OFFSETS: [f64; 3] = [-0.1, 0.0, 0.1];

/// Which property of the model copy is varied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Amplitude,
    TimeShift,
    Stretch,
    DcOffset,
}

/// Base pulse and comparison settings
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub signal_len: f64,
    pub delta: f64,
    pub sigma: f64,
    pub compare_len: f64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            signal_len: 40.0,
            delta: 0.025,
            sigma: 1.2,
            compare_len: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRow {
    pub scenario: Scenario,
    pub parameter: f64,
    pub scores: CqScores,
    pub cq: f64,
}

/// Unit Gaussian peaking in the middle of the comparison window
pub fn base_pulse(params: &ScenarioParams) -> Result<Signal> {
    let n = (params.signal_len / params.delta).floor() as usize;
    let mut pulse = Signal::gaussian(n, params.delta, params.sigma)?;
    if !pulse.find_peak_around(params.signal_len / 2.0, params.signal_len / 2.0) {
        return Err(ModelError::InvalidInput(format!(
            "signal length {} too short",
            params.signal_len
        )));
    }
    pulse.normalize_to_peak()?;
    pulse.shift_time_reference_to_peak();
    pulse.shift_time(params.compare_len / 2.0);
    Ok(pulse)
}

/// Score every scenario against the base pulse
pub fn run_scenarios(params: &ScenarioParams) -> Result<Vec<ScenarioRow>> {
    let data = base_pulse(params)?;
    let mut rows = Vec::new();
    let mut score = |scenario, parameter, model: &Signal| -> Result<()> {
        let scores = calculate_cq(&data, model, params.compare_len)?;
        debug!(?scenario, parameter, cq = scores.cq(), "scenario scored");
        rows.push(ScenarioRow {
            scenario,
            parameter,
            cq: scores.cq(),
            scores,
        });
        Ok(())
    };

    for amp in AMPLITUDES {
        score(Scenario::Amplitude, amp, &(&data * amp))?;
    }
    for shift in TIME_SHIFTS {
        let mut model = data.clone();
        model.shift_time(shift);
        score(Scenario::TimeShift, shift, &model)?;
    }
    for stretch in STRETCHES {
        score(Scenario::Stretch, stretch, &data.stretch(stretch)?)?;
    }
    for dc in DC_OFFSETS {
        score(Scenario::DcOffset, dc, &(data.clone() + dc))?;
    }
    Ok(rows)
}
