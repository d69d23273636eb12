//! Empirical source waveform (ESW) construction
//!
//! Traces must already be aligned on the phase of interest (peak at t = 0).
//! The ESW is the cross-correlation stack of their windows, re-registered
//! on its own peak, cut, normalized and tapered. An optional refinement
//! stretches every trace toward the first ESW and stacks again.

use crate::error::{ModelError, Result};
use crate::signal::{Signal, SignalCollection};
use crate::transforms::{xcorr_stack, StretchOptions};
use tracing::{debug, info, warn};

/// Rounds of align-and-restack
const XCORR_ITERATIONS: usize = 2;
/// Padding added to the source cut while stacking, seconds
const CUT_PADDING: f64 = 10.0;
/// Half width of the search for the stack peak, seconds
const PEAK_HALF_WIDTH: f64 = 10.0;

/// How an ESW is cut and shaped
#[derive(Debug, Clone)]
pub struct EswParams {
    /// Final extent relative to the peak
    pub cut: (f64, f64),
    /// Cross-correlation window relative to the peak
    pub xcorr_window: (f64, f64),
    /// Hann taper, percent per side
    pub taper: f64,
    /// Stretch every trace onto the first ESW and restack
    pub refine: Option<StretchOptions>,
}

impl EswParams {
    pub fn new(cut: (f64, f64), taper: f64) -> Self {
        Self {
            cut,
            xcorr_window: (-15.0, 15.0),
            taper,
            refine: None,
        }
    }

    pub fn with_refinement(mut self, opts: StretchOptions) -> Self {
        self.refine = Some(opts);
        self
    }
}

fn stack(traces: &[Signal], params: &EswParams) -> Result<Signal> {
    let result = xcorr_stack(traces, 0.0, params.xcorr_window, XCORR_ITERATIONS)?;
    debug!(
        traces = traces.len(),
        min_coefficient = result.coefficients.iter().cloned().fold(f64::INFINITY, f64::min),
        "ESW stacked"
    );
    finalize(result.stack, params)
}

fn finalize(mut esw: Signal, params: &EswParams) -> Result<Signal> {
    if !esw.find_peak_around(0.0, PEAK_HALF_WIDTH) {
        return Err(ModelError::WindowNotCovered {
            t1: -PEAK_HALF_WIDTH,
            t2: PEAK_HALF_WIDTH,
            context: "ESW peak".to_string(),
        });
    }
    esw.shift_time_reference_to_peak();
    if !esw.check_and_cut_to_window(params.cut.0, params.cut.1) {
        return Err(ModelError::WindowNotCovered {
            t1: params.cut.0,
            t2: params.cut.1,
            context: "ESW cut".to_string(),
        });
    }
    esw.flip_peak_up();
    esw.normalize_to_peak()?;
    esw.hann_taper(params.taper)?;
    Ok(esw)
}

/// Build an ESW from phase-aligned traces
///
/// Traces that do not cover the padded cut are left out; an empty
/// remainder is an error.
pub fn build_esw(aligned: &SignalCollection, params: &EswParams) -> Result<Signal> {
    let (t1, t2) = (params.cut.0 - CUT_PADDING, params.cut.1 + CUT_PADDING);
    let mut traces = aligned.clone();
    let failed = traces.check_and_cut_to_window(t1, t2);
    if !failed.is_empty() {
        warn!(dropped = failed.len(), "traces not covering the ESW window");
    }
    traces.retain(|s| s.covers(t1, t2) && s.tag() == 0);
    if traces.is_empty() {
        return Err(ModelError::EmptyInput(
            "no trace covers the ESW window".to_string(),
        ));
    }

    let esw = stack(traces.signals(), params)?;
    let Some(opts) = params.refine else {
        info!(traces = traces.len(), "ESW built");
        return Ok(esw);
    };

    let failed = traces.stretch_to_fit(&esw, &opts);
    traces.retain(|s| s.tag() == 0);
    if traces.is_empty() {
        warn!(failed = failed.len(), "no trace could be stretched; keeping unrefined ESW");
        return Ok(esw);
    }
    // Stretched traces sit on their own registered axes; put them back on one grid
    let reference = traces.signals()[0].clone();
    let mut regridded = Vec::with_capacity(traces.len());
    for s in traces.iter() {
        let amp = (0..reference.len())
            .map(|i| s.value_at(reference.time_at(i)))
            .collect();
        regridded.push(Signal::new(reference.delta(), reference.begin_time(), amp)?);
    }
    let refined = stack(&regridded, params)?;
    info!(
        traces = regridded.len(),
        stretch_failures = failed.len(),
        "ESW built with stretch refinement"
    );
    Ok(refined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aligned_pulse(shift: f64, scale: f64) -> Signal {
        let amp = (0..6401)
            .map(|i| {
                let t = -80.0 + i as f64 * 0.025 - shift;
                scale * (-t * t / (2.0 * 2.0 * 2.0)).exp()
            })
            .collect();
        Signal::new(0.025, -80.0, amp).unwrap()
    }

    #[test]
    fn test_esw_is_unit_peak_at_origin() {
        let traces = SignalCollection::new(vec![
            aligned_pulse(0.0, 1.0),
            aligned_pulse(0.3, 0.8),
            aligned_pulse(-0.2, 1.2),
        ]);
        let esw = build_esw(&traces, &EswParams::new((-60.0, 60.0), 20.0)).unwrap();
        assert!((esw.peak_amp() - 1.0).abs() < 1e-9);
        assert!(esw.peak_time().abs() < 0.03);
        assert!((esw.begin_time() + 60.0).abs() < 0.03);
        assert_eq!(esw.amp()[0], 0.0);
    }

    #[test]
    fn test_short_traces_are_dropped() {
        let mut short = aligned_pulse(0.0, 1.0);
        assert!(short.check_and_cut_to_window(-20.0, 20.0));
        let traces = SignalCollection::new(vec![aligned_pulse(0.0, 1.0), short]);
        assert!(build_esw(&traces, &EswParams::new((-60.0, 60.0), 20.0)).is_ok());

        let only_short = SignalCollection::new(vec![traces.signals()[1].clone()]);
        assert!(matches!(
            build_esw(&only_short, &EswParams::new((-60.0, 60.0), 20.0)),
            Err(ModelError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_refined_esw_keeps_shape() {
        let traces = SignalCollection::new(vec![aligned_pulse(0.0, 1.0), aligned_pulse(0.1, 0.9)]);
        let params = EswParams::new((-30.0, 30.0), 10.0).with_refinement(
            StretchOptions::default().with_metric(crate::transforms::MisfitMetric::WinDiff),
        );
        let esw = build_esw(&traces, &params).unwrap();
        assert!((esw.peak_amp() - 1.0).abs() < 1e-9);
        let width = esw.amp_level_width(0.5);
        // Gaussian sigma 2 s has a half-height width of ~4.71 s
        assert!((width - 4.71).abs() < 0.3, "width {}", width);
    }
}
