//! Weighted stacking, cross-correlation stacking and stripping

use crate::error::{ModelError, Result};
use crate::signal::{Signal, TraceMeta};
use crate::transforms::xcorr::{cross_correlation, Normalization};
use std::borrow::Borrow;
use tracing::debug;

/// Sample-wise weighted mean and standard deviation
#[derive(Debug, Clone)]
pub struct StackResult {
    pub mean: Signal,
    pub std: Signal,
}

/// Outcome of [`xcorr_stack`]
#[derive(Debug, Clone)]
pub struct XcorrStack {
    /// Time added to each input to align it with the stack
    pub shifts: Vec<f64>,
    /// Correlation of each input against the stack of the last round
    pub coefficients: Vec<f64>,
    pub stack: Signal,
}

fn check_axis(reference: &Signal, other: &Signal, index: usize) -> Result<()> {
    let delta = reference.delta();
    if (other.delta() - delta).abs() > delta * 1e-9
        || other.len() != reference.len()
        || (other.begin_time() - reference.begin_time()).abs() > 0.01 * delta
    {
        return Err(ModelError::AxisMismatch(format!(
            "stack member {} has axis (dt {}, begin {}, n {}), expected (dt {}, begin {}, n {})",
            index,
            other.delta(),
            other.begin_time(),
            other.len(),
            delta,
            reference.begin_time(),
            reference.len()
        )));
    }
    Ok(())
}

/// Weighted sample-wise mean and population standard deviation
///
/// All signals must share one time axis. A zero weight keeps a signal out
/// of the stack but its axis is still checked.
pub fn stack_signals<S: Borrow<Signal>>(signals: &[S], weights: &[f64]) -> Result<StackResult> {
    let first = match signals.first() {
        Some(s) => s.borrow(),
        None => return Err(ModelError::EmptyInput("no signals to stack".to_string())),
    };
    if weights.len() != signals.len() {
        return Err(ModelError::InvalidInput(format!(
            "{} weights for {} signals",
            weights.len(),
            signals.len()
        )));
    }
    if weights.iter().any(|w| !(*w >= 0.0)) {
        return Err(ModelError::InvalidInput(
            "stack weights must be non-negative".to_string(),
        ));
    }
    let weight_sum: f64 = weights.iter().sum();
    if !(weight_sum > 0.0) {
        return Err(ModelError::EmptyInput(format!(
            "stack weight sum is {}",
            weight_sum
        )));
    }
    for (i, s) in signals.iter().enumerate() {
        check_axis(first, s.borrow(), i)?;
    }

    let n = first.len();
    let mut mean = vec![0.0; n];
    for (s, w) in signals.iter().zip(weights) {
        for (m, v) in mean.iter_mut().zip(s.borrow().amp()) {
            *m += w * v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= weight_sum);

    let mut var = vec![0.0; n];
    for (s, w) in signals.iter().zip(weights) {
        for ((acc, v), m) in var.iter_mut().zip(s.borrow().amp()).zip(&mean) {
            *acc += w * (v - m) * (v - m);
        }
    }
    let std = var.iter().map(|v| (v / weight_sum).sqrt()).collect();

    let axis = |amp: Vec<f64>| -> Result<Signal> {
        Ok(Signal::new(first.delta(), first.begin_time(), amp)?.with_meta(TraceMeta::default()))
    };
    Ok(StackResult {
        mean: axis(mean)?,
        std: axis(std)?,
    })
}

/// Resample `signal` shifted by `shift` onto the axis of `reference`
fn regrid(signal: &Signal, shift: f64, reference: &Signal) -> Result<Signal> {
    let amp = (0..reference.len())
        .map(|i| signal.value_at(reference.time_at(i) - shift))
        .collect();
    Ok(Signal::new(reference.delta(), reference.begin_time(), amp)?.with_meta(signal.meta().clone()))
}

/// Iteratively align signals on their stack and restack
///
/// Each round cross-correlates the window `[t0 + t1, t0 + t2]` of the
/// current stack with every input, regrids the shifted inputs onto the
/// first input's axis and restacks with unit weights.
pub fn xcorr_stack(
    signals: &[Signal],
    t0: f64,
    window: (f64, f64),
    iterations: usize,
) -> Result<XcorrStack> {
    let first = signals
        .first()
        .ok_or_else(|| ModelError::EmptyInput("no signals to stack".to_string()))?;
    let unit = vec![1.0; signals.len()];
    let (w1, w2) = (t0 + window.0, t0 + window.1);

    let mut aligned = signals
        .iter()
        .map(|s| regrid(s, 0.0, first))
        .collect::<Result<Vec<_>>>()?;
    let mut stack = stack_signals(&aligned, &unit)?.mean;
    let mut shifts = vec![0.0; signals.len()];
    let mut coefficients = vec![0.0; signals.len()];

    for round in 0..iterations.max(1) {
        for (i, s) in signals.iter().enumerate() {
            let r = cross_correlation(&stack, (w1, w2), s, (w1, w2), Normalization::Raw)?;
            shifts[i] = r.shift;
            coefficients[i] = r.coefficient;
        }
        aligned = signals
            .iter()
            .zip(&shifts)
            .map(|(s, shift)| regrid(s, *shift, first))
            .collect::<Result<Vec<_>>>()?;
        stack = stack_signals(&aligned, &unit)?.mean;
        debug!(round, traces = signals.len(), "cross-correlation stack round");
    }

    Ok(XcorrStack {
        shifts,
        coefficients,
        stack,
    })
}

/// Subtract `sources[i]` shifted by `shifts[i]` from `traces[i]`
pub fn strip_signal(traces: &mut [Signal], sources: &[Signal], shifts: &[f64]) -> Result<()> {
    if sources.len() != traces.len() || shifts.len() != traces.len() {
        return Err(ModelError::InvalidInput(format!(
            "{} traces, {} sources, {} shifts",
            traces.len(),
            sources.len(),
            shifts.len()
        )));
    }
    for ((trace, source), shift) in traces.iter_mut().zip(sources).zip(shifts) {
        let mut shifted = source.clone();
        shifted.shift_time(*shift);
        trace.subtract_signal(&shifted)?;
    }
    Ok(())
}

/// Subtract one shared `source`, shifted per trace
pub fn strip_signal_shared(traces: &mut [Signal], source: &Signal, shifts: &[f64]) -> Result<()> {
    if shifts.len() != traces.len() {
        return Err(ModelError::InvalidInput(format!(
            "{} traces, {} shifts",
            traces.len(),
            shifts.len()
        )));
    }
    for (trace, shift) in traces.iter_mut().zip(shifts) {
        let mut shifted = source.clone();
        shifted.shift_time(*shift);
        trace.subtract_signal(&shifted)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(values: Vec<f64>) -> Signal {
        Signal::new(0.5, -1.0, values).unwrap()
    }

    fn pulse(center: f64) -> Signal {
        let amp = (0..1201)
            .map(|i| {
                let t = -15.0 + i as f64 * 0.025 - center;
                (-t * t / 2.0).exp()
            })
            .collect();
        Signal::new(0.025, -15.0, amp).unwrap()
    }

    #[test]
    fn test_weighted_mean_and_std() {
        let signals = vec![flat(vec![1.0, 2.0, 3.0]), flat(vec![3.0, 2.0, 0.0])];
        let r = stack_signals(&signals, &[1.0, 3.0]).unwrap();
        assert_eq!(r.mean.amp(), &[2.5, 2.0, 0.75]);
        // sample 0: values 1 (w1), 3 (w3), mean 2.5 -> var (2.25 + 3*0.25)/4 = 0.75
        assert!((r.std.amp()[0] - 0.75f64.sqrt()).abs() < 1e-12);
        assert_eq!(r.std.amp()[1], 0.0);
        assert_eq!(r.mean.begin_time(), -1.0);
    }

    #[test]
    fn test_equal_weights_reduce_to_mean() {
        let signals = vec![flat(vec![1.0, 4.0]), flat(vec![3.0, 0.0])];
        let refs: Vec<&Signal> = signals.iter().collect();
        let r = stack_signals(&refs, &[2.0, 2.0]).unwrap();
        assert_eq!(r.mean.amp(), &[2.0, 2.0]);
        assert_eq!(r.std.amp(), &[1.0, 2.0]);
    }

    #[test]
    fn test_zero_weight_excludes_but_checks_axis() {
        let signals = vec![flat(vec![1.0, 1.0]), flat(vec![9.0, 9.0])];
        let r = stack_signals(&signals, &[1.0, 0.0]).unwrap();
        assert_eq!(r.mean.amp(), &[1.0, 1.0]);

        let mismatched = vec![flat(vec![1.0, 1.0]), flat(vec![9.0, 9.0, 9.0])];
        assert!(matches!(
            stack_signals(&mismatched, &[1.0, 0.0]),
            Err(ModelError::AxisMismatch(_))
        ));
    }

    #[test]
    fn test_stack_preconditions() {
        let none: Vec<Signal> = Vec::new();
        assert!(stack_signals(&none, &[]).is_err());
        let signals = vec![flat(vec![1.0])];
        assert!(stack_signals(&signals, &[0.0]).is_err());
        assert!(stack_signals(&signals, &[1.0, 1.0]).is_err());
        assert!(stack_signals(&signals, &[-1.0]).is_err());

        let mut shifted = flat(vec![1.0]);
        shifted.shift_time(0.1);
        assert!(stack_signals(&[flat(vec![1.0]), shifted], &[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_xcorr_stack_aligns_shifted_pulses() {
        let signals = vec![pulse(0.0), pulse(0.5), pulse(-0.5)];
        let r = xcorr_stack(&signals, 0.0, (-8.0, 8.0), 2).unwrap();
        // Every input is moved onto the same arrival time
        let aligned: Vec<f64> = signals
            .iter()
            .zip(&r.shifts)
            .map(|(s, shift)| s.peak_time() + shift)
            .collect();
        assert!((aligned[1] - aligned[0]).abs() < 0.03);
        assert!((aligned[2] - aligned[0]).abs() < 0.03);
        assert!(r.coefficients.iter().all(|c| *c > 0.99));
        assert!(r.stack.peak_amp() > 0.99);
    }

    #[test]
    fn test_strip_signal_removes_shifted_source() {
        let source = pulse(0.0);
        let mut traces = vec![pulse(1.0), pulse(-2.0)];
        strip_signal(&mut traces, &[source.clone(), source.clone()], &[1.0, -2.0]).unwrap();
        for t in &traces {
            assert!(t.amp().iter().all(|v| v.abs() < 1e-9));
        }

        let mut traces = vec![pulse(1.0) * 2.0];
        strip_signal_shared(&mut traces, &source, &[1.0]).unwrap();
        assert!((traces[0].peak_amp() - 1.0).abs() < 1e-9);
        assert!(strip_signal_shared(&mut traces, &source, &[]).is_err());
    }
}
