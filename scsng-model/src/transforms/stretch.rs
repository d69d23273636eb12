//! Stretch-to-fit registration
//!
//! Grid search over time-stretch factors `s = 1 + r` that make a varying
//! waveform best resemble a target inside a window around their peaks.
//!
//! **Scoring:**
//! - Both waveforms are registered at their own peak (found inside the
//!   window) and normalized to unit peak
//! - Only target samples inside the window and above `amp_level` of the
//!   target peak (the contiguous run around the peak) are compared
//! - `WinDiff` sums squared differences, `AmpDiff` absolute differences

use crate::error::{ModelError, Result};
use crate::signal::{Signal, SignalCollection, TAG_PEAK_WINDOW};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Windowed misfit between target and candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfitMetric {
    /// Sum of squared differences
    WinDiff,
    /// Sum of absolute differences
    #[default]
    AmpDiff,
}

/// Search parameters for [`stretch_to_fit`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StretchOptions {
    /// Comparison window relative to the peaks, seconds
    pub window: (f64, f64),
    /// Stretch range `(r_min, r_max)`; factors are `1 + r`
    pub range: (f64, f64),
    /// Fraction of the target peak bounding the compared samples
    pub amp_level: f64,
    /// Grid step in `r`
    pub step: f64,
    pub metric: MisfitMetric,
    /// Also fit a constant offset
    pub match_dc: bool,
}

impl Default for StretchOptions {
    fn default() -> Self {
        Self {
            window: (-13.0, 13.0),
            range: (-0.3, 0.3),
            amp_level: 0.25,
            step: 0.01,
            metric: MisfitMetric::AmpDiff,
            match_dc: false,
        }
    }
}

impl StretchOptions {
    /// Set the comparison window (must contain the origin)
    pub fn with_window(mut self, t1: f64, t2: f64) -> Result<Self> {
        if !(t1 < 0.0 && t2 > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "stretch window [{}, {}] must contain 0",
                t1, t2
            )));
        }
        self.window = (t1, t2);
        Ok(self)
    }

    /// Set the stretch range; every factor `1 + r` must stay positive
    pub fn with_range(mut self, r_min: f64, r_max: f64) -> Result<Self> {
        if !(r_min <= r_max) || r_min <= -1.0 {
            return Err(ModelError::InvalidInput(format!(
                "invalid stretch range [{}, {}]",
                r_min, r_max
            )));
        }
        self.range = (r_min, r_max);
        Ok(self)
    }

    pub fn with_amp_level(mut self, amp_level: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&amp_level) {
            return Err(ModelError::InvalidInput(format!(
                "amplitude level must be within [0, 1), got {}",
                amp_level
            )));
        }
        self.amp_level = amp_level;
        Ok(self)
    }

    pub fn with_step(mut self, step: f64) -> Result<Self> {
        if !(step > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "stretch step must be positive, got {}",
                step
            )));
        }
        self.step = step;
        Ok(self)
    }

    pub fn with_metric(mut self, metric: MisfitMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_dc_matching(mut self, match_dc: bool) -> Self {
        self.match_dc = match_dc;
        self
    }

    fn factors(&self) -> Vec<f64> {
        let (r_min, r_max) = self.range;
        let n = ((r_max - r_min) / self.step + 1e-9).floor() as usize + 1;
        (0..n).map(|k| 1.0 + r_min + k as f64 * self.step).collect()
    }
}

/// Best stretch of the varying waveform
#[derive(Debug, Clone)]
pub struct StretchFit {
    /// Stretched, peak-registered, normalized (and DC-corrected) waveform
    pub signal: Signal,
    pub factor: f64,
    pub dc_offset: f64,
    pub misfit: f64,
    /// Every factor tried with its misfit; failed candidates score infinity
    pub grid: Vec<(f64, f64)>,
}

/// Peak inside `window`, registered at t = 0 and normalized
fn register(signal: &mut Signal, window: (f64, f64)) -> Result<()> {
    let center = 0.5 * (window.0 + window.1);
    let half_width = 0.5 * (window.1 - window.0);
    if !signal.find_peak_around(center, half_width) {
        return Err(ModelError::WindowNotCovered {
            t1: window.0,
            t2: window.1,
            context: "stretch registration peak".to_string(),
        });
    }
    signal.shift_time_reference_to_peak();
    signal.normalize_to_peak()
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Offset and misfit of `candidate` against target samples at `times`
fn score(
    target_values: &[f64],
    candidate: &Signal,
    times: &[f64],
    opts: &StretchOptions,
) -> (f64, f64) {
    let mut residuals: Vec<f64> = target_values
        .iter()
        .zip(times)
        .map(|(d, t)| d - candidate.value_at(*t))
        .collect();
    let dc = if !opts.match_dc || residuals.is_empty() {
        0.0
    } else {
        match opts.metric {
            MisfitMetric::WinDiff => residuals.iter().sum::<f64>() / residuals.len() as f64,
            MisfitMetric::AmpDiff => median(&mut residuals.clone()),
        }
    };
    residuals.iter_mut().for_each(|r| *r -= dc);
    let misfit = match opts.metric {
        MisfitMetric::WinDiff => residuals.iter().map(|r| r * r).sum(),
        MisfitMetric::AmpDiff => residuals.iter().map(|r| r.abs()).sum(),
    };
    (dc, misfit)
}

/// Find the stretch factor that makes `varying` best resemble `target`
///
/// `varying` should already be registered with its peak at t = 0; it is
/// stretched about the origin.
pub fn stretch_to_fit(varying: &Signal, target: &Signal, opts: &StretchOptions) -> Result<StretchFit> {
    let mut reference = target.clone();
    register(&mut reference, opts.window)?;

    let (left, right) = reference.find_amp_level(opts.amp_level);
    let t_lo = reference.time_at(left).max(opts.window.0);
    let t_hi = reference.time_at(right).min(opts.window.1);
    let (times, target_values): (Vec<f64>, Vec<f64>) = match reference.window_range(t_lo, t_hi) {
        Some((lo, hi)) => (lo..=hi)
            .map(|i| (reference.time_at(i), reference.amp()[i]))
            .unzip(),
        None => {
            return Err(ModelError::WindowNotCovered {
                t1: t_lo,
                t2: t_hi,
                context: "stretch comparison range".to_string(),
            })
        }
    };

    let mut best: Option<(Signal, f64, f64, f64)> = None;
    let mut grid = Vec::new();
    for factor in opts.factors() {
        let mut candidate = varying.stretch(factor)?;
        if register(&mut candidate, opts.window).is_err() {
            grid.push((factor, f64::INFINITY));
            continue;
        }
        let (dc, misfit) = score(&target_values, &candidate, &times, opts);
        grid.push((factor, misfit));
        let improves = match &best {
            Some((_, _, _, best_misfit)) => misfit < *best_misfit,
            None => misfit.is_finite(),
        };
        if improves {
            best = Some((candidate, factor, dc, misfit));
        }
    }

    match best {
        Some((candidate, factor, dc_offset, misfit)) => Ok(StretchFit {
            signal: candidate + dc_offset,
            factor,
            dc_offset,
            misfit,
            grid,
        }),
        None => Err(ModelError::InvalidInput(
            "no stretch candidate could be registered".to_string(),
        )),
    }
}

/// Stretch `varying` by the ratio of half-height widths
///
/// Returns the stretched waveform and `s - 1`. Broader and skinnier
/// waveforms are both matched by stretching.
pub fn stretch_to_fit_half_width(varying: &Signal, target: &Signal) -> Result<(Signal, f64)> {
    let hw_target = target.amp_level_width(0.5);
    let hw_varying = varying.amp_level_width(0.5);
    if hw_varying <= 0.0 || hw_target <= 0.0 {
        return Err(ModelError::InvalidInput(format!(
            "half-height width must be positive (target {}, varying {})",
            hw_target, hw_varying
        )));
    }
    let factor = hw_target / hw_varying;
    Ok((varying.stretch(factor)?, factor - 1.0))
}

impl SignalCollection {
    /// Replace every signal by its best stretch toward `target`
    ///
    /// Signals that cannot be fitted are tagged and left as they are; their
    /// indices are returned.
    pub fn stretch_to_fit(&mut self, target: &Signal, opts: &StretchOptions) -> Vec<usize> {
        let mut failed = Vec::new();
        for (i, signal) in self.signals_mut().iter_mut().enumerate() {
            match stretch_to_fit(signal, target, opts) {
                Ok(fit) => {
                    let meta = signal.meta().clone();
                    let tag = signal.tag();
                    *signal = fit.signal.with_meta(meta);
                    signal.set_tag(tag);
                }
                Err(e) => {
                    warn!(pair = %signal.meta().pair_name(), error = %e, "stretch fit failed");
                    signal.set_tag(TAG_PEAK_WINDOW);
                    failed.push(i);
                }
            }
        }
        failed
    }
}
