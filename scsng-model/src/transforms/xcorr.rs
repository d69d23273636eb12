//! Windowed cross-correlation
//!
//! The lag is reported as the time to add to the second signal so that its
//! window content lines up with the first signal's, refined to sub-sample
//! resolution by a parabola through the correlation peak.

use crate::error::{ModelError, Result};
use crate::signal::Signal;
use serde::{Deserialize, Serialize};

/// Correlation normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Normalize by the window energies
    #[default]
    Raw,
    /// Remove each window's mean first (Pearson coefficient at zero lag)
    ZeroMean,
}

/// Best alignment of one signal onto another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XcorrResult {
    /// Time to add to the second signal, seconds
    pub shift: f64,
    /// Normalized correlation at the best integer lag
    pub coefficient: f64,
}

fn windowed(signal: &Signal, window: (f64, f64)) -> Result<(f64, Vec<f64>)> {
    match signal.window_range(window.0, window.1) {
        Some((lo, hi)) => Ok((signal.time_at(lo), signal.amp()[lo..=hi].to_vec())),
        None => Err(ModelError::WindowNotCovered {
            t1: window.0,
            t2: window.1,
            context: "cross-correlation window".to_string(),
        }),
    }
}

fn remove_mean(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter_mut().for_each(|v| *v -= mean);
}

/// Zero-lag correlation coefficient over the common prefix of `a` and `b`
///
/// Returns 0 when either side has zero energy.
pub fn correlation_coefficient(a: &[f64], b: &[f64], normalization: Normalization) -> f64 {
    let n = a.len().min(b.len());
    let mut a = a[..n].to_vec();
    let mut b = b[..n].to_vec();
    if normalization == Normalization::ZeroMean {
        remove_mean(&mut a);
        remove_mean(&mut b);
    }
    let ea: f64 = a.iter().map(|v| v * v).sum();
    let eb: f64 = b.iter().map(|v| v * v).sum();
    if ea == 0.0 || eb == 0.0 {
        return 0.0;
    }
    let c: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
    (c / (ea * eb).sqrt()).clamp(-1.0, 1.0)
}

/// Cross-correlate window `a_window` of `a` with window `b_window` of `b`
///
/// `max_lag` (seconds) limits the lags searched around zero lag.
pub fn cross_correlation_limited(
    a: &Signal,
    a_window: (f64, f64),
    b: &Signal,
    b_window: (f64, f64),
    normalization: Normalization,
    max_lag: Option<f64>,
) -> Result<XcorrResult> {
    let delta = a.delta();
    if (delta - b.delta()).abs() > delta * 1e-9 {
        return Err(ModelError::AxisMismatch(format!(
            "cross-correlation of spacing {} and {}",
            delta,
            b.delta()
        )));
    }

    let (ta, mut wa) = windowed(a, a_window)?;
    let (tb, mut wb) = windowed(b, b_window)?;
    if normalization == Normalization::ZeroMean {
        remove_mean(&mut wa);
        remove_mean(&mut wb);
    }

    let ea: f64 = wa.iter().map(|v| v * v).sum();
    let eb: f64 = wb.iter().map(|v| v * v).sum();
    if ea == 0.0 || eb == 0.0 {
        return Ok(XcorrResult {
            shift: ta - tb,
            coefficient: 0.0,
        });
    }

    let na = wa.len() as i64;
    let nb = wb.len() as i64;
    let (mut k_min, mut k_max) = (-(nb - 1), na - 1);
    if let Some(limit) = max_lag {
        let k_limit = (limit.abs() / delta).floor() as i64;
        k_min = k_min.max(-k_limit);
        k_max = k_max.min(k_limit);
    }

    let correlate = |k: i64| -> f64 {
        let i_start = k.max(0);
        let i_end = na.min(nb + k);
        (i_start..i_end)
            .map(|i| wa[i as usize] * wb[(i - k) as usize])
            .sum()
    };

    let mut best_k = k_min;
    let mut best = f64::NEG_INFINITY;
    for k in k_min..=k_max {
        let c = correlate(k);
        if c > best {
            best = c;
            best_k = k;
        }
    }

    // Parabolic refinement around the integer peak
    let mut offset = 0.0;
    if best_k > k_min && best_k < k_max {
        let left = correlate(best_k - 1);
        let right = correlate(best_k + 1);
        let denom = left - 2.0 * best + right;
        if denom < 0.0 {
            offset = (0.5 * (left - right) / denom).clamp(-0.5, 0.5);
        }
    }

    Ok(XcorrResult {
        shift: (ta - tb) + (best_k as f64 + offset) * delta,
        coefficient: (best / (ea * eb).sqrt()).clamp(-1.0, 1.0),
    })
}

/// Cross-correlate over every lag the windows allow
pub fn cross_correlation(
    a: &Signal,
    a_window: (f64, f64),
    b: &Signal,
    b_window: (f64, f64),
    normalization: Normalization,
) -> Result<XcorrResult> {
    cross_correlation_limited(a, a_window, b, b_window, normalization, None)
}

/// Positional pairing of `a[i]` with `b[i]`
pub fn cross_correlation_many(
    a: &[Signal],
    a_window: (f64, f64),
    b: &[Signal],
    b_window: (f64, f64),
    normalization: Normalization,
) -> Result<Vec<XcorrResult>> {
    if a.len() != b.len() {
        return Err(ModelError::InvalidInput(format!(
            "cannot pair {} signals with {}",
            a.len(),
            b.len()
        )));
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| cross_correlation(x, a_window, y, b_window, normalization))
        .collect()
}
