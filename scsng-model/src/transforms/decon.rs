//! Water-level deconvolution
//!
//! Spectral division of an observed waveform by a source waveform with the
//! denominator floored at `(water_level · max|S|)²`. The numerator keeps
//! the phase of `O·conj(S)`, so flooring only caps amplification.
//!
//! The pipeline always follows the division with a Gaussian blur and a
//! band-pass; [`DeconChain`] runs the three steps in that order.

use crate::error::{ModelError, Result};
use crate::signal::Signal;
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// FFT length for deconvolving signals of at most `len` samples
pub fn fft_size(len: usize) -> usize {
    (2 * len.max(1)).next_power_of_two()
}

fn spectrum(values: &[f64], n: usize, planner: &mut FftPlanner<f64>) -> Vec<Complex64> {
    let mut buffer: Vec<Complex64> = values
        .iter()
        .map(|v| Complex64::new(*v, 0.0))
        .chain(std::iter::repeat(Complex64::new(0.0, 0.0)))
        .take(n)
        .collect();
    planner.plan_fft_forward(n).process(&mut buffer);
    buffer
}

/// Water-level spectral division `O·conj(S) / max(|S|², (wl·max|S|)²)`
///
/// Both inputs are zero-padded to [`fft_size`] of the longer one.
pub fn spectral_division(observed: &[f64], source: &[f64], water_level: f64) -> Vec<Complex64> {
    let n = fft_size(observed.len().max(source.len()));
    let mut planner = FftPlanner::<f64>::new();
    let obs = spectrum(observed, n, &mut planner);
    let src = spectrum(source, n, &mut planner);

    let max_mag = src.iter().map(|c| c.norm()).fold(0.0, f64::max);
    let floor = (water_level * max_mag).powi(2);
    obs.iter()
        .zip(&src)
        .map(|(o, s)| {
            let denom = s.norm_sqr().max(floor);
            if denom > 0.0 {
                o * s.conj() / denom
            } else {
                Complex64::new(0.0, 0.0)
            }
        })
        .collect()
}

/// Deconvolve `source` out of `signal`
///
/// The result has [`fft_size`] samples with zero lag at the middle sample:
/// `begin = (b_signal - b_source) - (N/2)·Δt`.
pub fn water_level_decon(signal: &Signal, source: &Signal, water_level: f64) -> Result<Signal> {
    if !(water_level > 0.0 && water_level <= 1.0) {
        return Err(ModelError::InvalidInput(format!(
            "water level must be within (0, 1], got {}",
            water_level
        )));
    }
    let delta = signal.delta();
    if (delta - source.delta()).abs() > delta * 1e-9 {
        return Err(ModelError::AxisMismatch(format!(
            "deconvolution of spacing {} by {}",
            delta,
            source.delta()
        )));
    }
    if signal.is_empty() || source.is_empty() {
        return Err(ModelError::EmptyInput(
            "deconvolution needs non-empty signals".to_string(),
        ));
    }

    let mut response = spectral_division(signal.amp(), source.amp(), water_level);
    let n = response.len();
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_inverse(n).process(&mut response);

    let half = n / 2;
    let scale = 1.0 / n as f64;
    let amp = (0..n).map(|j| response[(j + half) % n].re * scale).collect();
    let begin = (signal.begin_time() - source.begin_time()) - half as f64 * delta;

    let mut out = Signal::new(delta, begin, amp)?.with_meta(signal.meta().clone());
    out.set_tag(signal.tag());
    Ok(out)
}

/// Deconvolution, Gaussian blur and band-pass as one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeconChain {
    pub water_level: f64,
    /// Blur standard deviation, seconds
    pub sigma: f64,
    pub low_corner: f64,
    pub high_corner: f64,
}

impl Default for DeconChain {
    fn default() -> Self {
        Self {
            water_level: 0.1,
            sigma: 1.27398,
            low_corner: 0.03,
            high_corner: 10000.0,
        }
    }
}

impl DeconChain {
    pub fn apply(&self, signal: &Signal, source: &Signal) -> Result<Signal> {
        let mut out = water_level_decon(signal, source, self.water_level)?;
        out.gaussian_blur(self.sigma)?;
        out.butterworth(self.low_corner, self.high_corner)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(delta: f64, begin: f64, n: usize, center: f64, sigma: f64) -> Signal {
        let amp = (0..n)
            .map(|i| {
                let t = begin + i as f64 * delta - center;
                (-t * t / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        Signal::new(delta, begin, amp).unwrap()
    }

    #[test]
    fn test_fft_size() {
        assert_eq!(fft_size(2), 4);
        assert_eq!(fft_size(5), 16);
        assert_eq!(fft_size(8), 16);
    }

    #[test]
    fn test_self_division_has_unit_magnitude() {
        let r = spectral_division(&[1.0, 0.5], &[1.0, 0.5], 1e-3);
        assert_eq!(r.len(), 4);
        for c in &r {
            assert!((c.norm() - 1.0).abs() < 1e-12);
            assert!(c.im.abs() < 1e-12);
        }
    }

    #[test]
    fn test_self_decon_is_delta_at_zero() {
        let s = Signal::new(0.5, 3.0, vec![1.0, 0.5]).unwrap();
        let r = water_level_decon(&s, &s, 1e-3).unwrap();
        assert_eq!(r.len(), 4);
        assert!((r.begin_time() + 1.0).abs() < 1e-12);
        assert!((r.amp()[2] - 1.0).abs() < 1e-12);
        assert_eq!(r.index_at(0.0), Some(2));
        for (i, v) in r.amp().iter().enumerate() {
            if i != 2 {
                assert!(v.abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_full_water_level_flattens_denominator() {
        let s = Signal::new(1.0, 0.0, vec![1.0, 0.5]).unwrap();
        let r = water_level_decon(&s, &s, 1.0).unwrap();
        assert!((r.amp()[2] - 1.25 / 2.25).abs() < 1e-12);
        assert!((r.amp()[1] - 0.5 / 2.25).abs() < 1e-12);
        assert!((r.amp()[3] - 0.5 / 2.25).abs() < 1e-12);
        assert!(r.amp()[0].abs() < 1e-12);
    }

    #[test]
    fn test_delay_recovered_as_lag() {
        let source = pulse(0.05, -10.0, 401, 0.0, 1.0);
        let observed = pulse(0.05, -10.0, 401, 2.5, 1.0);
        let r = water_level_decon(&observed, &source, 0.01).unwrap();
        assert!((r.peak_time() - 2.5).abs() < 0.051, "peak at {}", r.peak_time());
    }

    #[test]
    fn test_parameter_checks() {
        let s = Signal::new(1.0, 0.0, vec![1.0, 0.5]).unwrap();
        assert!(water_level_decon(&s, &s, 0.0).is_err());
        assert!(water_level_decon(&s, &s, 1.5).is_err());
        let other = Signal::new(0.5, 0.0, vec![1.0, 0.5]).unwrap();
        assert!(matches!(
            water_level_decon(&s, &other, 0.1),
            Err(ModelError::AxisMismatch(_))
        ));
    }

    #[test]
    fn test_chain_keeps_zero_lag_peak() {
        let source = pulse(0.1, -60.0, 1201, 0.0, 2.0);
        let chain = DeconChain::default();
        let r = chain.apply(&source, &source).unwrap();
        assert!(r.peak_time().abs() < 0.15, "peak at {}", r.peak_time());
        assert!(r.peak_amp() > 0.0);
    }
}
