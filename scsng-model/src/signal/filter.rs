//! Butterworth filtering
//!
//! Second-order sections in Direct Form II Transposed. Band-pass is a
//! cascade of a high-pass at the low corner and a low-pass at the high
//! corner; `filtfilt` runs the cascade forward and backward for zero phase.

use crate::error::{ModelError, Result};
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Second-order IIR section
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    /// Numerator coefficients [b0, b1, b2]
    b: [f64; 3],
    /// Denominator coefficients [a1, a2] (a0 normalized to 1)
    a: [f64; 2],
    /// Filter state
    state: [f64; 2],
}

impl Biquad {
    /// Create a biquad from normalized coefficients
    pub fn new(b: [f64; 3], a: [f64; 2]) -> Self {
        Self {
            b,
            a,
            state: [0.0; 2],
        }
    }

    /// Low-pass section via the bilinear transform with frequency pre-warping
    pub fn lowpass(corner_hz: f64, sample_rate: f64, q: f64) -> Self {
        let k = (PI * corner_hz / sample_rate).tan();
        let norm = 1.0 / (1.0 + k / q + k * k);
        let b0 = k * k * norm;
        Self::new(
            [b0, 2.0 * b0, b0],
            [2.0 * (k * k - 1.0) * norm, (1.0 - k / q + k * k) * norm],
        )
    }

    /// High-pass section via the bilinear transform with frequency pre-warping
    pub fn highpass(corner_hz: f64, sample_rate: f64, q: f64) -> Self {
        let k = (PI * corner_hz / sample_rate).tan();
        let norm = 1.0 / (1.0 + k / q + k * k);
        Self::new(
            [norm, -2.0 * norm, norm],
            [2.0 * (k * k - 1.0) * norm, (1.0 - k / q + k * k) * norm],
        )
    }

    /// Process a single sample
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b[0] * input + self.state[0];
        self.state[0] = self.b[1] * input - self.a[0] * output + self.state[1];
        self.state[1] = self.b[2] * input - self.a[1] * output;
        output
    }

    pub fn reset(&mut self) {
        self.state = [0.0; 2];
    }
}

/// Zero-phase Butterworth band-pass, low-pass or high-pass
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    sections: Vec<Biquad>,
}

impl ButterworthFilter {
    /// Design the filter for corners `low`/`high` (Hz) at sample spacing `delta`
    ///
    /// `low == 0` designs a low-pass only; `high` at or above Nyquist designs
    /// a high-pass only.
    pub fn design(low: f64, high: f64, delta: f64) -> Result<Self> {
        if !(delta > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "sample spacing must be positive, got {}",
                delta
            )));
        }
        if low < 0.0 || low >= high {
            return Err(ModelError::InvalidInput(format!(
                "degenerate filter band [{}, {}]",
                low, high
            )));
        }

        let sample_rate = 1.0 / delta;
        let nyquist = sample_rate / 2.0;
        if low >= nyquist {
            return Err(ModelError::InvalidInput(format!(
                "low corner {} Hz at or above Nyquist {} Hz",
                low, nyquist
            )));
        }

        let mut sections = Vec::with_capacity(2);
        if low > 0.0 {
            sections.push(Biquad::highpass(low, sample_rate, FRAC_1_SQRT_2));
        }
        if high < nyquist {
            sections.push(Biquad::lowpass(high, sample_rate, FRAC_1_SQRT_2));
        }
        if sections.is_empty() {
            return Err(ModelError::InvalidInput(format!(
                "filter band [{}, {}] passes everything",
                low, high
            )));
        }
        Ok(Self { sections })
    }

    /// Single forward pass over `data`
    pub fn apply(&mut self, data: &mut [f64]) {
        for section in &mut self.sections {
            section.reset();
            for v in data.iter_mut() {
                *v = section.process(*v);
            }
        }
    }

    /// Forward then backward pass (zero phase, squared magnitude response)
    pub fn filtfilt(&mut self, data: &mut [f64]) {
        self.apply(data);
        data.reverse();
        self.apply(data);
        data.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, delta: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 * delta).sin())
            .collect()
    }

    fn max_abs(values: &[f64]) -> f64 {
        values.iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    #[test]
    fn test_lowpass_keeps_passband() {
        let delta = 0.025;
        let input = sine(0.2, delta, 8000);
        let mut output = input.clone();
        let mut filter = ButterworthFilter::design(0.0, 1.0, delta).unwrap();
        filter.filtfilt(&mut output);

        // Middle of the record, away from edge transients
        let err = max_abs(
            &input[2000..6000]
                .iter()
                .zip(&output[2000..6000])
                .map(|(a, b)| a - b)
                .collect::<Vec<_>>(),
        );
        assert!(err < 0.01, "passband error {}", err);
    }

    #[test]
    fn test_lowpass_rejects_stopband() {
        let delta = 0.025;
        let mut output = sine(10.0, delta, 8000);
        let mut filter = ButterworthFilter::design(0.0, 1.0, delta).unwrap();
        filter.filtfilt(&mut output);
        assert!(max_abs(&output[2000..6000]) < 0.01);
    }

    #[test]
    fn test_highpass_removes_dc() {
        let delta = 0.025;
        let mut output = vec![1.0; 20000];
        let mut filter = ButterworthFilter::design(0.03, 10000.0, delta).unwrap();
        filter.filtfilt(&mut output);
        assert!(max_abs(&output[8000..12000]) < 0.01);
    }

    #[test]
    fn test_degenerate_band_is_error() {
        assert!(ButterworthFilter::design(0.3, 0.03, 0.025).is_err());
        assert!(ButterworthFilter::design(0.3, 0.3, 0.025).is_err());
        assert!(ButterworthFilter::design(-0.1, 0.3, 0.025).is_err());
        assert!(ButterworthFilter::design(0.0, 100.0, 0.025).is_err());
    }

    #[test]
    fn test_zero_phase_keeps_pulse_centered() {
        let delta = 0.025;
        let n = 4001;
        let mut data: Vec<f64> = (0..n)
            .map(|i| {
                let t = (i as f64 - 2000.0) * delta;
                (-t * t / 2.0).exp()
            })
            .collect();
        let mut filter = ButterworthFilter::design(0.033, 0.3, delta).unwrap();
        filter.filtfilt(&mut data);
        let peak = crate::signal::max_abs_index(&data);
        assert!((peak as i64 - 2000).abs() <= 1, "peak moved to {}", peak);
    }
}
