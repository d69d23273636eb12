//! Flip-reverse-sum
//!
//! Folds the negative-time branch onto the positive-time branch around
//! `t0`: `out(τ) = amp(t0 + τ) - amp(t0 - τ)`. A pulse that is even about
//! `t0` cancels; odd (asymmetric) energy survives doubled.

use crate::error::{ModelError, Result};
use crate::signal::Signal;

/// Folded samples around index `i0`
pub fn fold(amp: &[f64], i0: usize) -> Vec<f64> {
    if i0 >= amp.len() {
        return Vec::new();
    }
    let n = i0.min(amp.len() - 1 - i0) + 1;
    (0..n).map(|k| amp[i0 + k] - amp[i0 - k]).collect()
}

impl Signal {
    /// Replace the signal by its flip-reverse-sum about `t0`
    ///
    /// The result begins at the sample nearest `t0` and is as long as the
    /// shorter of the two branches.
    pub fn flip_reverse_sum(&mut self, t0: f64) -> Result<()> {
        let i0 = self.index_at(t0).ok_or_else(|| {
            ModelError::InvalidInput(format!(
                "FRS reference {} outside [{}, {}]",
                t0,
                self.begin_time(),
                self.end_time()
            ))
        })?;
        let mut folded = Signal::new(self.delta(), self.time_at(i0), fold(self.amp(), i0))?
            .with_meta(self.meta().clone());
        folded.set_tag(self.tag());
        *self = folded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn even_pulse() -> Signal {
        let amp = (0..401)
            .map(|i| {
                let t = (i as f64 - 200.0) * 0.05;
                (-t * t / 2.0).exp() + 0.3 * (-(t * t) / 18.0).exp()
            })
            .collect();
        Signal::new(0.05, -10.0, amp).unwrap()
    }

    #[test]
    fn test_symmetric_pulse_cancels() {
        let mut s = even_pulse();
        s.flip_reverse_sum(0.0).unwrap();
        assert_eq!(s.len(), 201);
        assert!(s.begin_time().abs() < 1e-9);
        assert!(s.amp().iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_odd_perturbation_is_doubled() {
        let base = even_pulse();
        let perturbation = |t: f64| 0.1 * t * (-t * t / 4.0).exp();
        let amp: Vec<f64> = base
            .amp()
            .iter()
            .enumerate()
            .map(|(i, v)| v + perturbation(base.time_at(i)))
            .collect();
        let mut s = Signal::new(0.05, -10.0, amp).unwrap();
        s.flip_reverse_sum(0.0).unwrap();

        for (k, v) in s.amp().iter().enumerate() {
            let tau = k as f64 * 0.05;
            assert!((v - 2.0 * perturbation(tau)).abs() < 1e-9, "k={}", k);
        }
    }

    #[test]
    fn test_off_center_reference_uses_shorter_branch() {
        let mut s = Signal::new(1.0, 0.0, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        s.flip_reverse_sum(1.0).unwrap();
        assert_eq!(s.amp(), &[0.0, 2.0]);
        assert_eq!(s.begin_time(), 1.0);
    }

    #[test]
    fn test_reference_outside_signal_is_error() {
        let mut s = even_pulse();
        assert!(s.flip_reverse_sum(50.0).is_err());
    }
}
