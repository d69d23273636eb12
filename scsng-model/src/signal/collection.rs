//! Ordered collection of signals processed together
//!
//! A station's worth of traces for one event, or one bin's worth of traces
//! across events. Bulk operations report the indices of records that failed
//! (and tag them) instead of aborting the batch.

use super::{Signal, TAG_CUT_FAILED, TAG_NO_ARRIVAL};
use crate::error::{ModelError, Result};
use std::cmp::Ordering;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct SignalCollection {
    signals: Vec<Signal>,
}

impl SignalCollection {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self { signals }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut [Signal] {
        &mut self.signals
    }

    pub fn into_inner(self) -> Vec<Signal> {
        self.signals
    }

    pub fn push(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Signal> {
        self.signals.iter()
    }

    /// Apply an infallible operation to every signal
    pub fn apply<F: FnMut(&mut Signal)>(&mut self, f: F) {
        self.signals.iter_mut().for_each(f);
    }

    /// Apply a fallible operation to every signal, stopping at the first error
    pub fn try_apply<F: FnMut(&mut Signal) -> Result<()>>(&mut self, mut f: F) -> Result<()> {
        for signal in &mut self.signals {
            f(signal)?;
        }
        Ok(())
    }

    /// Keep signals matching `keep`; returns how many were removed
    pub fn retain<F: FnMut(&Signal) -> bool>(&mut self, keep: F) -> usize {
        let before = self.signals.len();
        self.signals.retain(keep);
        before - self.signals.len()
    }

    /// Subset matching `predicate`
    pub fn select<F: Fn(&Signal) -> bool>(&self, predicate: F) -> SignalCollection {
        Self::new(self.signals.iter().filter(|s| predicate(s)).cloned().collect())
    }

    /// Sort by epicentral distance
    pub fn sort_by_gcarc(&mut self) {
        self.signals.sort_by(|a, b| {
            a.meta()
                .gcarc
                .partial_cmp(&b.meta().gcarc)
                .unwrap_or(Ordering::Equal)
        });
    }

    pub fn interpolate(&mut self, delta: f64) -> Result<()> {
        self.try_apply(|s| s.interpolate(delta))
    }

    pub fn remove_trend(&mut self) {
        self.apply(Signal::remove_trend);
    }

    pub fn hann_taper(&mut self, percent: f64) -> Result<()> {
        self.try_apply(|s| s.hann_taper(percent))
    }

    pub fn butterworth(&mut self, low: f64, high: f64) -> Result<()> {
        self.try_apply(|s| s.butterworth(low, high))
    }

    /// Peak search around one shared time; returns indices whose window missed
    pub fn find_peak_around(&mut self, t: f64, half_width: f64) -> Vec<usize> {
        let mut failed = Vec::new();
        for (i, signal) in self.signals.iter_mut().enumerate() {
            if !signal.find_peak_around(t, half_width) {
                failed.push(i);
            }
        }
        failed
    }

    /// Peak search around one target per signal
    ///
    /// A `None` target (no predicted arrival) tags the signal as failed.
    pub fn find_peak_around_each(
        &mut self,
        targets: &[Option<f64>],
        half_width: f64,
    ) -> Result<Vec<usize>> {
        if targets.len() != self.signals.len() {
            return Err(ModelError::InvalidInput(format!(
                "{} peak targets for {} signals",
                targets.len(),
                self.signals.len()
            )));
        }
        let mut failed = Vec::new();
        for (i, (signal, target)) in self.signals.iter_mut().zip(targets).enumerate() {
            match target {
                Some(t) => {
                    if !signal.find_peak_around(*t, half_width) {
                        failed.push(i);
                    }
                }
                None => {
                    signal.set_tag(TAG_NO_ARRIVAL);
                    failed.push(i);
                }
            }
        }
        Ok(failed)
    }

    pub fn shift_time_reference_to_peak(&mut self) {
        self.apply(Signal::shift_time_reference_to_peak);
    }

    pub fn flip_peak_up(&mut self) {
        self.apply(Signal::flip_peak_up);
    }

    /// Normalize every signal; zero-peak signals are left as they are and reported
    pub fn normalize_to_peak(&mut self) -> Vec<usize> {
        let mut failed = Vec::new();
        for (i, signal) in self.signals.iter_mut().enumerate() {
            if let Err(e) = signal.normalize_to_peak() {
                warn!(error = %e, "normalization skipped");
                failed.push(i);
            }
        }
        failed
    }

    /// Cut every signal to `[t1, t2]`; failures are tagged and reported
    pub fn check_and_cut_to_window(&mut self, t1: f64, t2: f64) -> Vec<usize> {
        let mut failed = Vec::new();
        for (i, signal) in self.signals.iter_mut().enumerate() {
            if !signal.check_and_cut_to_window(t1, t2) {
                signal.set_tag(TAG_CUT_FAILED);
                failed.push(i);
            }
        }
        failed
    }

    pub fn mask(&mut self, t1: f64, t2: f64) {
        self.apply(|s| s.mask(t1, t2));
    }

    /// Mask every signal except those at the `excluded` indices
    pub fn mask_except(&mut self, t1: f64, t2: f64, excluded: &[usize]) {
        for (i, signal) in self.signals.iter_mut().enumerate() {
            if !excluded.contains(&i) {
                signal.mask(t1, t2);
            }
        }
    }

    pub fn gaussian_blur(&mut self, sigma: f64) -> Result<()> {
        self.try_apply(|s| s.gaussian_blur(sigma))
    }

    pub fn flip_reverse_sum(&mut self, t0: f64) -> Result<()> {
        self.try_apply(|s| s.flip_reverse_sum(t0))
    }

    /// Number of signals with a non-zero tag
    pub fn tagged_count(&self) -> usize {
        self.signals.iter().filter(|s| s.tag() != 0).count()
    }
}

impl From<Vec<Signal>> for SignalCollection {
    fn from(signals: Vec<Signal>) -> Self {
        Self::new(signals)
    }
}

impl<'a> IntoIterator for &'a SignalCollection {
    type Item = &'a Signal;
    type IntoIter = std::slice::Iter<'a, Signal>;

    fn into_iter(self) -> Self::IntoIter {
        self.signals.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::TraceMeta;

    fn trace(gcarc: f64, begin: f64) -> Signal {
        Signal::new(1.0, begin, vec![0.0, 1.0, 3.0, 1.0, 0.0])
            .unwrap()
            .with_meta(TraceMeta {
                gcarc,
                station: format!("ST{}", gcarc),
                ..Default::default()
            })
    }

    #[test]
    fn test_sort_by_gcarc() {
        let mut c = SignalCollection::new(vec![trace(60.0, 0.0), trace(45.0, 0.0), trace(50.0, 0.0)]);
        c.sort_by_gcarc();
        let distances: Vec<f64> = c.iter().map(|s| s.meta().gcarc).collect();
        assert_eq!(distances, vec![45.0, 50.0, 60.0]);
    }

    #[test]
    fn test_cut_failures_are_tagged() {
        let mut c = SignalCollection::new(vec![trace(45.0, -2.0), trace(50.0, 10.0)]);
        let failed = c.check_and_cut_to_window(-1.0, 1.0);
        assert_eq!(failed, vec![1]);
        assert_eq!(c.signals()[1].tag(), TAG_CUT_FAILED);
        assert_eq!(c.signals()[0].len(), 3);
        assert_eq!(c.tagged_count(), 1);
    }

    #[test]
    fn test_find_peak_around_each_requires_matching_targets() {
        let mut c = SignalCollection::new(vec![trace(45.0, 0.0), trace(50.0, 0.0)]);
        assert!(c.find_peak_around_each(&[Some(2.0)], 1.0).is_err());

        let failed = c.find_peak_around_each(&[Some(2.0), None], 1.0).unwrap();
        assert_eq!(failed, vec![1]);
        assert_eq!(c.signals()[1].tag(), TAG_NO_ARRIVAL);
        assert_eq!(c.signals()[0].peak_index(), 2);
    }

    #[test]
    fn test_mask_except_skips_excluded() {
        let mut c = SignalCollection::new(vec![trace(45.0, 0.0), trace(50.0, 0.0)]);
        c.mask_except(0.0, 4.0, &[1]);
        assert!(c.signals()[0].amp().iter().all(|v| *v == 0.0));
        assert_eq!(c.signals()[1].amp()[2], 3.0);
    }

    #[test]
    fn test_retain_by_tag() {
        let mut c = SignalCollection::new(vec![trace(45.0, 0.0), trace(50.0, 0.0)]);
        c.signals_mut()[0].set_tag(1);
        assert_eq!(c.retain(|s| s.tag() == 0), 1);
        assert_eq!(c.len(), 1);
    }
}
