//! Evenly-sampled seismic signal
//!
//! A [`Signal`] maps sample index `i` to time `begin_time + i·delta`. Every
//! windowing, shifting and peak operation goes through that mapping and
//! clips to `[0, len)`; window edges that fall on the sample grid are
//! inclusive (index lookups use a small tolerance).
//!
//! Operations that can fail on a single record in a batch (peak search,
//! window cuts) report through a `bool` and the signal's tag instead of an
//! error so batch loops can flag and continue.

pub mod collection;
pub mod filter;

pub use collection::SignalCollection;

use crate::error::{ModelError, Result};
use std::collections::BTreeMap;
use std::ops::{Add, Div, Mul, Neg};
use std::path::PathBuf;

/// Record is usable
pub const TAG_OK: i32 = 0;
/// Peak moved away from the reference time after processing
pub const TAG_PEAK_SHIFTED: i32 = 1;
/// Peak search window did not overlap the samples
pub const TAG_PEAK_WINDOW: i32 = 2;
/// Window cut failed
pub const TAG_CUT_FAILED: i32 = 3;
/// No predicted arrival for the requested phase
pub const TAG_NO_ARRIVAL: i32 = 4;
/// Located peak is not a local maximum
pub const TAG_PEAK_NOT_LOCAL: i32 = 5;
/// Peak amplitude is zero, so the trace cannot be normalized
pub const TAG_ZERO_PEAK: i32 = 6;

/// Fraction of a sample tolerated when mapping times to indices
const INDEX_TOLERANCE: f64 = 1e-6;

/// Station/event metadata carried with a trace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceMeta {
    /// File the trace was loaded from
    pub file: Option<PathBuf>,
    /// Station name
    pub station: String,
    /// Event identifier
    pub event: String,
    /// Epicentral distance in degrees
    pub gcarc: f64,
    /// Source depth in km
    pub depth: f64,
    /// Predicted arrival times by phase name (seconds, trace time axis)
    pub arrivals: BTreeMap<String, f64>,
}

impl TraceMeta {
    /// Composite record key `"{event}_{station}"`
    pub fn pair_name(&self) -> String {
        format!("{}_{}", self.event, self.station)
    }
}

/// Evenly-sampled time series
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    delta: f64,
    begin_time: f64,
    amp: Vec<f64>,
    peak: Option<usize>,
    tag: i32,
    meta: TraceMeta,
}

impl Signal {
    /// Create new signal
    ///
    /// # Arguments
    /// * `delta` - Sample spacing in seconds (> 0)
    /// * `begin_time` - Time of the first sample in seconds
    /// * `amp` - Amplitudes
    pub fn new(delta: f64, begin_time: f64, amp: Vec<f64>) -> Result<Self> {
        if !(delta.is_finite() && delta > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "sample spacing must be positive, got {}",
                delta
            )));
        }
        Ok(Self {
            delta,
            begin_time,
            amp,
            peak: None,
            tag: TAG_OK,
            meta: TraceMeta::default(),
        })
    }

    /// Unit-peak Gaussian pulse of `n` samples centered at sample `n/2`, begin time 0
    pub fn gaussian(n: usize, delta: f64, sigma: f64) -> Result<Self> {
        if !(sigma > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "gaussian sigma must be positive, got {}",
                sigma
            )));
        }
        let center = (n / 2) as f64 * delta;
        let amp = (0..n)
            .map(|i| {
                let t = i as f64 * delta - center;
                (-t * t / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        Self::new(delta, 0.0, amp)
    }

    /// Attach metadata
    pub fn with_meta(mut self, meta: TraceMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn begin_time(&self) -> f64 {
        self.begin_time
    }

    /// Time of the last sample
    pub fn end_time(&self) -> f64 {
        self.time_at(self.amp.len().saturating_sub(1))
    }

    pub fn len(&self) -> usize {
        self.amp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amp.is_empty()
    }

    pub fn amp(&self) -> &[f64] {
        &self.amp
    }

    /// Mutable samples; clears the located peak
    pub fn amp_mut(&mut self) -> &mut [f64] {
        self.peak = None;
        &mut self.amp
    }

    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.tag = tag;
    }

    pub fn meta(&self) -> &TraceMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut TraceMeta {
        &mut self.meta
    }

    /// Time of sample `i`
    pub fn time_at(&self, i: usize) -> f64 {
        self.begin_time + i as f64 * self.delta
    }

    fn fractional_index(&self, t: f64) -> f64 {
        (t - self.begin_time) / self.delta
    }

    /// First sample index at or after `t` (may lie outside the signal)
    fn index_ceil(&self, t: f64) -> i64 {
        (self.fractional_index(t) - INDEX_TOLERANCE).ceil() as i64
    }

    /// Last sample index at or before `t` (may lie outside the signal)
    fn index_floor(&self, t: f64) -> i64 {
        (self.fractional_index(t) + INDEX_TOLERANCE).floor() as i64
    }

    /// Index of the sample nearest to `t`, if inside the signal
    pub fn index_at(&self, t: f64) -> Option<usize> {
        let i = self.fractional_index(t).round();
        if i >= 0.0 && (i as usize) < self.amp.len() {
            Some(i as usize)
        } else {
            None
        }
    }

    /// Inclusive index range covering `[t1, t2]`, clipped to the signal
    pub(crate) fn window_range(&self, t1: f64, t2: f64) -> Option<(usize, usize)> {
        if self.amp.is_empty() {
            return None;
        }
        let lo = self.index_ceil(t1).max(0);
        let hi = self.index_floor(t2).min(self.amp.len() as i64 - 1);
        if lo > hi {
            None
        } else {
            Some((lo as usize, hi as usize))
        }
    }

    /// Samples inside `[t1, t2]`, clipped to the signal
    pub fn window_values(&self, t1: f64, t2: f64) -> &[f64] {
        match self.window_range(t1, t2) {
            Some((lo, hi)) => &self.amp[lo..=hi],
            None => &[],
        }
    }

    /// Whether `[t1, t2]` is fully covered by samples
    pub fn covers(&self, t1: f64, t2: f64) -> bool {
        !self.amp.is_empty()
            && t1 <= t2
            && self.index_ceil(t1) >= 0
            && self.index_floor(t2) <= self.amp.len() as i64 - 1
    }

    /// Linearly interpolated amplitude at `t`; zero outside the signal
    pub fn value_at(&self, t: f64) -> f64 {
        let n = self.amp.len();
        if n == 0 {
            return 0.0;
        }
        let x = self.fractional_index(t);
        if x < -INDEX_TOLERANCE || x > (n - 1) as f64 + INDEX_TOLERANCE {
            return 0.0;
        }
        let x = x.clamp(0.0, (n - 1) as f64);
        let i = x.floor() as usize;
        if i + 1 >= n {
            return self.amp[n - 1];
        }
        let frac = x - i as f64;
        self.amp[i] + (self.amp[i + 1] - self.amp[i]) * frac
    }

    /// Resample to a new sample spacing
    pub fn interpolate(&mut self, new_delta: f64) -> Result<()> {
        if !(new_delta.is_finite() && new_delta > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "interpolation spacing must be positive, got {}",
                new_delta
            )));
        }
        if self.amp.len() < 2 {
            return Err(ModelError::InvalidInput(
                "interpolation needs at least 2 samples".to_string(),
            ));
        }
        let span = self.end_time() - self.begin_time;
        let n = (span / new_delta + INDEX_TOLERANCE).floor() as usize + 1;
        let amp = (0..n)
            .map(|i| self.value_at(self.begin_time + i as f64 * new_delta))
            .collect();
        self.amp = amp;
        self.delta = new_delta;
        self.peak = None;
        Ok(())
    }

    /// Subtract the least-squares line fitted over sample index
    pub fn remove_trend(&mut self) {
        let n = self.amp.len();
        if n == 0 {
            return;
        }
        let x_mean = (n - 1) as f64 / 2.0;
        let y_mean = self.amp.iter().sum::<f64>() / n as f64;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (i, &y) in self.amp.iter().enumerate() {
            let dx = i as f64 - x_mean;
            sxy += dx * (y - y_mean);
            sxx += dx * dx;
        }
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        for (i, y) in self.amp.iter_mut().enumerate() {
            *y -= y_mean + slope * (i as f64 - x_mean);
        }
    }

    /// Hann taper on the first and last `percent`% of samples
    ///
    /// Repeated calls compound.
    pub fn hann_taper(&mut self, percent: f64) -> Result<()> {
        if !(0.0..=50.0).contains(&percent) {
            return Err(ModelError::InvalidInput(format!(
                "taper percentage must be within [0, 50], got {}",
                percent
            )));
        }
        let n = self.amp.len();
        let m = (n as f64 * percent / 100.0).floor() as usize;
        for i in 0..m {
            let w = 0.5 * (1.0 - (std::f64::consts::PI * i as f64 / m as f64).cos());
            self.amp[i] *= w;
            self.amp[n - 1 - i] *= w;
        }
        Ok(())
    }

    /// Zero-phase Butterworth filter
    ///
    /// `low == 0` gives a low-pass at `high`; `high` at or above Nyquist gives
    /// a high-pass at `low`.
    pub fn butterworth(&mut self, low: f64, high: f64) -> Result<()> {
        let mut design = filter::ButterworthFilter::design(low, high, self.delta)?;
        design.filtfilt(&mut self.amp);
        self.peak = None;
        Ok(())
    }

    /// Locate the maximum |amplitude| within `[t - half_width, t + half_width]`
    ///
    /// Returns false and tags the signal when the window misses the samples.
    pub fn find_peak_around(&mut self, t: f64, half_width: f64) -> bool {
        match self.window_range(t - half_width, t + half_width) {
            Some((lo, hi)) => {
                self.peak = Some(max_abs_index(&self.amp[lo..=hi]) + lo);
                true
            }
            None => {
                self.tag = TAG_PEAK_WINDOW;
                false
            }
        }
    }

    /// Index of the located peak, or of the maximum |amplitude| when none was located
    ///
    /// Zero for an empty signal.
    pub fn peak_index(&self) -> usize {
        match self.peak {
            Some(i) if i < self.amp.len() => i,
            _ => max_abs_index(&self.amp),
        }
    }

    pub fn peak_time(&self) -> f64 {
        self.time_at(self.peak_index())
    }

    pub fn peak_amp(&self) -> f64 {
        self.amp.get(self.peak_index()).copied().unwrap_or(0.0)
    }

    /// Whether no immediate neighbour exceeds the located peak in |amplitude|
    pub fn is_local_peak(&self) -> bool {
        let p = self.peak_index();
        let peak = self.peak_amp().abs();
        let left = p.checked_sub(1).and_then(|i| self.amp.get(i));
        let right = self.amp.get(p + 1);
        left.into_iter().chain(right).all(|v| v.abs() <= peak)
    }

    /// Move the time origin to the located peak
    pub fn shift_time_reference_to_peak(&mut self) {
        let peak_time = self.peak_time();
        self.shift_time(-peak_time);
    }

    /// Translate the time axis by `dt` without resampling
    ///
    /// Predicted arrivals in the metadata move with the axis.
    pub fn shift_time(&mut self, dt: f64) {
        self.begin_time += dt;
        self.meta.arrivals.values_mut().for_each(|t| *t += dt);
    }

    /// Negate when the peak amplitude is negative
    pub fn flip_peak_up(&mut self) {
        if self.peak_amp() < 0.0 {
            self.amp.iter_mut().for_each(|v| *v = -*v);
        }
    }

    /// Divide by |peak amplitude|
    pub fn normalize_to_peak(&mut self) -> Result<()> {
        let peak = self.peak_amp().abs();
        if peak == 0.0 {
            return Err(ModelError::ZeroPeak(self.describe()));
        }
        self.amp.iter_mut().for_each(|v| *v /= peak);
        Ok(())
    }

    /// Truncate to `[t1, t2]`
    ///
    /// Returns false without touching the signal when the window is not fully
    /// covered or is degenerate.
    pub fn check_and_cut_to_window(&mut self, t1: f64, t2: f64) -> bool {
        if !(t1 < t2) || !self.covers(t1, t2) {
            return false;
        }
        let lo = self.index_ceil(t1) as usize;
        let hi = self.index_floor(t2) as usize;
        self.begin_time = self.time_at(lo);
        self.amp = self.amp[lo..=hi].to_vec();
        self.peak = self
            .peak
            .filter(|&p| p >= lo && p <= hi)
            .map(|p| p - lo);
        true
    }

    /// Truncate to the part of `[t1, t2]` the samples cover
    ///
    /// Returns false without touching the signal when nothing overlaps.
    pub fn cut_to_overlap(&mut self, t1: f64, t2: f64) -> bool {
        let lo = self.begin_time.max(t1);
        let hi = self.end_time().min(t2);
        lo < hi && self.check_and_cut_to_window(lo, hi)
    }

    /// Contiguous index run around the peak where `amp·sign(peak) >= fraction·|peak|`
    pub fn find_amp_level(&self, fraction: f64) -> (usize, usize) {
        let p = self.peak_index();
        let peak = self.peak_amp();
        if self.amp.is_empty() {
            return (0, 0);
        }
        let sign = if peak < 0.0 { -1.0 } else { 1.0 };
        let level = fraction * peak.abs();

        let mut left = p;
        while left > 0 && self.amp[left - 1] * sign >= level {
            left -= 1;
        }
        let mut right = p;
        while right + 1 < self.amp.len() && self.amp[right + 1] * sign >= level {
            right += 1;
        }
        (left, right)
    }

    /// Width in seconds of the `find_amp_level(fraction)` run
    pub fn amp_level_width(&self, fraction: f64) -> f64 {
        let (left, right) = self.find_amp_level(fraction);
        self.delta * (right - left) as f64
    }

    /// Zero samples inside `[t1, t2]`
    pub fn mask(&mut self, t1: f64, t2: f64) {
        if let Some((lo, hi)) = self.window_range(t1, t2) {
            self.amp[lo..=hi].iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// Time-dilate about the origin onto the same axis
    ///
    /// The value at `t` is the original value at `t / factor`; `factor > 1`
    /// broadens the waveform.
    pub fn stretch(&self, factor: f64) -> Result<Signal> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "stretch factor must be positive, got {}",
                factor
            )));
        }
        let mut out = self.clone();
        out.peak = None;
        for (i, v) in out.amp.iter_mut().enumerate() {
            *v = self.value_at(self.time_at(i) / factor);
        }
        Ok(out)
    }

    /// Convolve with a normalized Gaussian of standard deviation `sigma` seconds
    ///
    /// The kernel is truncated at ±4σ; samples past the ends count as zero.
    pub fn gaussian_blur(&mut self, sigma: f64) -> Result<()> {
        if !(sigma > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "blur sigma must be positive, got {}",
                sigma
            )));
        }
        let half = (4.0 * sigma / self.delta).ceil() as i64;
        let kernel: Vec<f64> = (-half..=half)
            .map(|j| {
                let t = j as f64 * self.delta;
                (-t * t / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let norm: f64 = kernel.iter().sum();

        let n = self.amp.len() as i64;
        let blurred = (0..n)
            .map(|i| {
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    let j = i + k as i64 - half;
                    if j >= 0 && j < n {
                        acc += w * self.amp[j as usize];
                    }
                }
                acc / norm
            })
            .collect();
        self.amp = blurred;
        self.peak = None;
        Ok(())
    }

    /// `Σ|amp|^p` over samples inside `[t1, t2]`
    pub fn sum_area(&self, t1: f64, t2: f64, p: f64) -> f64 {
        self.window_values(t1, t2).iter().map(|v| v.abs().powf(p)).sum()
    }

    fn check_delta(&self, other: &Signal) -> Result<()> {
        if (self.delta - other.delta).abs() > self.delta * 1e-9 {
            return Err(ModelError::AxisMismatch(format!(
                "sample spacing {} vs {}",
                self.delta, other.delta
            )));
        }
        Ok(())
    }

    /// Add `other`, interpolated onto this signal's axis (zero outside its span)
    pub fn add_signal(&mut self, other: &Signal) -> Result<()> {
        self.check_delta(other)?;
        for i in 0..self.amp.len() {
            let t = self.time_at(i);
            self.amp[i] += other.value_at(t);
        }
        Ok(())
    }

    /// Subtract `other`, interpolated onto this signal's axis
    pub fn subtract_signal(&mut self, other: &Signal) -> Result<()> {
        self.check_delta(other)?;
        for i in 0..self.amp.len() {
            let t = self.time_at(i);
            self.amp[i] -= other.value_at(t);
        }
        Ok(())
    }

    /// `self - other` on this signal's axis
    pub fn difference(&self, other: &Signal) -> Result<Signal> {
        let mut out = self.clone();
        out.subtract_signal(other)?;
        Ok(out)
    }

    /// Multiply every sample by `factor`
    pub fn scale(&mut self, factor: f64) {
        self.amp.iter_mut().for_each(|v| *v *= factor);
    }

    fn describe(&self) -> String {
        match &self.meta.file {
            Some(file) => file.display().to_string(),
            None if !self.meta.station.is_empty() => self.meta.pair_name(),
            None => format!("signal at {:.3}s", self.begin_time),
        }
    }
}

/// Index of the maximum |value| (first on ties), 0 when empty
pub(crate) fn max_abs_index(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.iter().enumerate() {
        if v.abs() > best_value {
            best = i;
            best_value = v.abs();
        }
    }
    best
}

impl Mul<f64> for Signal {
    type Output = Signal;

    fn mul(mut self, rhs: f64) -> Signal {
        self.scale(rhs);
        self
    }
}

impl Mul<f64> for &Signal {
    type Output = Signal;

    fn mul(self, rhs: f64) -> Signal {
        self.clone() * rhs
    }
}

impl Div<f64> for Signal {
    type Output = Signal;

    fn div(mut self, rhs: f64) -> Signal {
        self.scale(1.0 / rhs);
        self
    }
}

/// DC offset
impl Add<f64> for Signal {
    type Output = Signal;

    fn add(mut self, rhs: f64) -> Signal {
        self.amp.iter_mut().for_each(|v| *v += rhs);
        self
    }
}

impl Neg for Signal {
    type Output = Signal;

    fn neg(self) -> Signal {
        self * -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, delta: f64, begin: f64) -> Signal {
        Signal::new(delta, begin, (0..n).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_new_rejects_non_positive_delta() {
        assert!(Signal::new(0.0, 0.0, vec![1.0]).is_err());
        assert!(Signal::new(-0.1, 0.0, vec![1.0]).is_err());
    }

    #[test]
    fn test_time_mapping() {
        let s = ramp(11, 0.5, -2.5);
        assert_eq!(s.time_at(0), -2.5);
        assert_eq!(s.end_time(), 2.5);
        assert_eq!(s.index_at(0.0), Some(5));
        assert_eq!(s.index_at(10.0), None);
    }

    #[test]
    fn test_value_at_interpolates() {
        let s = ramp(5, 1.0, 0.0);
        assert!((s.value_at(1.5) - 1.5).abs() < 1e-12);
        assert_eq!(s.value_at(-1.0), 0.0);
        assert_eq!(s.value_at(4.0), 4.0);
    }

    #[test]
    fn test_interpolate_halves_spacing() {
        let mut s = ramp(5, 1.0, 0.0);
        s.interpolate(0.5).unwrap();
        assert_eq!(s.len(), 9);
        assert!((s.amp()[3] - 1.5).abs() < 1e-12);
        assert!(s.interpolate(0.0).is_err());

        let mut short = Signal::new(1.0, 0.0, vec![1.0]).unwrap();
        assert!(short.interpolate(0.5).is_err());
    }

    #[test]
    fn test_remove_trend_removes_line() {
        let mut s = Signal::new(1.0, 0.0, (0..20).map(|i| 3.0 + 0.5 * i as f64).collect()).unwrap();
        s.remove_trend();
        assert!(s.amp().iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_hann_taper_zeroes_edges() {
        let mut s = Signal::new(1.0, 0.0, vec![1.0; 100]).unwrap();
        s.hann_taper(10.0).unwrap();
        assert_eq!(s.amp()[0], 0.0);
        assert_eq!(s.amp()[99], 0.0);
        assert_eq!(s.amp()[50], 1.0);
        assert!(s.amp()[5] > 0.0 && s.amp()[5] < 1.0);
        assert!(s.hann_taper(60.0).is_err());
    }

    #[test]
    fn test_find_peak_and_shift() {
        let mut s = Signal::new(0.1, 10.0, vec![0.0, 1.0, -3.0, 0.5, 2.0, 0.0]).unwrap();
        assert!(s.find_peak_around(10.4, 0.1));
        assert_eq!(s.peak_index(), 4);
        s.shift_time_reference_to_peak();
        assert!(s.peak_time().abs() < 1e-12);
        assert!((s.begin_time() + 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_arrivals_follow_time_shifts() {
        let mut meta = TraceMeta::default();
        meta.arrivals.insert("S".to_string(), 10.2);
        meta.arrivals.insert("ScS".to_string(), 12.0);
        let mut s = Signal::new(0.1, 10.0, vec![0.0, 1.0, 3.0, 1.0, 0.0])
            .unwrap()
            .with_meta(meta);
        s.shift_time_reference_to_peak();
        assert!(s.meta().arrivals["S"].abs() < 1e-12);
        assert!((s.meta().arrivals["ScS"] - 1.8).abs() < 1e-12);
        s.shift_time(5.0);
        assert!((s.meta().arrivals["S"] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_find_peak_outside_tags_signal() {
        let mut s = ramp(10, 1.0, 0.0);
        assert!(!s.find_peak_around(100.0, 5.0));
        assert_eq!(s.tag(), TAG_PEAK_WINDOW);
    }

    #[test]
    fn test_peak_defaults_to_max_abs() {
        let s = Signal::new(1.0, 0.0, vec![0.5, -2.0, 1.0]).unwrap();
        assert_eq!(s.peak_index(), 1);
        assert_eq!(s.peak_amp(), -2.0);
    }

    #[test]
    fn test_flip_and_normalize() {
        let mut s = Signal::new(1.0, 0.0, vec![0.5, -2.0, 1.0]).unwrap();
        s.flip_peak_up();
        s.normalize_to_peak().unwrap();
        assert_eq!(s.amp(), &[-0.25, 1.0, -0.5]);

        let mut zero = Signal::new(1.0, 0.0, vec![0.0; 4]).unwrap();
        assert!(matches!(zero.normalize_to_peak(), Err(ModelError::ZeroPeak(_))));
    }

    #[test]
    fn test_check_and_cut_to_window() {
        let mut s = ramp(101, 0.1, -5.0);
        assert!(s.check_and_cut_to_window(-1.0, 1.0));
        assert_eq!(s.len(), 21);
        assert!((s.begin_time() + 1.0).abs() < 1e-9);
        assert!((s.amp()[0] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_check_and_cut_uncovered_leaves_signal() {
        let mut s = ramp(11, 1.0, 0.0);
        let before = s.clone();
        assert!(!s.check_and_cut_to_window(-1.0, 5.0));
        assert!(!s.check_and_cut_to_window(5.0, 11.0));
        assert!(!s.check_and_cut_to_window(5.0, 5.0));
        assert_eq!(s, before);
    }

    #[test]
    fn test_cut_to_overlap_clips_window() {
        let mut s = ramp(11, 1.0, 0.0);
        assert!(s.cut_to_overlap(-5.0, 4.0));
        assert_eq!(s.len(), 5);
        assert_eq!(s.begin_time(), 0.0);
        assert!(!s.cut_to_overlap(20.0, 30.0));
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn test_find_amp_level_on_triangle() {
        let s = Signal::new(1.0, 0.0, vec![0.0, 0.25, 0.5, 1.0, 0.5, 0.25, 0.0]).unwrap();
        assert_eq!(s.find_amp_level(0.5), (2, 4));
        assert_eq!(s.amp_level_width(0.5), 2.0);
    }

    #[test]
    fn test_mask_zeroes_range() {
        let mut s = Signal::new(1.0, -2.0, vec![1.0; 5]).unwrap();
        s.mask(0.0, 1.0);
        assert_eq!(s.amp(), &[1.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_stretch_doubles_width() {
        let s = Signal::gaussian(801, 0.025, 1.0).unwrap();
        let mut centered = s.clone();
        centered.shift_time(-10.0);
        let wide = centered.stretch(2.0).unwrap();
        let ratio = wide.amp_level_width(0.5) / centered.amp_level_width(0.5);
        assert!((ratio - 2.0).abs() < 0.05, "ratio {}", ratio);
        assert!(centered.stretch(0.0).is_err());
    }

    #[test]
    fn test_gaussian_blur_preserves_area() {
        let mut s = Signal::new(0.1, -10.0, vec![0.0; 201]).unwrap();
        s.amp_mut()[100] = 1.0;
        s.gaussian_blur(1.0).unwrap();
        let area: f64 = s.amp().iter().sum();
        assert!((area - 1.0).abs() < 1e-9);
        assert_eq!(s.peak_index(), 100);
    }

    #[test]
    fn test_arithmetic_requires_same_delta() {
        let a = ramp(5, 1.0, 0.0);
        let b = ramp(5, 0.5, 0.0);
        assert!(a.difference(&b).is_err());
        let d = a.difference(&a).unwrap();
        assert!(d.amp().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_ops() {
        let s = Signal::new(1.0, 0.0, vec![1.0, -1.0]).unwrap();
        assert_eq!((&s * 2.0).amp(), &[2.0, -2.0]);
        assert_eq!((s.clone() + 0.5).amp(), &[1.5, -0.5]);
        assert_eq!((-s).amp(), &[-1.0, 1.0]);
    }

    #[test]
    fn test_is_local_peak() {
        let mut s = Signal::new(1.0, 0.0, vec![0.0, 1.0, 2.0, 1.0]).unwrap();
        assert!(s.find_peak_around(1.0, 0.0));
        assert!(!s.is_local_peak());
        assert!(s.find_peak_around(2.0, 0.0));
        assert!(s.is_local_peak());
    }
}
