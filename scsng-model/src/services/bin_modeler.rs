//! Bin-wise stacking and model comparison
//!
//! For one candidate model and every bin: pick the bin's usable data
//! records, pair each with the synthetic at the nearest distance, stack
//! both with distance and SNR weights and score the stacks.
//!
//! **Decon mode:** data, model and reference stacks are registered on
//! their peaks; the reference stack is stretched to each stack's half-height
//! width and subtracted; the residual is masked after the main phase and
//! folded with FRS before scoring.
//!
//! **Subtract mode:** every trace is already a stripped residual; it is
//! masked and folded individually and the folded traces are stacked.

use crate::config::{PipelineConfig, ProcessingMode};
use crate::cq::calculate_cq;
use crate::error::{ModelError, Result};
use crate::models::{Bin, CandidateModel, ComparisonResult, StackPaths};
use crate::services::trace_store::TraceStore;
use crate::signal::{Signal, TAG_CUT_FAILED, TAG_OK, TAG_PEAK_NOT_LOCAL, TAG_PEAK_SHIFTED, TAG_ZERO_PEAK};
use crate::transforms::{stack_signals, stretch_to_fit_half_width, StackResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extent of traces read for stacking, seconds
const READ_WINDOW: (f64, f64) = (-30.0, 30.0);
/// Extent of registered traces before stacking
const STACK_WINDOW: (f64, f64) = (-29.5, 29.5);
/// Extent of stored decon-mode stacks
const RESULT_WINDOW: (f64, f64) = (-29.0, 29.0);
/// Extent of stored subtract-mode stacks (FRS output starts at 0)
const SUBTRACT_RESULT_WINDOW: (f64, f64) = (0.0, 29.0);
/// Masked range after the main phase before folding
const MASK_WINDOW: (f64, f64) = (0.0, 30.0);
/// Peak search half widths for traces and stacks
const TRACE_PEAK_HALF_WIDTH: f64 = 5.0;
const STACK_PEAK_HALF_WIDTH: f64 = 1.0;
/// Data peaks further than this many samples from zero are rejected
const MAX_PEAK_SHIFT_SAMPLES: f64 = 1.5;

/// Role of a trace in decon-mode preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceRole {
    Data,
    Model,
    Reference,
}

/// Bin modeling settings
#[derive(Debug, Clone)]
pub struct BinParams {
    pub mode: ProcessingMode,
    pub count_threshold: usize,
    pub edge_weight: f64,
    pub snr_quantile: f64,
    pub distance_cutoff: f64,
    pub compare_len: f64,
    pub output_dir: PathBuf,
}

impl BinParams {
    pub fn from_config(config: &PipelineConfig, output_dir: PathBuf) -> Self {
        let b = &config.binning;
        Self {
            mode: b.mode,
            count_threshold: b.count_threshold,
            edge_weight: b.edge_weight,
            snr_quantile: b.snr_quantile,
            distance_cutoff: b.distance_cutoff,
            compare_len: b.compare_len(),
            output_dir,
        }
    }
}

/// Register a decon-mode trace on its peak near zero and cut it for stacking
///
/// Failures are reported through the tag. Data traces whose peak moved
/// more than 1.5 samples from zero are tagged [`TAG_PEAK_SHIFTED`].
pub fn prepare_decon_trace(mut signal: Signal, role: TraceRole) -> Signal {
    if role == TraceRole::Model && !signal.check_and_cut_to_window(READ_WINDOW.0, READ_WINDOW.1) {
        warn!(file = ?signal.meta().file, "synthetic trace corrupted: window not covered");
    }
    if !signal.find_peak_around(0.0, TRACE_PEAK_HALF_WIDTH) {
        return signal;
    }
    if role == TraceRole::Data && signal.peak_time().abs() > MAX_PEAK_SHIFT_SAMPLES * signal.delta() {
        signal.set_tag(TAG_PEAK_SHIFTED);
    }
    signal.shift_time_reference_to_peak();
    if signal.normalize_to_peak().is_err() {
        signal.set_tag(TAG_ZERO_PEAK);
        return signal;
    }
    if !signal.check_and_cut_to_window(STACK_WINDOW.0, STACK_WINDOW.1) {
        signal.set_tag(TAG_CUT_FAILED);
    }
    signal
}

/// Fold a stripped residual for subtract-mode stacking
///
/// Data residuals pass the S-stripped trace, which is subtracted first.
pub fn prepare_subtract_trace(scs_stripped: Signal, s_stripped: Option<&Signal>) -> Result<Signal> {
    let mut signal = match s_stripped {
        Some(s) => scs_stripped.difference(s)?,
        None => scs_stripped,
    };
    if !signal.check_and_cut_to_window(READ_WINDOW.0, READ_WINDOW.1) {
        signal.set_tag(TAG_CUT_FAILED);
        return Ok(signal);
    }
    signal.mask(MASK_WINDOW.0, MASK_WINDOW.1);
    signal.flip_reverse_sum(0.0)?;
    Ok(signal)
}

/// Whether a data trace may enter a stack
pub fn is_usable(tag: i32) -> bool {
    tag == TAG_OK || tag == TAG_PEAK_NOT_LOCAL
}

/// SNR at the `quantile` of the sorted values; -1 when there are none
pub fn critical_snr(snrs: &[f64], quantile: f64) -> f64 {
    let mut sorted: Vec<f64> = snrs.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return -1.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let index = ((sorted.len() as f64 * quantile).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Linear ramp from 0 at `snr = 0` to 1 at `snr = critical`
pub fn snr_ramp(snr: f64, critical: f64) -> f64 {
    if snr.is_nan() {
        0.0
    } else if critical <= 0.0 {
        if snr >= 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        (snr / critical).clamp(0.0, 1.0)
    }
}

/// Prepared data trace with its catalog values
#[derive(Debug, Clone)]
pub struct DataTrace {
    pub gcarc: f64,
    pub snr: f64,
    pub signal: Signal,
}

/// Prepared data traces by pair name
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    traces: HashMap<String, DataTrace>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pair_name: String, trace: DataTrace) {
        self.traces.insert(pair_name, trace);
    }

    pub fn get(&self, pair_name: &str) -> Option<&DataTrace> {
        self.traces.get(pair_name)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Number of traces that will never enter a stack
    pub fn unusable_count(&self) -> usize {
        self.traces.values().filter(|t| !is_usable(t.signal.tag())).count()
    }
}

/// Synthetic traces of one model, by station and by distance
#[derive(Debug, Clone, Default)]
pub struct SyntheticSet {
    by_distance: Vec<(f64, String)>,
    by_station: HashMap<String, Signal>,
}

impl SyntheticSet {
    pub fn new(traces: Vec<Signal>) -> Self {
        let mut by_distance: Vec<(f64, String)> = traces
            .iter()
            .map(|s| (s.meta().gcarc, s.meta().station.clone()))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
        let by_station = traces
            .into_iter()
            .map(|s| (s.meta().station.clone(), s))
            .collect();
        Self {
            by_distance,
            by_station,
        }
    }

    pub fn len(&self) -> usize {
        self.by_station.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_station.is_empty()
    }

    /// Station at the smallest distance `>= gcarc`, or the farthest one
    pub fn station_for(&self, gcarc: f64) -> Option<&str> {
        let i = self.by_distance.partition_point(|(g, _)| *g < gcarc);
        self.by_distance
            .get(i)
            .or_else(|| self.by_distance.last())
            .map(|(_, station)| station.as_str())
    }

    pub fn get(&self, station: &str) -> Option<&Signal> {
        self.by_station.get(station)
    }
}

/// One stack member
struct Member<'a> {
    data: &'a Signal,
    model: &'a Signal,
    reference: &'a Signal,
    weight: f64,
}

/// Registered stack with its scaled standard deviation
struct Registered {
    mean: Signal,
    std: Signal,
}

fn register_stack(stack: StackResult, half_width: f64, context: &str) -> Result<Registered> {
    let StackResult { mut mean, mut std } = stack;
    if !mean.find_peak_around(0.0, half_width) {
        return Err(ModelError::WindowNotCovered {
            t1: -half_width,
            t2: half_width,
            context: format!("{} stack peak", context),
        });
    }
    let peak_time = mean.peak_time();
    let peak = mean.peak_amp().abs();
    if peak == 0.0 {
        return Err(ModelError::ZeroPeak(format!("{} stack", context)));
    }
    mean.shift_time_reference_to_peak();
    std.shift_time(-peak_time);
    std.scale(1.0 / peak);
    mean.normalize_to_peak()?;
    Ok(Registered { mean, std })
}

fn cut(signal: &mut Signal, window: (f64, f64), context: &str) -> Result<()> {
    if signal.check_and_cut_to_window(window.0, window.1) {
        Ok(())
    } else {
        Err(ModelError::WindowNotCovered {
            t1: window.0,
            t2: window.1,
            context: context.to_string(),
        })
    }
}

/// Compares candidate models against every bin
pub struct BinModeler<'a> {
    params: &'a BinParams,
    bins: &'a [Bin],
    data: &'a DataSet,
    reference: &'a SyntheticSet,
}

impl<'a> BinModeler<'a> {
    pub fn new(
        params: &'a BinParams,
        bins: &'a [Bin],
        data: &'a DataSet,
        reference: &'a SyntheticSet,
    ) -> Self {
        Self {
            params,
            bins,
            data,
            reference,
        }
    }

    fn store(&self, rel: &str, signal: &Signal) -> Result<()> {
        TraceStore::store(&self.params.output_dir.join(rel), signal)
    }

    /// Score `model` against every bin
    pub fn model_bins(
        &self,
        model: &CandidateModel,
        synthetics: &SyntheticSet,
    ) -> Result<Vec<ComparisonResult>> {
        let crit = model.critical_distance.min(self.params.distance_cutoff);
        let mut results = Vec::with_capacity(self.bins.len());
        let mut scored = 0;

        for bin in self.bins {
            let snrs: Vec<f64> = bin
                .members
                .iter()
                .filter_map(|m| self.data.get(&m.pair_name))
                .filter(|d| d.gcarc < crit)
                .map(|d| d.snr)
                .collect();
            let crit_snr = critical_snr(&snrs, self.params.snr_quantile);

            let mut members = Vec::new();
            for m in &bin.members {
                let Some(data) = self.data.get(&m.pair_name) else {
                    debug!(bin = bin.id, pair = %m.pair_name, "bin member has no data trace");
                    continue;
                };
                if data.gcarc >= crit || !is_usable(data.signal.tag()) {
                    continue;
                }
                let Some(station) = self.reference.station_for(data.gcarc) else {
                    warn!(model = %model.name, "reference synthetics are empty");
                    break;
                };
                let (Some(model_trace), Some(reference)) =
                    (synthetics.get(station), self.reference.get(station))
                else {
                    warn!(model = %model.name, station, bin = bin.id, "synthetic trace missing");
                    continue;
                };
                let weight = bin.distance_weight(m.center_distance, self.params.edge_weight)
                    * snr_ramp(data.snr, crit_snr);
                members.push(Member {
                    data: &data.signal,
                    model: model_trace,
                    reference,
                    weight,
                });
            }

            let weight_sum: f64 = members.iter().map(|m| m.weight).sum();
            if weight_sum <= 1.0 || members.len() < self.params.count_threshold {
                debug!(bin = bin.id, model = %model.name, traces = members.len(), weight_sum, "not enough data");
                results.push(ComparisonResult::insufficient(bin.id, &model.name, self.params.mode, weight_sum));
                continue;
            }

            let outcome = match self.params.mode {
                ProcessingMode::Decon => self.compare_decon(bin, model, &members, weight_sum),
                ProcessingMode::Subtract => self.compare_subtract(bin, model, &members, weight_sum),
            };
            match outcome {
                Ok(result) => {
                    scored += 1;
                    results.push(result);
                }
                Err(ModelError::Io(e)) => return Err(ModelError::Io(e)),
                Err(e) => {
                    warn!(bin = bin.id, model = %model.name, error = %e, "bin comparison failed");
                    results.push(ComparisonResult::insufficient(bin.id, &model.name, self.params.mode, weight_sum));
                }
            }
        }

        info!(model = %model.name, bins = self.bins.len(), scored, "model compared");
        Ok(results)
    }

    fn compare_decon(
        &self,
        bin: &Bin,
        model: &CandidateModel,
        members: &[Member<'_>],
        weight_sum: f64,
    ) -> Result<ComparisonResult> {
        let weights: Vec<f64> = members.iter().map(|m| m.weight).collect();
        let data: Vec<&Signal> = members.iter().map(|m| m.data).collect();
        let synth: Vec<&Signal> = members.iter().map(|m| m.model).collect();
        let reference: Vec<&Signal> = members.iter().map(|m| m.reference).collect();

        let mut data = register_stack(stack_signals(&data, &weights)?, STACK_PEAK_HALF_WIDTH, "data")?;
        let mut reference =
            register_stack(stack_signals(&reference, &weights)?, TRACE_PEAK_HALF_WIDTH, "reference")?;
        let mut synth = register_stack(stack_signals(&synth, &weights)?, STACK_PEAK_HALF_WIDTH, "model")?;

        let (mut data_altered, data_factor) = stretch_to_fit_half_width(&reference.mean, &data.mean)?;
        let (mut model_altered, model_factor) = stretch_to_fit_half_width(&reference.mean, &synth.mean)?;

        for (signal, what) in [
            (&mut data.mean, "data stack"),
            (&mut data.std, "data std"),
            (&mut synth.mean, "model stack"),
            (&mut synth.std, "model std"),
            (&mut reference.mean, "reference stack"),
            (&mut reference.std, "reference std"),
            (&mut data_altered, "altered reference"),
            (&mut model_altered, "altered reference"),
        ] {
            cut(signal, RESULT_WINDOW, what)?;
        }

        let mut data_stripped = data.mean.difference(&data_altered)?;
        let mut model_stripped = synth.mean.difference(&model_altered)?;

        let rel = |kind: &str, ext: &str| format!("{}/{}/{}.{}", kind, model.name, bin.id, ext);
        let mut paths = StackPaths::default();
        let put = |slot: &mut Option<String>, kind: &str, ext: &str, signal: &Signal| -> Result<()> {
            let path = rel(kind, ext);
            self.store(&path, signal)?;
            *slot = Some(path);
            Ok(())
        };
        put(&mut paths.data_stack, "data_stack", "signal", &data.mean)?;
        put(&mut paths.data_std, "data_stack", "std", &data.std)?;
        put(&mut paths.model_stack, "model_stack", "signal", &synth.mean)?;
        put(&mut paths.model_std, "model_stack", "std", &synth.std)?;
        put(&mut paths.prem_stack, "prem_stack", "signal", &reference.mean)?;
        put(&mut paths.prem_std, "prem_stack", "std", &reference.std)?;
        put(&mut paths.data_altered_prem, "data_altered_prem", "signal", &data_altered)?;
        put(&mut paths.model_altered_prem, "model_altered_prem", "signal", &model_altered)?;
        put(&mut paths.data_prem_stripped, "data_prem_stripped", "signal", &data_stripped)?;
        put(&mut paths.model_prem_stripped, "model_prem_stripped", "signal", &model_stripped)?;

        for s in [&mut data_stripped, &mut model_stripped] {
            s.mask(MASK_WINDOW.0, MASK_WINDOW.1);
            s.flip_reverse_sum(0.0)?;
        }
        put(&mut paths.data_frs, "data_frs", "signal", &data_stripped)?;
        put(&mut paths.model_frs, "model_frs", "signal", &model_stripped)?;

        let scores = calculate_cq(&data_stripped, &model_stripped, self.params.compare_len)?;
        debug!(bin = bin.id, model = %model.name, cq = scores.cq(), "bin scored");
        Ok(ComparisonResult {
            pair_name: format!("{}_{}", bin.id, model.name),
            bin: bin.id,
            model_name: model.name.clone(),
            mode: ProcessingMode::Decon,
            scores: Some(scores),
            stack_trace_count: Some(members.len()),
            weight_sum,
            data_alter_factor: Some(data_factor),
            model_alter_factor: Some(model_factor),
            paths,
        })
    }

    fn compare_subtract(
        &self,
        bin: &Bin,
        model: &CandidateModel,
        members: &[Member<'_>],
        weight_sum: f64,
    ) -> Result<ComparisonResult> {
        let weights: Vec<f64> = members.iter().map(|m| m.weight).collect();
        let data: Vec<&Signal> = members.iter().map(|m| m.data).collect();
        let synth: Vec<&Signal> = members.iter().map(|m| m.model).collect();

        let mut data = stack_signals(&data, &weights)?;
        let mut synth = stack_signals(&synth, &weights)?;
        for (signal, what) in [
            (&mut data.mean, "data stack"),
            (&mut data.std, "data std"),
            (&mut synth.mean, "model stack"),
            (&mut synth.std, "model std"),
        ] {
            cut(signal, SUBTRACT_RESULT_WINDOW, what)?;
        }

        let mut paths = StackPaths::default();
        for (slot, kind, ext, signal) in [
            (&mut paths.data_stack, "data_scs_stack", "signal", &data.mean),
            (&mut paths.data_std, "data_scs_stack", "std", &data.std),
            (&mut paths.model_stack, "model_scs_stack", "signal", &synth.mean),
            (&mut paths.model_std, "model_scs_stack", "std", &synth.std),
        ] {
            let path = format!("{}/{}/{}.{}", kind, model.name, bin.id, ext);
            self.store(&path, signal)?;
            *slot = Some(path);
        }

        let scores = calculate_cq(&data.mean, &synth.mean, self.params.compare_len)?;
        debug!(bin = bin.id, model = %model.name, cq = scores.cq(), "bin scored");
        Ok(ComparisonResult {
            pair_name: format!("{}_{}", bin.id, model.name),
            bin: bin.id,
            model_name: model.name.clone(),
            mode: ProcessingMode::Subtract,
            scores: Some(scores),
            stack_trace_count: Some(members.len()),
            weight_sum,
            data_alter_factor: None,
            model_alter_factor: None,
            paths,
        })
    }
}

/// Load and prepare the synthetics of one model
///
/// `files` are relative to `output_dir`; in subtract mode they are the
/// ScS-stripped residuals.
pub fn load_synthetics(
    output_dir: &Path,
    files: &[String],
    mode: ProcessingMode,
    role: TraceRole,
) -> Result<SyntheticSet> {
    let mut traces = Vec::with_capacity(files.len());
    for file in files {
        let signal = TraceStore::load(&output_dir.join(file))?;
        let prepared = match mode {
            ProcessingMode::Decon => prepare_decon_trace(signal, role),
            ProcessingMode::Subtract => prepare_subtract_trace(signal, None)?,
        };
        if prepared.tag() != TAG_OK {
            warn!(file, tag = prepared.tag(), "synthetic trace unusable");
        }
        traces.push(prepared);
    }
    Ok(SyntheticSet::new(traces))
}
