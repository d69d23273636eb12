//! Per-unit trace processing
//!
//! A unit is one synthetic model or one data event: every trace of it is
//! preprocessed, aligned on S, and reduced to the ScS window either by
//! deconvolving an ESW-derived source or by stripping fitted ESWs.
//!
//! **Outputs** (relative to the output directory):
//! - `decon/<unit>/<station>.trace` and `frs/<unit>/<station>.frs` (decon mode)
//! - `s_stripped/<unit>/<station>.s_stripped` and
//!   `scs_stripped/<unit>/<station>.scs_stripped` (subtract mode)
//! - `esw/<unit>.s_esw`, plus `esw/<unit>.scs_esw` in decon mode
//!
//! Records that fail a peak search or a cut are tagged, counted and dropped;
//! a peak that is not a local maximum is tagged and kept.

use crate::config::{FilterConfig, PipelineConfig, ProcessingMode, WindowConfig};
use crate::error::{ModelError, Result};
use crate::models::ProcessedTrace;
use crate::services::esw_builder::{build_esw, EswParams};
use crate::services::trace_store::TraceStore;
use crate::services::travel_time::{TravelTimeOracle, PHASE_S, PHASE_SCS};
use crate::signal::{
    Signal, SignalCollection, TAG_CUT_FAILED, TAG_NO_ARRIVAL, TAG_OK, TAG_PEAK_NOT_LOCAL,
    TAG_PEAK_WINDOW, TAG_ZERO_PEAK,
};
use crate::transforms::{
    cross_correlation, stretch_to_fit, stretch_to_fit_half_width, strip_signal,
    strip_signal_shared, DeconChain, Normalization, StretchOptions,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Half width of the search for the re-registered decon source peak
const SOURCE_PEAK_HALF_WIDTH: f64 = 4.0;
/// Cross-correlation window for subtraction shifts
const SUBTRACT_XCORR_WINDOW: (f64, f64) = (-10.0, 10.0);
/// Taper of the ScS ESW and the decon source, percent
const SCS_TAPER: f64 = 10.0;

/// Which kind of traces a unit holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSource {
    /// One directory per event under `paths.traces`
    Data,
    /// One directory per candidate model under `paths.synthetics`
    Synthetics,
}

/// How the S ESW is matched to a single trace before stripping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EswFit {
    /// Ratio of half-height widths
    HalfWidth,
    /// Stretch-factor grid search
    Grid,
}

/// Everything the processor needs from the configuration
#[derive(Debug, Clone)]
pub struct ProcessParams {
    pub mode: ProcessingMode,
    pub source: TraceSource,
    pub filter: FilterConfig,
    pub windows: WindowConfig,
    pub decon: DeconChain,
    /// Stretch of the S ESW onto the ScS ESW
    pub source_stretch: StretchOptions,
    /// Stretch of the S ESW onto each data trace
    pub trace_fit: StretchOptions,
    pub esw_refine: Option<StretchOptions>,
    pub output_dir: PathBuf,
}

impl ProcessParams {
    /// The ESW of a data event is always refined in subtract mode
    pub fn from_config(config: &PipelineConfig, source: TraceSource, output_dir: PathBuf) -> Result<Self> {
        let mode = config.binning.mode;
        let trace_fit = config.stretch.refine_options()?;
        let data_subtract = source == TraceSource::Data && mode == ProcessingMode::Subtract;
        let esw_refine = if config.stretch.refine_esw || data_subtract {
            Some(trace_fit)
        } else {
            None
        };
        Ok(Self {
            mode,
            source,
            filter: config.filter.clone(),
            windows: config.windows.clone(),
            decon: config.decon,
            source_stretch: config.stretch.source_options()?,
            trace_fit,
            esw_refine,
            output_dir,
        })
    }
}

/// Counts reported after a unit is processed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub unit: String,
    pub loaded: usize,
    pub no_arrival: usize,
    pub peak_window: usize,
    pub cut_failed: usize,
    pub zero_peak: usize,
    /// Kept, but the located peak is not a local maximum
    pub peak_errors: usize,
    pub stored: usize,
}

impl ProcessSummary {
    pub fn discarded(&self) -> usize {
        self.no_arrival + self.peak_window + self.cut_failed + self.zero_peak
    }

    fn count(&mut self, tag: i32) {
        match tag {
            TAG_NO_ARRIVAL => self.no_arrival += 1,
            TAG_PEAK_WINDOW => self.peak_window += 1,
            TAG_CUT_FAILED => self.cut_failed += 1,
            TAG_ZERO_PEAK => self.zero_peak += 1,
            _ => {}
        }
    }
}

/// Processed rows, summary and the S ESW of one unit
#[derive(Debug, Clone)]
pub struct UnitOutput {
    pub rows: Vec<ProcessedTrace>,
    pub summary: ProcessSummary,
    pub s_esw: Signal,
}

fn is_hard_failure(tag: i32) -> bool {
    matches!(
        tag,
        TAG_PEAK_WINDOW | TAG_CUT_FAILED | TAG_NO_ARRIVAL | TAG_ZERO_PEAK
    )
}

/// Relative output path `{kind}/{unit}/{station}.{extension}`
pub fn output_path(kind: &str, unit: &str, station: &str, extension: &str) -> String {
    format!("{}/{}/{}.{}", kind, unit, station, extension)
}

/// Runs the per-unit pipeline
pub struct TraceProcessor<'a> {
    params: &'a ProcessParams,
    oracle: &'a dyn TravelTimeOracle,
}

/// Mutable bookkeeping of one `process` call
struct UnitState {
    unit: String,
    rows: BTreeMap<String, ProcessedTrace>,
    summary: ProcessSummary,
}

impl UnitState {
    /// Remove hard failures, counting them and recording their tags
    fn drop_failed(&mut self, traces: &mut SignalCollection, stage: &str) {
        for s in traces.iter().filter(|s| is_hard_failure(s.tag())) {
            self.summary.count(s.tag());
            if let Some(row) = self.rows.get_mut(&s.meta().pair_name()) {
                row.tag = s.tag();
            }
            debug!(unit = %self.unit, pair = %s.meta().pair_name(), tag = s.tag(), stage, "trace dropped");
        }
        let dropped = traces.retain(|s| !is_hard_failure(s.tag()));
        if dropped > 0 {
            warn!(unit = %self.unit, stage, dropped, remaining = traces.len(), "traces discarded");
        }
    }

    fn row(&mut self, signal: &Signal) -> Option<&mut ProcessedTrace> {
        self.rows.get_mut(&signal.meta().pair_name())
    }
}

impl<'a> TraceProcessor<'a> {
    pub fn new(params: &'a ProcessParams, oracle: &'a dyn TravelTimeOracle) -> Self {
        Self { params, oracle }
    }

    /// Process every trace of `unit`
    ///
    /// `shared_esw` replaces the per-unit S ESW when given. A trace count
    /// other than `expected_count` is a data-integrity error.
    pub fn process(
        &self,
        unit: &str,
        traces: SignalCollection,
        shared_esw: Option<&Signal>,
        expected_count: Option<usize>,
    ) -> Result<UnitOutput> {
        if let Some(expected) = expected_count {
            if traces.len() != expected {
                return Err(ModelError::DataIntegrity(format!(
                    "unit {} has {} traces, expected {}",
                    unit,
                    traces.len(),
                    expected
                )));
            }
        }
        let mut state = UnitState {
            unit: unit.to_string(),
            rows: BTreeMap::new(),
            summary: ProcessSummary {
                unit: unit.to_string(),
                loaded: traces.len(),
                ..Default::default()
            },
        };

        let mut traces = traces;
        self.preprocess(&mut traces);
        for s in traces.iter() {
            let meta = s.meta();
            state.rows.insert(
                meta.pair_name(),
                ProcessedTrace {
                    pair_name: meta.pair_name(),
                    event: meta.event.clone(),
                    station: meta.station.clone(),
                    gcarc: meta.gcarc,
                    snr: self.signal_to_noise(s),
                    tag: s.tag(),
                    frs_amp: None,
                    frs_time: None,
                    decon_file: None,
                    frs_file: None,
                    s_stripped_file: None,
                    scs_stripped_file: None,
                },
            );
        }
        state.drop_failed(&mut traces, "preprocess");

        self.align_on_phase(&mut traces, PHASE_S, &mut state);
        state.drop_failed(&mut traces, "S alignment");
        if traces.is_empty() {
            return Err(ModelError::EmptyInput(format!(
                "unit {} has no trace left after S alignment",
                unit
            )));
        }

        let s_esw = match shared_esw {
            Some(esw) => esw.clone(),
            None => {
                let mut params = EswParams::new(self.params.windows.source_cut, self.params.filter.taper);
                params.xcorr_window = self.params.windows.xcorr_window;
                params.refine = self.params.esw_refine;
                build_esw(&traces, &params)?
            }
        };
        TraceStore::store(
            &self.params.output_dir.join(format!("esw/{}.s_esw", unit)),
            &s_esw,
        )?;

        match self.params.mode {
            ProcessingMode::Decon => self.run_decon(traces, &s_esw, &mut state)?,
            ProcessingMode::Subtract => self.run_subtract(traces, &s_esw, &mut state)?,
        }

        for row in state.rows.values().filter(|r| r.tag == TAG_PEAK_NOT_LOCAL) {
            debug!(unit, pair = %row.pair_name, "kept with peak finding error");
        }
        info!(
            unit,
            loaded = state.summary.loaded,
            stored = state.summary.stored,
            discarded = state.summary.discarded(),
            no_arrival = state.summary.no_arrival,
            cut_failed = state.summary.cut_failed,
            peak_errors = state.summary.peak_errors,
            "unit processed"
        );
        Ok(UnitOutput {
            rows: state.rows.into_values().collect(),
            summary: state.summary,
            s_esw,
        })
    }

    fn preprocess(&self, traces: &mut SignalCollection) {
        let filter = &self.params.filter;
        traces.sort_by_gcarc();
        for s in traces.signals_mut() {
            if let Err(e) = preprocess_trace(s, filter) {
                warn!(pair = %s.meta().pair_name(), error = %e, "preprocessing failed");
                s.set_tag(TAG_CUT_FAILED);
            }
        }
    }

    /// Peak ScS amplitude over the RMS of the noise window before S
    ///
    /// NaN when either window is not covered or the noise is zero.
    fn signal_to_noise(&self, trace: &Signal) -> f64 {
        let meta = trace.meta();
        let (Some(s), Some(scs)) = (
            self.oracle.arrival(PHASE_S, meta),
            self.oracle.arrival(PHASE_SCS, meta),
        ) else {
            return f64::NAN;
        };
        let hw = self.params.windows.peak_half_width;
        let (n1, n2) = self.params.windows.noise_window;
        if !trace.covers(scs - hw, scs + hw) || !trace.covers(s + n1, s + n2) {
            return f64::NAN;
        }
        let peak = trace
            .window_values(scs - hw, scs + hw)
            .iter()
            .fold(0.0f64, |m, v| m.max(v.abs()));
        let noise = trace.window_values(s + n1, s + n2);
        let rms = (noise.iter().map(|v| v * v).sum::<f64>() / noise.len() as f64).sqrt();
        if rms > 0.0 {
            peak / rms
        } else {
            f64::NAN
        }
    }

    /// Register every trace on the peak of `phase` near its predicted arrival
    ///
    /// The peak is moved to t = 0, flipped up and normalized.
    fn align_on_phase(&self, traces: &mut SignalCollection, phase: &str, state: &mut UnitState) {
        let targets = self.oracle.arrivals(phase, traces);
        let hw = self.params.windows.peak_half_width;
        // One target per trace by construction
        let failed = traces.find_peak_around_each(&targets, hw).unwrap_or_default();
        for (i, s) in traces.signals_mut().iter_mut().enumerate() {
            if failed.contains(&i) {
                continue;
            }
            if !s.is_local_peak() {
                warn!(unit = %state.unit, pair = %s.meta().pair_name(), phase, "peak finding error");
                state.summary.peak_errors += 1;
                if s.tag() == TAG_OK {
                    s.set_tag(TAG_PEAK_NOT_LOCAL);
                }
                let tag = s.tag();
                if let Some(row) = state.row(s) {
                    row.tag = tag;
                }
            }
            s.shift_time_reference_to_peak();
            s.flip_peak_up();
            if s.normalize_to_peak().is_err() {
                s.set_tag(TAG_ZERO_PEAK);
            }
        }
    }

    /// Fit `esw` to every trace
    ///
    /// With a cross-correlation window each fit also gets the shift that
    /// aligns it on the trace; otherwise the shift is zero. Traces that
    /// cannot be fitted are tagged and removed.
    fn fit_esw(
        &self,
        traces: &mut SignalCollection,
        esw: &Signal,
        method: EswFit,
        xcorr_window: Option<(f64, f64)>,
        state: &mut UnitState,
    ) -> (Vec<Signal>, Vec<f64>) {
        let mut fitted = Vec::with_capacity(traces.len());
        let mut shifts = Vec::with_capacity(traces.len());
        for trace in traces.signals_mut() {
            let stretched = match method {
                EswFit::HalfWidth => stretch_to_fit_half_width(esw, trace).map(|(f, _)| f),
                EswFit::Grid => stretch_to_fit(esw, trace, &self.params.trace_fit).map(|f| f.signal),
            };
            let fit = stretched.and_then(|f| {
                let shift = match xcorr_window {
                    Some(w) => cross_correlation(trace, w, &f, w, Normalization::Raw)?.shift,
                    None => 0.0,
                };
                Ok((f, shift))
            });
            match fit {
                Ok((f, shift)) => {
                    fitted.push(f);
                    shifts.push(shift);
                }
                Err(e) => {
                    warn!(pair = %trace.meta().pair_name(), error = %e, "ESW fit failed");
                    trace.set_tag(TAG_PEAK_WINDOW);
                }
            }
        }
        state.drop_failed(traces, "ESW fit");
        (fitted, shifts)
    }

    fn store(&self, rel: &str, signal: &Signal) -> Result<()> {
        TraceStore::store(&self.params.output_dir.join(rel), signal)
    }

    fn decon_source(&self, s_esw: &Signal, scs_esw: &Signal) -> Result<Signal> {
        let fit = stretch_to_fit(s_esw, scs_esw, &self.params.source_stretch)?;
        debug!(factor = fit.factor, misfit = fit.misfit, "decon source stretched");
        let mut source = fit.signal;
        if !source.find_peak_around(0.0, SOURCE_PEAK_HALF_WIDTH) {
            return Err(ModelError::WindowNotCovered {
                t1: -SOURCE_PEAK_HALF_WIDTH,
                t2: SOURCE_PEAK_HALF_WIDTH,
                context: "decon source peak".to_string(),
            });
        }
        source.shift_time_reference_to_peak();
        let (t1, t2) = self.params.windows.source_cut;
        if !source.cut_to_overlap(t1, t2) {
            return Err(ModelError::WindowNotCovered {
                t1,
                t2,
                context: "decon source cut".to_string(),
            });
        }
        source.normalize_to_peak()?;
        source.flip_peak_up();
        source.hann_taper(SCS_TAPER)?;
        Ok(source)
    }

    fn run_decon(
        &self,
        mut traces: SignalCollection,
        s_esw: &Signal,
        state: &mut UnitState,
    ) -> Result<()> {
        let windows = &self.params.windows;

        let mut scs_aligned = traces.clone();
        self.align_on_phase(&mut scs_aligned, PHASE_SCS, state);
        scs_aligned.retain(|s| !is_hard_failure(s.tag()));
        let scs_esw = build_esw(&scs_aligned, &EswParams::new(windows.source_cut, SCS_TAPER))?;
        self.store(&format!("esw/{}.scs_esw", state.unit), &scs_esw)?;
        let source = self.decon_source(s_esw, &scs_esw)?;

        let (fitted, shifts) = self.fit_esw(
            &mut traces,
            s_esw,
            EswFit::HalfWidth,
            Some(windows.xcorr_window),
            state,
        );
        strip_signal(traces.signals_mut(), &fitted, &shifts)?;

        // ScS peak of the stripped traces, without rescaling
        let targets = self.oracle.arrivals(PHASE_SCS, &traces);
        let failed = traces.find_peak_around_each(&targets, windows.peak_half_width)?;
        for (i, s) in traces.signals_mut().iter_mut().enumerate() {
            if failed.contains(&i) {
                continue;
            }
            if !s.is_local_peak() {
                warn!(unit = %state.unit, pair = %s.meta().pair_name(), "ScS peak finding error");
                state.summary.peak_errors += 1;
            }
            s.shift_time_reference_to_peak();
        }
        state.drop_failed(&mut traces, "ScS alignment");
        traces.check_and_cut_to_window(windows.cut_before_decon.0, windows.cut_before_decon.1);
        state.drop_failed(&mut traces, "cut before decon");

        for trace in traces.iter() {
            match self.deconvolve(trace, &source) {
                Ok((decon, frs)) => {
                    let station = &trace.meta().station;
                    let decon_rel = output_path("decon", &state.unit, station, "trace");
                    let frs_rel = output_path("frs", &state.unit, station, "frs");
                    self.store(&decon_rel, &decon)?;
                    self.store(&frs_rel, &frs)?;
                    state.summary.stored += 1;
                    if let Some(row) = state.row(trace) {
                        row.frs_amp = Some(frs.peak_amp());
                        row.frs_time = Some(frs.peak_time());
                        row.decon_file = Some(decon_rel);
                        row.frs_file = Some(frs_rel);
                    }
                }
                Err(e) => {
                    warn!(unit = %state.unit, pair = %trace.meta().pair_name(), error = %e, "deconvolution failed");
                    state.summary.cut_failed += 1;
                    if let Some(row) = state.row(trace) {
                        row.tag = TAG_CUT_FAILED;
                    }
                }
            }
        }
        Ok(())
    }

    /// Deconvolved trace and its FRS
    fn deconvolve(&self, trace: &Signal, source: &Signal) -> Result<(Signal, Signal)> {
        let windows = &self.params.windows;
        let mut decon = self.params.decon.apply(trace, source)?;
        if !decon.find_peak_around(0.0, windows.peak_half_width) {
            return Err(ModelError::WindowNotCovered {
                t1: -windows.peak_half_width,
                t2: windows.peak_half_width,
                context: "deconvolved peak".to_string(),
            });
        }
        decon.shift_time_reference_to_peak();
        decon.flip_peak_up();
        decon.normalize_to_peak()?;
        let (t1, t2) = windows.result_cut;
        if !decon.check_and_cut_to_window(t1, t2) {
            return Err(ModelError::WindowNotCovered {
                t1,
                t2,
                context: "deconvolved trace cut".to_string(),
            });
        }

        let mut frs = decon.clone();
        frs.flip_reverse_sum(0.0)?;
        let len = windows.frs_length;
        let end = len - 0.8 * frs.delta();
        if !frs.check_and_cut_to_window(0.0, end) {
            return Err(ModelError::WindowNotCovered {
                t1: 0.0,
                t2: end,
                context: "FRS cut".to_string(),
            });
        }
        frs.find_peak_around(0.5 * len, 0.5 * len);
        Ok((decon, frs))
    }

    /// Fit `esw` to each trace and strip it at the shift it was measured with
    fn strip_fitted(
        &self,
        traces: &mut SignalCollection,
        esw: &Signal,
        xcorr_window: (f64, f64),
        state: &mut UnitState,
    ) -> Result<()> {
        let (fitted, shifts) = self.fit_esw(traces, esw, EswFit::Grid, Some(xcorr_window), state);
        strip_signal(traces.signals_mut(), &fitted, &shifts)
    }

    /// S-stripped and ScS-stripped records of a data event
    ///
    /// Both products start from the S-aligned traces. Each gets its own
    /// per-trace stretch of the S ESW.
    fn subtract_data(
        &self,
        traces: SignalCollection,
        s_esw: &Signal,
        state: &mut UnitState,
    ) -> Result<(SignalCollection, SignalCollection)> {
        let mut s_stripped = traces.clone();
        self.strip_fitted(&mut s_stripped, s_esw, self.params.windows.xcorr_window, state)?;

        let mut scs_stripped = traces;
        scs_stripped.retain(|t| {
            s_stripped
                .iter()
                .any(|s| s.meta().pair_name() == t.meta().pair_name())
        });
        self.align_on_phase(&mut scs_stripped, PHASE_SCS, state);
        state.drop_failed(&mut scs_stripped, "ScS alignment");
        self.strip_fitted(&mut scs_stripped, s_esw, SUBTRACT_XCORR_WINDOW, state)?;
        Ok((s_stripped, scs_stripped))
    }

    /// S-stripped and ScS-stripped records of a synthetic model
    ///
    /// The shared ESW is stripped first; the ScS product continues from the
    /// S-stripped traces with half-width fits.
    fn subtract_synthetics(
        &self,
        mut traces: SignalCollection,
        s_esw: &Signal,
        state: &mut UnitState,
    ) -> Result<(SignalCollection, SignalCollection)> {
        let (_, shifts) = self.fit_esw(
            &mut traces,
            s_esw,
            EswFit::HalfWidth,
            Some(SUBTRACT_XCORR_WINDOW),
            state,
        );
        strip_signal_shared(traces.signals_mut(), s_esw, &shifts)?;
        let s_stripped = traces.clone();

        self.align_on_phase(&mut traces, PHASE_SCS, state);
        state.drop_failed(&mut traces, "ScS alignment");
        let (fitted, shifts) = self.fit_esw(&mut traces, s_esw, EswFit::HalfWidth, None, state);
        strip_signal(traces.signals_mut(), &fitted, &shifts)?;
        Ok((s_stripped, traces))
    }

    fn run_subtract(
        &self,
        traces: SignalCollection,
        s_esw: &Signal,
        state: &mut UnitState,
    ) -> Result<()> {
        let (t1, t2) = self.params.windows.result_cut;

        let (mut s_stripped, mut scs_stripped) = match self.params.source {
            TraceSource::Data => self.subtract_data(traces, s_esw, state)?,
            TraceSource::Synthetics => self.subtract_synthetics(traces, s_esw, state)?,
        };

        // Both products must exist for a record to be usable
        scs_stripped.check_and_cut_to_window(t1, t2);
        state.drop_failed(&mut scs_stripped, "ScS-stripped cut");
        s_stripped.retain(|s| {
            scs_stripped
                .iter()
                .any(|t| t.meta().pair_name() == s.meta().pair_name())
        });
        s_stripped.check_and_cut_to_window(t1, t2);
        state.drop_failed(&mut s_stripped, "S-stripped cut");

        for s in s_stripped.iter() {
            let Some(scs) = scs_stripped
                .iter()
                .find(|t| t.meta().pair_name() == s.meta().pair_name())
            else {
                continue;
            };
            let station = &s.meta().station;
            let s_rel = output_path("s_stripped", &state.unit, station, "s_stripped");
            let scs_rel = output_path("scs_stripped", &state.unit, station, "scs_stripped");
            self.store(&s_rel, s)?;
            self.store(&scs_rel, scs)?;
            state.summary.stored += 1;
            if let Some(row) = state.row(s) {
                row.s_stripped_file = Some(s_rel);
                row.scs_stripped_file = Some(scs_rel);
            }
        }
        Ok(())
    }
}

fn preprocess_trace(s: &mut Signal, filter: &FilterConfig) -> Result<()> {
    s.interpolate(filter.delta)?;
    s.remove_trend();
    s.hann_taper(filter.taper)?;
    s.butterworth(filter.low, filter.high)
}

/// Load every trace of `unit` from `dir/unit`
pub fn load_unit(dir: &Path, unit: &str, extension: &str) -> Result<SignalCollection> {
    Ok(SignalCollection::new(TraceStore::load_dir(&dir.join(unit), extension)?))
}
