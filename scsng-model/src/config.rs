//! Pipeline configuration
//!
//! Loaded from the TOML file located by
//! [`scsng_common::config::resolve_config_path`]; every section and field
//! falls back to its default, so an empty file (or no file) is a valid
//! configuration.

use crate::error::{ModelError, Result};
use crate::transforms::{DeconChain, MisfitMetric, StretchOptions};
use scsng_common::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// Root folder; relative paths below are resolved against it
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub windows: WindowConfig,

    #[serde(default)]
    pub decon: DeconChain,

    #[serde(default)]
    pub stretch: StretchConfig,

    #[serde(default)]
    pub binning: BinningConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl PipelineConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = scsng_common::config::load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if !(self.filter.delta > 0.0) {
            return Err(ModelError::InvalidInput(format!(
                "filter.delta must be positive, got {}",
                self.filter.delta
            )));
        }
        if !(self.binning.edge_weight > 0.0 && self.binning.edge_weight < 1.0) {
            return Err(ModelError::InvalidInput(format!(
                "binning.edge_weight must be within (0, 1), got {}",
                self.binning.edge_weight
            )));
        }
        if !(0.0..1.0).contains(&self.binning.snr_quantile) {
            return Err(ModelError::InvalidInput(format!(
                "binning.snr_quantile must be within [0, 1), got {}",
                self.binning.snr_quantile
            )));
        }
        if self.pool.workers == 0 {
            return Err(ModelError::InvalidInput(
                "pool.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// File locations, relative to the root folder unless absolute
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Data traces, one sub-directory per event
    #[serde(default = "default_traces")]
    pub traces: PathBuf,

    /// Synthetic traces, one sub-directory per model
    #[serde(default = "default_synthetics")]
    pub synthetics: PathBuf,

    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Fixed S ESW shared by every unit; built per unit when absent
    #[serde(default)]
    pub esw_reference: Option<PathBuf>,

    /// Extension of trace files inside the trace directories
    #[serde(default = "default_trace_extension")]
    pub trace_extension: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            traces: default_traces(),
            synthetics: default_synthetics(),
            output: default_output(),
            esw_reference: None,
            trace_extension: default_trace_extension(),
        }
    }
}

/// Preprocessing applied to every trace
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Resampling interval, seconds
    #[serde(default = "default_delta")]
    pub delta: f64,

    #[serde(default = "default_filter_low")]
    pub low: f64,

    #[serde(default = "default_filter_high")]
    pub high: f64,

    /// Hann taper applied before filtering, percent per side
    #[serde(default = "default_taper")]
    pub taper: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            delta: default_delta(),
            low: default_filter_low(),
            high: default_filter_high(),
            taper: default_taper(),
        }
    }
}

/// Time windows, seconds relative to the aligned phase
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Half width of the search around a predicted arrival
    #[serde(default = "default_peak_half_width")]
    pub peak_half_width: f64,

    /// ESW extent
    #[serde(default = "default_source_cut")]
    pub source_cut: (f64, f64),

    #[serde(default = "default_cut_before_decon")]
    pub cut_before_decon: (f64, f64),

    /// Extent of stored deconvolved and stripped traces
    #[serde(default = "default_result_cut")]
    pub result_cut: (f64, f64),

    /// Cross-correlation window used for strip shifts
    #[serde(default = "default_xcorr_window")]
    pub xcorr_window: (f64, f64),

    /// Length of the stored FRS trace
    #[serde(default = "default_frs_length")]
    pub frs_length: f64,

    /// Noise window before S for the SNR estimate
    #[serde(default = "default_noise_window")]
    pub noise_window: (f64, f64),
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            peak_half_width: default_peak_half_width(),
            source_cut: default_source_cut(),
            cut_before_decon: default_cut_before_decon(),
            result_cut: default_result_cut(),
            xcorr_window: default_xcorr_window(),
            frs_length: default_frs_length(),
            noise_window: default_noise_window(),
        }
    }
}

/// Stretch-to-fit settings for the ESW refinement and the decon source
#[derive(Debug, Clone, Deserialize)]
pub struct StretchConfig {
    /// Stretch every trace to the ESW and restack once
    #[serde(default = "default_refine_esw")]
    pub refine_esw: bool,

    #[serde(default = "default_window")]
    pub window: (f64, f64),

    #[serde(default = "default_refine_range")]
    pub refine_range: (f64, f64),

    #[serde(default = "default_source_range")]
    pub source_range: (f64, f64),

    #[serde(default = "default_amp_level")]
    pub amp_level: f64,

    #[serde(default = "default_step")]
    pub step: f64,
}

impl Default for StretchConfig {
    fn default() -> Self {
        Self {
            refine_esw: default_refine_esw(),
            window: default_window(),
            refine_range: default_refine_range(),
            source_range: default_source_range(),
            amp_level: default_amp_level(),
            step: default_step(),
        }
    }
}

impl StretchConfig {
    fn options(&self, range: (f64, f64), metric: MisfitMetric) -> Result<StretchOptions> {
        Ok(StretchOptions::default()
            .with_window(self.window.0, self.window.1)?
            .with_range(range.0, range.1)?
            .with_amp_level(self.amp_level)?
            .with_step(self.step)?
            .with_metric(metric))
    }

    /// Options for stretching traces onto the ESW
    pub fn refine_options(&self) -> Result<StretchOptions> {
        self.options(self.refine_range, MisfitMetric::WinDiff)
    }

    /// Options for stretching the S ESW onto the ScS ESW
    pub fn source_options(&self) -> Result<StretchOptions> {
        self.options(self.source_range, MisfitMetric::AmpDiff)
    }
}

/// How the ScS precursor window is isolated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Deconvolve the ESW and compare FRS of bin stacks
    #[default]
    Decon,
    /// Strip fitted ESWs and compare FRS of the residuals
    Subtract,
}

/// Bin stacking and scoring
#[derive(Debug, Clone, Deserialize)]
pub struct BinningConfig {
    #[serde(default)]
    pub mode: ProcessingMode,

    /// Minimum number of stacked traces for a CQ
    #[serde(default = "default_count_threshold")]
    pub count_threshold: usize,

    /// Distance weight at the bin radius
    #[serde(default = "default_edge_weight")]
    pub edge_weight: f64,

    /// SNR quantile below which a record's weight ramps down
    #[serde(default = "default_snr_quantile")]
    pub snr_quantile: f64,

    /// Upper bound on every model's critical distance, degrees
    #[serde(default = "default_distance_cutoff")]
    pub distance_cutoff: f64,

    #[serde(default = "default_compare_len_decon")]
    pub compare_len_decon: f64,

    #[serde(default = "default_compare_len_subtract")]
    pub compare_len_subtract: f64,

    /// Model whose synthetics serve as the reference stack
    #[serde(default = "default_reference_model")]
    pub reference_model: String,

    /// Traces every synthetic model must have
    #[serde(default)]
    pub expected_trace_count: Option<usize>,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::default(),
            count_threshold: default_count_threshold(),
            edge_weight: default_edge_weight(),
            snr_quantile: default_snr_quantile(),
            distance_cutoff: default_distance_cutoff(),
            compare_len_decon: default_compare_len_decon(),
            compare_len_subtract: default_compare_len_subtract(),
            reference_model: default_reference_model(),
            expected_trace_count: None,
        }
    }
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Decon => "decon",
            ProcessingMode::Subtract => "subtract",
        }
    }
}

impl BinningConfig {
    /// CQ comparison length for the configured mode
    pub fn compare_len(&self) -> f64 {
        match self.mode {
            ProcessingMode::Decon => self.compare_len_decon,
            ProcessingMode::Subtract => self.compare_len_subtract,
        }
    }
}

/// Model family filter applied when ranking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub drho_min: Option<f64>,

    #[serde(default)]
    pub drho_max: Option<f64>,

    #[serde(default)]
    pub thickness_max: Option<f64>,
}

/// Worker pool
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

// Default value functions
fn default_database() -> PathBuf {
    PathBuf::from("scsng.db")
}

fn default_traces() -> PathBuf {
    PathBuf::from("traces")
}

fn default_synthetics() -> PathBuf {
    PathBuf::from("synthetics")
}

fn default_output() -> PathBuf {
    PathBuf::from("output")
}

fn default_trace_extension() -> String {
    "trace".to_string()
}

fn default_delta() -> f64 {
    0.025
}

fn default_filter_low() -> f64 {
    0.033
}

fn default_filter_high() -> f64 {
    0.3
}

fn default_taper() -> f64 {
    20.0
}

fn default_peak_half_width() -> f64 {
    10.0
}

fn default_source_cut() -> (f64, f64) {
    (-60.0, 60.0)
}

fn default_cut_before_decon() -> (f64, f64) {
    (-120.0, 120.0)
}

fn default_result_cut() -> (f64, f64) {
    (-50.0, 50.0)
}

fn default_xcorr_window() -> (f64, f64) {
    (-15.0, 15.0)
}

fn default_frs_length() -> f64 {
    15.0
}

fn default_noise_window() -> (f64, f64) {
    (-60.0, -10.0)
}

fn default_refine_esw() -> bool {
    false
}

fn default_window() -> (f64, f64) {
    (-13.0, 13.0)
}

fn default_refine_range() -> (f64, f64) {
    (-0.3, 0.3)
}

fn default_source_range() -> (f64, f64) {
    (-0.1, 0.2)
}

fn default_amp_level() -> f64 {
    0.25
}

fn default_step() -> f64 {
    0.01
}

fn default_count_threshold() -> usize {
    20
}

fn default_edge_weight() -> f64 {
    0.3
}

fn default_snr_quantile() -> f64 {
    0.1
}

fn default_distance_cutoff() -> f64 {
    70.0
}

fn default_compare_len_decon() -> f64 {
    15.0
}

fn default_compare_len_subtract() -> f64 {
    10.0
}

fn default_reference_model() -> String {
    "PREM_201500000000".to_string()
}

fn default_workers() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.filter.delta, 0.025);
        assert_eq!(config.binning.mode, ProcessingMode::Decon);
        assert_eq!(config.binning.count_threshold, 20);
        assert_eq!(config.windows.source_cut, (-60.0, 60.0));
        assert_eq!(config.decon, DeconChain::default());
        assert_eq!(config.pool.workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_override() {
        let config: PipelineConfig = toml::from_str(
            r#"
            root_folder = "/data/scsng"

            [binning]
            mode = "subtract"
            count_threshold = 5

            [decon]
            water_level = 0.05
            sigma = 1.0
            low_corner = 0.03
            high_corner = 10000.0
            "#,
        )
        .unwrap();
        assert_eq!(config.root_folder, Some(PathBuf::from("/data/scsng")));
        assert_eq!(config.binning.mode, ProcessingMode::Subtract);
        assert_eq!(config.binning.compare_len(), 10.0);
        assert_eq!(config.binning.snr_quantile, 0.1);
        assert_eq!(config.decon.water_level, 0.05);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.binning.edge_weight = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.pool.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stretch_options_from_config() {
        let stretch = StretchConfig::default();
        let opts = stretch.source_options().unwrap();
        assert_eq!(opts.metric, MisfitMetric::AmpDiff);
        assert_eq!(opts.range, (-0.1, 0.2));
        assert_eq!(stretch.refine_options().unwrap().metric, MisfitMetric::WinDiff);
    }
}
