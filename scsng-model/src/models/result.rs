//! Pipeline outputs

use crate::config::ProcessingMode;
use crate::cq::CqScores;
use crate::models::ModelFamily;
use serde::{Deserialize, Serialize};

/// One processed trace of a data event or a synthetic model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTrace {
    /// `"{event}_{station}"`
    pub pair_name: String,
    pub event: String,
    pub station: String,
    pub gcarc: f64,
    pub snr: f64,
    pub tag: i32,
    /// FRS peak amplitude and time (decon mode)
    pub frs_amp: Option<f64>,
    pub frs_time: Option<f64>,
    /// Stored files, relative to the output directory
    pub decon_file: Option<String>,
    pub frs_file: Option<String>,
    pub s_stripped_file: Option<String>,
    pub scs_stripped_file: Option<String>,
}

/// Stored stack traces of one comparison, relative to the output directory
///
/// Subtract mode only fills the data/model stacks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackPaths {
    pub data_stack: Option<String>,
    pub data_std: Option<String>,
    pub model_stack: Option<String>,
    pub model_std: Option<String>,
    pub prem_stack: Option<String>,
    pub prem_std: Option<String>,
    pub data_altered_prem: Option<String>,
    pub model_altered_prem: Option<String>,
    pub data_prem_stripped: Option<String>,
    pub model_prem_stripped: Option<String>,
    pub data_frs: Option<String>,
    pub model_frs: Option<String>,
}

/// Outcome of comparing one candidate model against one bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// `"{bin}_{model}"`
    pub pair_name: String,
    pub bin: i64,
    pub model_name: String,
    pub mode: ProcessingMode,
    /// `None` when the bin had too little data
    pub scores: Option<CqScores>,
    pub stack_trace_count: Option<usize>,
    pub weight_sum: f64,
    /// Half-width stretch applied to the reference stack
    pub data_alter_factor: Option<f64>,
    pub model_alter_factor: Option<f64>,
    pub paths: StackPaths,
}

impl ComparisonResult {
    /// Empty result for a bin without enough data
    pub fn insufficient(bin: i64, model_name: &str, mode: ProcessingMode, weight_sum: f64) -> Self {
        Self {
            pair_name: format!("{}_{}", bin, model_name),
            bin,
            model_name: model_name.to_string(),
            mode,
            scores: None,
            stack_trace_count: None,
            weight_sum,
            data_alter_factor: None,
            model_alter_factor: None,
            paths: StackPaths::default(),
        }
    }

    pub fn cq(&self) -> Option<f64> {
        self.scores.map(|s| s.cq())
    }

    pub fn cq2(&self) -> Option<f64> {
        self.scores.map(|s| s.cq2())
    }
}

/// Best model of one family in a bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyBest {
    pub family: ModelFamily,
    pub model_name: String,
    pub cq: f64,
    /// `cq - prem_cq`
    pub dcq: f64,
}

/// Per-bin ranking of model families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRanking {
    pub bin: i64,
    pub prem_cq: Option<f64>,
    pub best: Vec<FamilyBest>,
}

impl ModelRanking {
    /// No family improves on the reference model
    pub fn prem_fits_best(&self) -> bool {
        self.best.iter().all(|b| b.dcq <= 0.0)
    }

    /// Family with the largest CQ gain
    pub fn winner(&self) -> Option<&FamilyBest> {
        self.best
            .iter()
            .filter(|b| b.dcq > 0.0)
            .max_by(|a, b| a.dcq.total_cmp(&b.dcq))
    }
}
