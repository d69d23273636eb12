//! Error types for scsng-model
//!
//! Per-record problems (a window that does not cover a trace, a peak that
//! is not a local maximum) are reported through tags and `bool` returns so
//! batch loops can continue; the variants here are for failures the caller
//! has to act on.

use thiserror::Error;

/// Result type for signal and pipeline operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Signal engine and pipeline errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid parameter value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Signals do not share a time axis
    #[error("Axis mismatch: {0}")]
    AxisMismatch(String),

    /// Peak amplitude is exactly zero
    #[error("Zero peak amplitude: {0}")]
    ZeroPeak(String),

    /// Empty signal set or zero total weight
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Requested window is not covered by the samples
    #[error("Window [{t1}, {t2}] not covered: {context}")]
    WindowNotCovered { t1: f64, t2: f64, context: String },

    /// Systemic input problem that must abort the run
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Trace file or catalog value could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// scsng-common error
    #[error("Common error: {0}")]
    Common(#[from] scsng_common::Error),
}
