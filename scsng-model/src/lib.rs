//! scsng-model - ScS waveform modeling
//!
//! Signal engine, transforms and scoring for comparing observed ScS
//! waveforms against synthetics of candidate core-mantle boundary models,
//! plus the services and runners that drive them over a trace catalog.
//!
//! **Layers:**
//! - [`signal`]: evenly-sampled traces and trace collections
//! - [`transforms`]: cross-correlation, stacking, stretching, deconvolution, FRS
//! - [`cq`]: Compare Quality scorer
//! - [`services`]: per-unit processing, bin modeling, ranking
//! - [`workflow`]: slot scheduler and pipeline runners

pub mod config;
pub mod cq;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod signal;
pub mod transforms;
pub mod workflow;

pub use config::PipelineConfig;
pub use error::{ModelError, Result};
pub use signal::{Signal, SignalCollection, TraceMeta};
