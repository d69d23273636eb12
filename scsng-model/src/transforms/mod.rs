//! Waveform transforms
//!
//! - Cross-correlation alignment and weighted stacking
//! - Stretch-to-fit registration
//! - Water-level deconvolution
//! - Flip-reverse-sum

pub mod decon;
pub mod frs;
pub mod stack;
pub mod stretch;
pub mod xcorr;

pub use decon::{water_level_decon, DeconChain};
pub use stack::{stack_signals, strip_signal, strip_signal_shared, xcorr_stack, StackResult, XcorrStack};
pub use stretch::{stretch_to_fit, stretch_to_fit_half_width, MisfitMetric, StretchFit, StretchOptions};
pub use xcorr::{cross_correlation, cross_correlation_many, Normalization, XcorrResult};
