//! Worker scheduling and pipeline runners

pub mod pipeline;
pub mod scheduler;

pub use pipeline::{Pipeline, RunSummary, TraceSource};
pub use scheduler::{SlotGuard, SlotScheduler};
