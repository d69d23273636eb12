//! Predicted phase arrivals
//!
//! Arrival times are on each trace's own time axis, so they stay valid
//! through [`Signal::shift_time`](crate::signal::Signal::shift_time).

use crate::signal::{SignalCollection, TraceMeta};

pub const PHASE_S: &str = "S";
pub const PHASE_SCS: &str = "ScS";

/// Source of predicted arrival times
pub trait TravelTimeOracle: Send + Sync {
    /// Predicted arrival of `phase` for the trace described by `meta`
    fn arrival(&self, phase: &str, meta: &TraceMeta) -> Option<f64>;

    /// One prediction per trace of `traces`
    fn arrivals(&self, phase: &str, traces: &SignalCollection) -> Vec<Option<f64>> {
        traces.iter().map(|s| self.arrival(phase, s.meta())).collect()
    }
}

/// Arrivals recorded in the trace headers
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderTravelTimes;

impl TravelTimeOracle for HeaderTravelTimes {
    fn arrival(&self, phase: &str, meta: &TraceMeta) -> Option<f64> {
        meta.arrivals.get(phase).copied().filter(|t| t.is_finite())
    }
}
