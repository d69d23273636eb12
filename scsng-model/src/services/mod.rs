//! Pipeline services
//!
//! Trace IO and arrival prediction, ESW construction, per-unit trace
//! processing, bin modeling, ranking and CQ calibration.

pub mod bin_modeler;
pub mod cq_scenarios;
pub mod esw_builder;
pub mod ranking;
pub mod trace_processor;
pub mod trace_store;
pub mod travel_time;

pub use bin_modeler::{BinModeler, BinParams, DataSet, DataTrace, SyntheticSet, TraceRole};
pub use cq_scenarios::{run_scenarios, Scenario, ScenarioParams, ScenarioRow};
pub use esw_builder::{build_esw, EswParams};
pub use ranking::{frs_amplitude_threshold, rank_bins, FrsAmplitudeRange};
pub use trace_processor::{ProcessParams, ProcessSummary, TraceProcessor, UnitOutput};
pub use trace_store::TraceStore;
pub use travel_time::{HeaderTravelTimes, TravelTimeOracle, PHASE_S, PHASE_SCS};
