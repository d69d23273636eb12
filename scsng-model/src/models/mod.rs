//! Data models for the modeling pipeline
//!
//! - Bins and their member records
//! - Candidate Earth models
//! - Per-trace processing rows and per-(bin, model) comparison results

pub mod bin;
pub mod candidate;
pub mod result;

pub use bin::{Bin, BinMember, Record};
pub use candidate::{CandidateModel, ModelFamily};
pub use result::{ComparisonResult, FamilyBest, ModelRanking, ProcessedTrace, StackPaths};
