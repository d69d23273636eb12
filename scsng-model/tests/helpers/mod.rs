//! Shared test helpers
//!
//! Synthetic trace trees and in-memory catalogs for the integration tests

pub mod catalog_utils;
pub mod signal_generator;

#[allow(unused_imports)]
pub use catalog_utils::*;
#[allow(unused_imports)]
pub use signal_generator::*;
