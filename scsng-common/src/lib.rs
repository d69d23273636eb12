//! # ScS NextGen Common Library
//!
//! Shared code for the ScS modeling tools including:
//! - Error type used across crates
//! - Bootstrap configuration and root folder resolution
//! - SQLite catalog access (select / insert rows / execute)

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
