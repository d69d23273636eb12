//! SQLite catalog access

pub mod catalog;
pub mod init;

pub use catalog::{Catalog, Table};
pub use init::init_database;
