//! Error type for the catalog and the bootstrap configuration

use thiserror::Error;

/// Common result type for catalog and configuration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised below the modeling pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Reading the database directory or a config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A select result has no column of this name
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// A cell that cannot be read as the requested type
    #[error("Column '{column}' value '{value}': {reason}")]
    BadValue {
        column: String,
        value: String,
        reason: String,
    },

    /// NULL in a column read as integers
    #[error("Column '{0}' has NULL")]
    NullValue(String),

    /// Table or column name that is not a plain SQL identifier
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// Rows that do not match the column list of an insert
    #[error("Row shape: {0}")]
    RowShape(String),
}
