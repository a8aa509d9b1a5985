//! Error taxonomy for the normalization pipeline.
//!
//! Data-quality gaps (a feature without coordinates, a cell that does not
//! parse) never surface here; they degrade to `Value::Null` or a skipped row
//! and are reported through each stage's diagnostics instead. Everything in
//! this module aborts the current invocation.

use std::path::PathBuf;
use thiserror::Error;

/// Root error returned by every library entry point.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Extract: failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extract: malformed markup: {0}")]
    Markup(#[from] roxmltree::Error),

    #[error("Extract: malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Extract: CSV input must contain 'x' and 'y' columns")]
    MissingCoordinateColumns,
}

#[derive(Debug, Error)]
pub enum CoercionError {
    /// The raw timestamp of a row could not be split into date and time.
    #[error("Coerce: row {row}: cannot derive date/time from timestamp '{value}'")]
    Timestamp { row: usize, value: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config: unknown table '{table}' (known: {known})")]
    UnknownTable { table: String, known: String },

    #[error("Config: mapping file not found: '{0}'")]
    MappingNotFound(PathBuf),

    #[error("Config: invalid mapping file '{path}': {source}")]
    MappingInvalid {
        path: PathBuf,
        #[source]
        source: ::config::ConfigError,
    },

    #[error("Config: table '{table}' maps source column '{column}' more than once")]
    DuplicateSource { table: String, column: String },

    #[error("Config: destination table '{schema}.{table}' does not exist or has no columns")]
    MissingDestination { schema: String, table: String },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Validate: table '{table}' requires columns missing from the record set: {}", missing.join(", "))]
    MissingColumns { table: String, missing: Vec<String> },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Load: database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Load: failed to serialize geometry of row {row} to WKB: {message}")]
    Geometry { row: usize, message: String },

    #[error("Load: batch {batch} failed: {message}")]
    Batch { batch: usize, message: String },

    #[error("Load: {0}")]
    Destination(String),
}
