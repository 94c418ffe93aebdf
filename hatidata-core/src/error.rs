//! Error types for hatidata-core

use thiserror::Error;

/// Main error type for the hatidata-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Storage substrate error
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or malformed tool argument
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Branch, trigger, or session required by the operation is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Remote backend network or protocol failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for hatidata-core
pub type Result<T> = std::result::Result<T, Error>;
