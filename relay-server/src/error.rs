//! Error types for relay-server
//!
//! Probe failures and client write failures are recovered where they happen and
//! never become an `Error`; what remains here is what callers must handle.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for relay-server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opening the song failed
    #[error("Cannot open source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading from the source or pacing it failed mid-stream
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reading a static asset failed for a reason other than absence
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<relay_common::Error> for Error {
    fn from(err: relay_common::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience Result type using relay-server Error
pub type Result<T> = std::result::Result<T, Error>;
