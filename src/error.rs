//! Error types for the delivery benchmark.
//!
//! Nothing below the sweep loop lets these escape a trial: the runner turns
//! them into recorded events and an early return.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An external command or stream did not finish within its bound.
    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    /// A command could not be started at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command line was empty after prefixing.
    #[error("empty command line")]
    EmptyCommand,

    /// A baseline image was requested for an experiment with no old version.
    #[error("experiment {0} has no old version")]
    MissingOldVersion(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
