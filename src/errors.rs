//! Structured error types.
//!
//! The reconstruction passes never fail on data problems. These are the
//! failures a caller may want to match on: dump files that cannot be parsed
//! and user-supplied probe delta pairs that do not make sense.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("{}:{line}: malformed trace line: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{}:{line}: unexpected event '{tag}'", .path.display())]
    UnknownEvent {
        path: PathBuf,
        line: usize,
        tag: String,
    },

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeltaError {
    #[error("probe index {index} out of range ({available} probes)")]
    UnknownProbe { index: usize, available: usize },

    #[error("invalid delta pair '{spec}', expected two probe indices like '1,2'")]
    InvalidPair { spec: String },
}
