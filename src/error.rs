//! Error types for schema loading and dereferencing.

use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by [`Retrieve`](crate::Retrieve) implementations.
pub type RetrieveError = Box<dyn std::error::Error + Send + Sync>;

/// Errors during dereferencing.
///
/// Dereferencing is all-or-nothing: any of these aborts the whole call.
#[derive(Debug, Error)]
pub enum DerefError {
    // IO errors (exit code 3)
    #[error("cannot retrieve {uri}: {source}")]
    Retrieval {
        uri: String,
        #[source]
        source: RetrieveError,
    },

    // Schema errors (exit code 2)
    #[error("unresolved reference \"{reference}\" (resolved to {uri})")]
    UnresolvedReference { reference: String, uri: String },

    #[error("malformed JSON pointer \"{pointer}\": {reason}")]
    MalformedPointer { pointer: String, reason: String },

    #[error("invalid URI \"{uri}\": {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("schema graph is cyclic at {pointer}")]
    Cyclic { pointer: String },
}

impl DerefError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            DerefError::Retrieval { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors while loading schema documents from files, strings and URLs.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unsupported location: {uri}")]
    UnsupportedLocation { uri: String },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. }
            | LoadError::ReadError { .. }
            | LoadError::UnsupportedLocation { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            LoadError::InvalidJson { .. } => 2,
        }
    }
}
