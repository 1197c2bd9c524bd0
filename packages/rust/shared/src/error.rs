//! Error types for docforest.
//!
//! Library crates use [`DocForestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docforest operations.
#[derive(Debug, thiserror::Error)]
pub enum DocForestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network or object-store error while fetching a blob.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Tolerant markup parse failed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Strict structural re-validation rejected the normalized markup.
    #[error("strict parse error: {message}")]
    StrictParse { message: String },

    /// Artifact store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad asset id, checksum mismatch, broken tree, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// CSV, JSON or base64 encode/decode error.
    #[error("codec error: {0}")]
    Codec(String),

    /// A pipeline stage aborted because one of its items failed.
    #[error("{phase} aborted at {item}: {reason}")]
    Phase {
        phase: String,
        item: String,
        reason: String,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocForestError>;

impl DocForestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a tolerant-parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a strict-parse error from any displayable message.
    pub fn strict(msg: impl Into<String>) -> Self {
        Self::StrictParse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
