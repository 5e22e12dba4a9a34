//! Error types for the contact reconciler.
//!
//! Library crates use [`ReconcilerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::ContactId;

/// Top-level error type for all reconciler operations.
#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    /// Neither an email nor a phone number was supplied.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The contact store could not be reached or returned a malformed row.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A `linked_id` points at a record that does not exist.
    ///
    /// Reconciliation treats this as an anomaly and keeps going; it is only
    /// ever logged, never returned to a caller.
    #[error("contact {id} links to missing parent {missing_parent}")]
    InconsistentLink {
        id: ContactId,
        missing_parent: ContactId,
    },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The HTTP listener failed to bind or stopped with an error.
    #[error("server error on {addr}: {source}")]
    Server {
        addr: String,
        source: std::io::Error,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ReconcilerError>;

impl ReconcilerError {
    /// Create an invalid-input error from any displayable message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Map any backend failure into [`ReconcilerError::StoreUnavailable`].
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a listener failure with the socket address it concerns.
    pub fn server(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Server {
            addr: addr.into(),
            source,
        }
    }

    /// Whether the caller, not the server, is at fault. Never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }

    /// Stable machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "InvalidInput",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::InconsistentLink { .. } => "InconsistentLink",
            Self::Config { .. } => "Config",
            Self::Server { .. } => "Server",
            Self::Io { .. } => "Io",
        }
    }
}
