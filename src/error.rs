//! Error types shared by the index engine, the indexer and the searchable
//! source decorator.
//!
//! Every I/O-facing failure is wrapped into [`CanopyError`] so callers can tell
//! a content source failure from an index failure through [`CanopyError::kind`]
//! without parsing messages.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CanopyError>;

/// Coarse classification of a [`CanopyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Source,
    Index,
    NotFound,
    InvalidWorkspace,
    IllegalState,
    Cancelled,
    InvalidArgument,
    Unsupported,
    Io,
    Serialization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Source => "source",
            ErrorKind::Index => "index",
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidWorkspace => "invalid workspace",
            ErrorKind::IllegalState => "illegal state",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
        };
        f.write_str(name)
    }
}

/// The error type for all canopy operations.
#[derive(Debug, Error)]
pub enum CanopyError {
    /// The content source failed to answer a request.
    #[error("source error: {0}")]
    Source(String),

    /// The index technology failed.
    #[error("index error: {0}")]
    Index(String),

    /// The target location does not exist (any more).
    #[error("not found: {0}")]
    NotFound(String),

    /// The workspace is unknown and could not (or may not) be created.
    #[error("invalid workspace: {0}")]
    InvalidWorkspace(String),

    /// A closed indexer or processor was used.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A blocking wait was interrupted.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CanopyError {
    pub fn source<S: Into<String>>(msg: S) -> Self {
        CanopyError::Source(msg.into())
    }

    pub fn index<S: Into<String>>(msg: S) -> Self {
        CanopyError::Index(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        CanopyError::NotFound(msg.into())
    }

    pub fn invalid_workspace<S: Into<String>>(msg: S) -> Self {
        CanopyError::InvalidWorkspace(msg.into())
    }

    pub fn illegal_state<S: Into<String>>(msg: S) -> Self {
        CanopyError::IllegalState(msg.into())
    }

    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        CanopyError::Cancelled(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        CanopyError::InvalidArgument(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        CanopyError::Unsupported(msg.into())
    }

    /// The coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CanopyError::Source(_) => ErrorKind::Source,
            CanopyError::Index(_) => ErrorKind::Index,
            CanopyError::NotFound(_) => ErrorKind::NotFound,
            CanopyError::InvalidWorkspace(_) => ErrorKind::InvalidWorkspace,
            CanopyError::IllegalState(_) => ErrorKind::IllegalState,
            CanopyError::Cancelled(_) => ErrorKind::Cancelled,
            CanopyError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CanopyError::Unsupported(_) => ErrorKind::Unsupported,
            CanopyError::Io(_) => ErrorKind::Io,
            CanopyError::Json(_) => ErrorKind::Serialization,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CanopyError::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CanopyError::Cancelled(_))
    }

    /// A copy with the same kind and message, for reporting one failure in
    /// several places. I/O and JSON errors become `Index` errors.
    pub(crate) fn replicate(&self) -> CanopyError {
        match self {
            CanopyError::Source(m) => CanopyError::Source(m.clone()),
            CanopyError::Index(m) => CanopyError::Index(m.clone()),
            CanopyError::NotFound(m) => CanopyError::NotFound(m.clone()),
            CanopyError::InvalidWorkspace(m) => CanopyError::InvalidWorkspace(m.clone()),
            CanopyError::IllegalState(m) => CanopyError::IllegalState(m.clone()),
            CanopyError::Cancelled(m) => CanopyError::Cancelled(m.clone()),
            CanopyError::InvalidArgument(m) => CanopyError::InvalidArgument(m.clone()),
            CanopyError::Unsupported(m) => CanopyError::Unsupported(m.clone()),
            other => CanopyError::Index(other.to_string()),
        }
    }
}
