//! Unified error type for the buffer orchestrator.
//!
//! Every failure that reaches a caller of the orchestrator is an [`Error`].
//! The type is `Clone` because a single operation settlement may be observed
//! by several awaiters (the original caller and `destroy()`).

use std::fmt;

use crate::media::ContentType;

/// How a caller should react to an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Playback can continue; the failed operation may be retried or skipped.
    Recoverable,
    /// The session cannot continue without intervention.
    Critical,
}

/// Unified error type covering all orchestrator failure modes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The resource threw synchronously while an operation was being started.
    #[error("{content_type} operation threw{}: {cause}", uri_suffix(.uri))]
    OperationThrew {
        /// Buffer the operation was queued on.
        content_type: ContentType,
        /// Segment URI, when the operation was an append.
        uri: Option<String>,
        /// Description of the underlying failure.
        cause: String,
    },

    /// The resource signaled an asynchronous error for the in-flight operation.
    #[error("{content_type} operation failed{}: {cause}", uri_suffix(.uri))]
    OperationFailed {
        /// Buffer the operation was queued on.
        content_type: ContentType,
        /// Segment URI, when the operation was an append.
        uri: Option<String>,
        /// Description of the underlying failure.
        cause: String,
    },

    /// The resource ran out of space while appending.
    #[error("{content_type} buffer quota exceeded{}", uri_suffix(.uri))]
    QuotaExceeded {
        /// Buffer that is full.
        content_type: ContentType,
        /// Segment URI that could not be appended.
        uri: Option<String>,
    },

    /// The orchestrator has been destroyed; no new work is accepted.
    #[error("buffer orchestrator destroyed")]
    Destroyed,

    /// A queued operation was dropped before it could start, by teardown or
    /// because the media session was lost.
    #[error("{content_type} operation aborted by teardown")]
    Aborted {
        /// Buffer the operation was queued on.
        content_type: ContentType,
    },

    /// The platform cannot accept the requested type signature at all.
    #[error("unsupported type signature: {signature}")]
    Unsupported {
        /// Full type signature, e.g. `video/mp4; codecs="hvc1.1.6.L93.90"`.
        signature: String,
    },

    /// A session-level resource operation failed (creation, duration,
    /// end of stream, buffer creation).
    #[error("session error [{step}]: {cause}")]
    Session {
        /// The session step that failed.
        step: String,
        /// Description of the underlying failure.
        cause: String,
    },

    /// Caller input or configuration failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

fn uri_suffix(uri: &Option<String>) -> String {
    match uri {
        Some(uri) => format!(" ({uri})"),
        None => String::new(),
    }
}

impl Error {
    /// Classify this error for the streaming controller.
    pub fn severity(&self) -> Severity {
        match self {
            Error::OperationThrew { .. } => Severity::Critical,
            Error::OperationFailed { .. } => Severity::Critical,
            Error::QuotaExceeded { .. } => Severity::Recoverable,
            Error::Destroyed => Severity::Recoverable,
            Error::Aborted { .. } => Severity::Recoverable,
            Error::Unsupported { .. } => Severity::Critical,
            Error::Session { .. } => Severity::Critical,
            Error::Validation(_) => Severity::Critical,
            Error::Internal(_) => Severity::Critical,
        }
    }

    /// Whether this error was caused by orchestrator teardown.
    pub fn is_teardown(&self) -> bool {
        matches!(self, Error::Destroyed | Error::Aborted { .. })
    }

    /// Convenience constructor for [`Error::OperationThrew`].
    pub fn threw(
        content_type: ContentType,
        uri: Option<String>,
        cause: impl fmt::Display,
    ) -> Self {
        Error::OperationThrew {
            content_type,
            uri,
            cause: cause.to_string(),
        }
    }

    /// Convenience constructor for [`Error::OperationFailed`].
    pub fn failed(
        content_type: ContentType,
        uri: Option<String>,
        cause: impl fmt::Display,
    ) -> Self {
        Error::OperationFailed {
            content_type,
            uri,
            cause: cause.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Session`].
    pub fn session(step: impl Into<String>, cause: impl fmt::Display) -> Self {
        Error::Session {
            step: step.into(),
            cause: cause.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Unsupported`].
    pub fn unsupported(signature: impl Into<String>) -> Self {
        Error::Unsupported {
            signature: signature.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
