//! Platform seams: buffer resources, the owning session, the playback
//! element and the text sink.
//!
//! A [`BufferResource`] reports completion of `append` and `remove` out of
//! band, through the [`CompletionHandle`] it was given when the session
//! created it. After reporting an error with [`CompletionHandle::fail`] a
//! resource must still call [`CompletionHandle::complete`] once the operation
//! has wound down; the orchestrator advances the queue on that second signal.
//! `abort`, `set_timestamp_offset`, `set_append_window` and `change_type`
//! take effect synchronously.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bl_core::{ContentType, EndOfStreamReason, TypeSignature};
use bytes::Bytes;

use crate::ranges::TimeRange;

/// Failure reported by a platform resource.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("{0}")]
    Other(String),
}

/// Lifecycle of a session resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    #[default]
    Closed,
    Open,
    Ended,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Parameters for creating a buffer resource.
#[derive(Debug, Clone)]
pub struct BufferSpec {
    pub content_type: ContentType,
    pub signature: TypeSignature,
    /// Place appended media contiguously instead of at its own timestamps.
    pub sequence_mode: bool,
}

// ---------------------------------------------------------------------------
// Completion signalling
// ---------------------------------------------------------------------------

/// Receiver of out-of-band completion signals.
pub(crate) trait SettleSink: Send + Sync {
    fn settle(
        &self,
        content_type: ContentType,
        generation: u64,
        outcome: Result<(), ResourceError>,
    );
}

/// Out-of-band completion channel handed to a buffer resource at creation.
///
/// Signals from a resource that has since been replaced (after a session
/// reset) are ignored.
#[derive(Clone)]
pub struct CompletionHandle {
    sink: Weak<dyn SettleSink>,
    content_type: ContentType,
    generation: u64,
}

impl CompletionHandle {
    pub(crate) fn new(sink: Weak<dyn SettleSink>, content_type: ContentType, generation: u64) -> Self {
        Self {
            sink,
            content_type,
            generation,
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// The in-flight operation finished.
    pub fn complete(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.settle(self.content_type, self.generation, Ok(()));
        }
    }

    /// The in-flight operation failed. Must be followed by [`complete`](Self::complete).
    pub fn fail(&self, error: ResourceError) {
        if let Some(sink) = self.sink.upgrade() {
            sink.settle(self.content_type, self.generation, Err(error));
        }
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("content_type", &self.content_type)
            .field("generation", &self.generation)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Platform sink for one content type.
pub trait BufferResource: Send + Sync {
    /// Start appending; completion is signalled through the handle.
    fn append(&self, data: Bytes) -> Result<(), ResourceError>;

    /// Start removing `[start, end)`; completion is signalled through the handle.
    fn remove(&self, start: f64, end: f64) -> Result<(), ResourceError>;

    /// Reset the parser state.
    fn abort(&self) -> Result<(), ResourceError>;

    fn set_timestamp_offset(&self, offset: f64) -> Result<(), ResourceError>;

    fn timestamp_offset(&self) -> f64;

    fn set_append_window(&self, start: f64, end: f64) -> Result<(), ResourceError>;

    /// Switch the accepted type signature in place.
    fn change_type(&self, signature: &TypeSignature) -> Result<(), ResourceError>;

    fn buffered(&self) -> Vec<TimeRange>;
}

/// Platform session owning every buffer resource of one playback.
#[async_trait]
pub trait SessionResource: Send + Sync {
    /// Resolves once the session accepts buffers.
    async fn ready(&self) -> Result<(), ResourceError>;

    fn ready_state(&self) -> ReadyState;

    fn is_type_supported(&self, signature: &TypeSignature) -> bool;

    /// Whether buffers created by this session implement `change_type`.
    fn supports_change_type(&self) -> bool;

    fn add_buffer(
        &self,
        spec: &BufferSpec,
        completion: CompletionHandle,
    ) -> Result<Arc<dyn BufferResource>, ResourceError>;

    fn remove_buffer(&self, content_type: ContentType) -> Result<(), ResourceError>;

    fn duration(&self) -> f64;

    /// Shrinking below the buffered end evicts media; each affected buffer
    /// signals a completion for the eviction.
    fn set_duration(&self, duration: f64) -> Result<(), ResourceError>;

    fn end_of_stream(&self, reason: Option<EndOfStreamReason>) -> Result<(), ResourceError>;
}

/// Creates fresh sessions, initially and on every reset.
pub trait SessionProvider: Send + Sync {
    fn create_session(&self) -> Result<Arc<dyn SessionResource>, ResourceError>;
}

/// Element the session is attached to.
pub trait PlaybackElement: Send + Sync {
    fn current_time(&self) -> f64;
    fn set_current_time(&self, time: f64);
    fn paused(&self) -> bool;
    fn play(&self);
    fn autoplay(&self) -> bool;
    fn set_autoplay(&self, autoplay: bool);
    fn attach(&self, session: Arc<dyn SessionResource>);
}

/// Destination for text segments, appended outside the operation queues.
#[async_trait]
pub trait TextSink: Send + Sync {
    async fn append(&self, data: Bytes, start: f64, end: f64) -> Result<(), ResourceError>;
    async fn remove(&self, start: f64, end: f64) -> Result<(), ResourceError>;
    fn set_timestamp_offset(&self, offset: f64);
    fn set_append_window(&self, start: f64, end: f64);
    fn buffered(&self) -> Vec<TimeRange>;
}
