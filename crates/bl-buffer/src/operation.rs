//! Queued buffer operations.

use std::fmt;

use bl_core::Error;

use crate::deferred::Deferred;
use crate::resource::{BufferResource, ResourceError};

/// Identifier of an operation, unique within one orchestrator.
pub type OperationId = u64;

/// What an operation does. Used for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Append,
    Remove,
    Abort,
    SetTimestampOffset,
    SetAppendWindow,
    ChangeType,
    /// Synchronizing entry of a barrier; held at the head until released.
    Barrier,
    /// Stand-in for a completion signal the platform raises on its own
    /// (duration-driven eviction).
    Placeholder,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Append => "append",
            Self::Remove => "remove",
            Self::Abort => "abort",
            Self::SetTimestampOffset => "set_timestamp_offset",
            Self::SetAppendWindow => "set_append_window",
            Self::ChangeType => "change_type",
            Self::Barrier => "barrier",
            Self::Placeholder => "placeholder",
        };
        f.write_str(s)
    }
}

/// How a started operation will finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The resource raises a completion signal later.
    Signaled,
    /// The effect was synchronous; completion is synthesized right away.
    Immediate,
    /// The entry stays at the head until explicitly released.
    Held,
}

/// Side-effecting start action, run once when the operation reaches the head.
pub(crate) type StartFn =
    Box<dyn FnOnce(&dyn BufferResource) -> Result<Completion, ResourceError> + Send>;

pub(crate) struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// `None` once started (or for placeholders, which never start).
    pub start: Option<StartFn>,
    pub result: Deferred<()>,
    /// Barrier entries resolve this when they reach the head.
    pub ready: Option<Deferred<()>>,
    /// Diagnostic URI of the segment being appended.
    pub uri: Option<String>,
}

impl Operation {
    pub fn new(id: OperationId, kind: OperationKind, uri: Option<String>, start: StartFn) -> Self {
        Self {
            id,
            kind,
            start: Some(start),
            result: Deferred::new(),
            ready: None,
            uri,
        }
    }

    /// A barrier entry: reaching the head resolves the returned signal and
    /// holds.
    pub fn barrier(id: OperationId) -> (Self, Deferred<()>) {
        let ready = Deferred::new();
        let signal = ready.clone();
        let start: StartFn = Box::new(move |_| {
            signal.resolve(());
            Ok(Completion::Held)
        });
        let op = Self {
            id,
            kind: OperationKind::Barrier,
            start: Some(start),
            result: Deferred::new(),
            ready: Some(ready.clone()),
            uri: None,
        };
        (op, ready)
    }

    /// An entry that is considered already started.
    pub fn placeholder(id: OperationId) -> Self {
        Self {
            id,
            kind: OperationKind::Placeholder,
            start: None,
            result: Deferred::new(),
            ready: None,
            uri: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.start.is_none()
    }

    /// Reject without running; used on teardown.
    pub fn abort(self, error: Error) {
        if let Some(ready) = &self.ready {
            ready.reject(error.clone());
        }
        self.result.reject(error);
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("started", &self.is_started())
            .field("result", &self.result)
            .field("uri", &self.uri)
            .finish()
    }
}
