//! bl-buffer: serialized operation queues over platform media buffers.
//!
//! A [`BufferOrchestrator`] owns one FIFO per buffer and runs at most one
//! operation per buffer at a time. Completion of `append` and `remove` is
//! signalled out of band by the platform through a [`CompletionHandle`].
//! Session-wide work (duration changes, end of stream, session resets) runs
//! behind barriers that hold every queue until the work is done.
//!
//! The platform is reached only through the traits in [`resource`];
//! [`memory`] provides an in-memory implementation.

pub mod codec_switch;
pub mod deferred;
pub mod memory;
pub mod operation;
pub mod orchestrator;
mod queue;
pub mod ranges;
pub mod resource;
pub mod timestamp;

pub use codec_switch::{CodecSwitchMachine, SwitchDecision, SwitchState, SwitchStrategy};
pub use deferred::{Deferred, DeferredState};
pub use memory::{FailureMode, MemoryPlatform, PlatformCall};
pub use operation::OperationKind;
pub use orchestrator::{
    AppendContext, BufferOrchestrator, MetadataHandler, MetadataSample, Platform, StreamProperties,
};
pub use ranges::TimeRange;
pub use resource::{
    BufferResource, BufferSpec, CompletionHandle, PlaybackElement, ReadyState, ResourceError,
    SessionProvider, SessionResource, TextSink,
};
