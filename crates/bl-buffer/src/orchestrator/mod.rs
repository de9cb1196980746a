//! The buffer orchestrator: composition root over the per-buffer queues.
//!
//! Every mutating call enqueues its work synchronously and returns a
//! `'static` future for the outcome, so call order is submission order even
//! when the futures are awaited later (or never).

mod append;
mod session;
pub(crate) mod shared;
mod stream;

use std::fmt;
use std::sync::Arc;

use bl_core::config::BufferConfig;
use bl_core::events::EventBus;
use bl_core::{ContentType, SessionId, TypeSignature};
use bl_media::Id3Frame;

use crate::codec_switch::SwitchState;
use crate::operation::OperationKind;
use crate::ranges::{self, TimeRange};
use crate::resource::{PlaybackElement, ReadyState, SessionProvider, TextSink};

pub use append::AppendContext;
pub use stream::StreamProperties;

use shared::Shared;

/// Platform collaborators handed to the orchestrator.
#[derive(Clone)]
pub struct Platform {
    pub provider: Arc<dyn SessionProvider>,
    pub element: Arc<dyn PlaybackElement>,
    pub text_sink: Option<Arc<dyn TextSink>>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("text_sink", &self.text_sink.is_some())
            .finish_non_exhaustive()
    }
}

/// ID3 frames found in a raw audio segment.
#[derive(Debug, Clone)]
pub struct MetadataSample {
    /// Declared start of the segment that carried the frames.
    pub start_time: f64,
    pub end_time: f64,
    pub frames: Vec<Id3Frame>,
}

/// Callback receiving forwarded ID3 metadata.
pub type MetadataHandler = Arc<dyn Fn(&MetadataSample) + Send + Sync>;

/// Serializes buffer operations for one playback session.
pub struct BufferOrchestrator {
    shared: Arc<Shared>,
}

impl BufferOrchestrator {
    pub fn new(platform: Platform, config: BufferConfig) -> Self {
        let events = Arc::new(EventBus::new(SessionId::new(), 256));
        Self {
            shared: Arc::new(Shared::new(platform, config, events)),
        }
    }

    /// Diagnostic event bus.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.shared.events)
    }

    pub fn config(&self) -> &BufferConfig {
        &self.shared.config
    }

    pub fn set_metadata_handler<F>(&self, handler: F)
    where
        F: Fn(&MetadataSample) + Send + Sync + 'static,
    {
        self.shared.state.lock().metadata_handler = Some(Arc::new(handler));
    }

    // -- Queries ------------------------------------------------------------

    pub fn buffered_ranges_for(&self, content_type: ContentType) -> Vec<TimeRange> {
        if content_type.is_text() {
            return self
                .shared
                .platform
                .text_sink
                .as_ref()
                .map(|sink| sink.buffered())
                .unwrap_or_default();
        }
        self.shared
            .resource(content_type)
            .map(|res| res.buffered())
            .unwrap_or_default()
    }

    pub fn buffer_start(&self, content_type: ContentType) -> Option<f64> {
        ranges::buffer_start(&self.buffered_ranges_for(content_type))
    }

    pub fn buffer_end(&self, content_type: ContentType) -> Option<f64> {
        ranges::buffer_end(&self.buffered_ranges_for(content_type))
    }

    /// Whether `time` is buffered, tolerating the configured small gap.
    pub fn is_buffered(&self, content_type: ContentType, time: f64) -> bool {
        ranges::is_buffered(
            &self.buffered_ranges_for(content_type),
            time,
            self.shared.config.small_gap_limit_secs,
        )
    }

    pub fn buffered_ahead_of(&self, content_type: ContentType, time: f64) -> f64 {
        ranges::buffered_ahead_of(&self.buffered_ranges_for(content_type), time)
    }

    /// Whether the session has been ended.
    pub fn is_ended(&self) -> bool {
        self.shared
            .session()
            .is_some_and(|s| s.ready_state() == ReadyState::Ended)
    }

    pub fn signature(&self, content_type: ContentType) -> Option<TypeSignature> {
        let st = self.shared.state.lock();
        if content_type.is_text() {
            return st.text.as_ref().map(|t| t.signature.clone());
        }
        st.buffers.get(&content_type).map(|b| b.signature.clone())
    }

    /// Offset as last enqueued for the buffer.
    pub fn timestamp_offset(&self, content_type: ContentType) -> Option<f64> {
        let st = self.shared.state.lock();
        if content_type.is_text() {
            return st.text.as_ref().map(|t| t.timestamp_offset);
        }
        st.buffers.get(&content_type).map(|b| b.timestamp_offset)
    }

    /// Entries on the buffer's queue, including the one in flight.
    pub fn queue_len(&self, content_type: ContentType) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(&content_type)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Kinds of the entries on the buffer's queue, head first.
    pub fn queued_operations(&self, content_type: ContentType) -> Vec<OperationKind> {
        self.shared
            .state
            .lock()
            .queues
            .get(&content_type)
            .map(|q| q.kinds())
            .unwrap_or_default()
    }

    pub fn content_types(&self) -> Vec<ContentType> {
        let st = self.shared.state.lock();
        let mut types: Vec<ContentType> = st.buffers.keys().copied().collect();
        if st.text.is_some() {
            types.push(ContentType::Text);
        }
        types
    }

    pub fn switch_state(&self) -> SwitchState {
        self.shared.state.lock().switch.state()
    }

    /// Codec switches so far that required a session reset.
    pub fn reset_count(&self) -> u32 {
        self.shared.state.lock().switch.reset_count()
    }

    pub fn text_offset_established(&self) -> bool {
        self.shared.state.lock().sync.is_established()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.state.lock().destroyed
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().session.is_some()
    }
}

impl fmt::Debug for BufferOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("BufferOrchestrator")
            .field("session", &self.shared.events.session())
            .field("destroyed", &st.destroyed)
            .field("generation", &st.generation)
            .field("buffers", &st.buffers.keys().collect::<Vec<_>>())
            .field("sequence_mode", &st.sequence_mode)
            .finish()
    }
}
