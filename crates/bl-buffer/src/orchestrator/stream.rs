//! Stream property changes, codec switching and session reset.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bl_core::events::{EventCategory, EventPayload};
use bl_core::{ContentType, Error, Result, TrackDescriptor, TypeSignature};

use super::shared::Shared;
use super::BufferOrchestrator;
use crate::codec_switch::{self, CodecSwitch, SwitchDecision, SwitchStrategy};
use crate::deferred::Deferred;
use crate::operation::{Completion, OperationKind};
use crate::resource::{BufferSpec, ResourceError};

/// Below this distance from the buffered end a resync is skipped.
const RESYNC_THRESHOLD_SECS: f64 = 0.15;

/// Properties applied when the controller moves to a new period or variant.
#[derive(Debug, Clone)]
pub struct StreamProperties {
    pub timestamp_offset: f64,
    pub append_window_start: f64,
    pub append_window_end: f64,
    /// Leave the buffer's offset untouched.
    pub ignore_timestamp_offset: bool,
    /// New type signature, when the variant may have changed codecs.
    pub signature: Option<TypeSignature>,
    /// Descriptors for the other buffers, applied if a reset recreates them.
    pub tracks_by_type: BTreeMap<ContentType, TrackDescriptor>,
}

impl Default for StreamProperties {
    fn default() -> Self {
        Self {
            timestamp_offset: 0.0,
            append_window_start: 0.0,
            append_window_end: f64::INFINITY,
            ignore_timestamp_offset: false,
            signature: None,
            tracks_by_type: BTreeMap::new(),
        }
    }
}

impl StreamProperties {
    pub fn new(timestamp_offset: f64) -> Self {
        Self {
            timestamp_offset,
            ..Self::default()
        }
    }

    pub fn with_append_window(mut self, start: f64, end: f64) -> Self {
        self.append_window_start = start;
        self.append_window_end = end;
        self
    }

    pub fn with_signature(mut self, signature: TypeSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_track(mut self, content_type: ContentType, track: TrackDescriptor) -> Self {
        self.tracks_by_type.insert(content_type, track);
        self
    }

    pub fn ignoring_timestamp_offset(mut self) -> Self {
        self.ignore_timestamp_offset = true;
        self
    }
}

impl BufferOrchestrator {
    /// Apply new stream properties to a buffer, switching codecs first if
    /// the signature changed.
    pub fn set_stream_properties(
        &self,
        content_type: ContentType,
        properties: StreamProperties,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let queued = self.queue_stream_properties(content_type, properties);
        async move {
            for pending in queued? {
                pending.wait().await?;
            }
            Ok(())
        }
    }

    fn queue_stream_properties(
        &self,
        content_type: ContentType,
        properties: StreamProperties,
    ) -> Result<Vec<Deferred<()>>> {
        let shared = &self.shared;
        if content_type.is_text() {
            return self.apply_text_properties(&properties).map(|()| Vec::new());
        }

        let mut pending = Vec::new();
        let mut switched = false;
        if let Some(signature) = &properties.signature {
            if let Some(switch) = self.evaluate_switch(content_type, signature)? {
                switched = true;
                pending.push(self.start_switch(&switch, &properties)?);
            }
        }

        if !switched {
            pending.push(shared.enqueue_abort(content_type)?);
        }
        if !properties.ignore_timestamp_offset {
            pending.push(shared.enqueue_set_offset(content_type, properties.timestamp_offset)?);
        }
        pending.push(shared.enqueue_set_window(
            content_type,
            properties.append_window_start,
            properties.append_window_end,
        )?);
        Ok(pending)
    }

    fn apply_text_properties(&self, properties: &StreamProperties) -> Result<()> {
        let Some(sink) = self.shared.platform.text_sink.clone() else {
            return Err(Error::Validation("no text sink".into()));
        };
        {
            let mut st = self.shared.state.lock();
            if st.destroyed {
                return Err(Error::Destroyed);
            }
            let Some(text) = st.text.as_mut() else {
                return Err(Error::Validation("no text track".into()));
            };
            if !properties.ignore_timestamp_offset {
                text.timestamp_offset = properties.timestamp_offset;
            }
            text.append_window = (properties.append_window_start, properties.append_window_end);
        }
        if !properties.ignore_timestamp_offset {
            sink.set_timestamp_offset(properties.timestamp_offset);
        }
        sink.set_append_window(properties.append_window_start, properties.append_window_end);
        Ok(())
    }

    /// Run the switch machine; `None` when the signature is unchanged.
    fn evaluate_switch(&self, content_type: ContentType, to: &TypeSignature) -> Result<Option<CodecSwitch>> {
        let shared = &self.shared;
        let session = {
            let st = shared.state.lock();
            if st.destroyed {
                return Err(Error::Destroyed);
            }
            st.session.clone()
        };

        let decision = {
            let mut guard = shared.state.lock();
            let st = &mut *guard;
            let Some(from) = st.buffers.get(&content_type).map(|b| b.signature.clone()) else {
                return Err(Error::Validation(format!("no {content_type} buffer")));
            };
            let caps = shared.capabilities(st);
            st.switch.evaluate(content_type, &from, to, caps)
        };
        let SwitchDecision::Switch(switch) = decision else {
            return Ok(None);
        };

        if !session.is_some_and(|s| s.is_type_supported(to)) {
            shared.state.lock().switch.complete();
            tracing::warn!(content_type = %content_type, signature = %to, "Codec switch target is not supported");
            return Err(Error::unsupported(to.to_string()));
        }
        Ok(Some(switch))
    }

    fn start_switch(&self, switch: &CodecSwitch, properties: &StreamProperties) -> Result<Deferred<()>> {
        let shared = &self.shared;
        let content_type = switch.content_type;
        tracing::info!(
            content_type = %content_type,
            from = %switch.from,
            to = %switch.to,
            strategy = %switch.strategy,
            reason = ?switch.reason,
            "Switching codecs"
        );
        shared.events.broadcast(
            EventCategory::Buffer,
            EventPayload::CodecSwitched {
                content_type,
                from: switch.from.to_string(),
                to: switch.to.to_string(),
                strategy: switch.strategy.to_string(),
            },
        );

        // An in-place switch records the signature once the resource accepts it.
        if switch.strategy == SwitchStrategy::Reset {
            let mut st = shared.state.lock();
            if let Some(buffer) = st.buffers.get_mut(&content_type) {
                buffer.signature = switch.to.clone();
            }
            for (other, track) in &properties.tracks_by_type {
                if *other == content_type {
                    continue;
                }
                if let Some(buffer) = st.buffers.get_mut(other) {
                    buffer.signature = track.signature();
                    buffer.expect_encrypted = track.expects_encryption();
                }
            }
        }

        let queued = match switch.strategy {
            SwitchStrategy::InPlace => self.enqueue_change_type(content_type, switch.to.clone()),
            SwitchStrategy::Reset => shared.spawn_barrier("reset", reset_session),
        };
        if queued.is_err() {
            shared.state.lock().switch.complete();
        }
        queued
    }

    fn enqueue_change_type(&self, content_type: ContentType, to: TypeSignature) -> Result<Deferred<()>> {
        let weak = Arc::downgrade(&self.shared);
        self.shared.enqueue(
            content_type,
            OperationKind::ChangeType,
            None,
            Box::new(move |res| {
                let outcome = res.change_type(&to);
                if let Some(shared) = weak.upgrade() {
                    let mut st = shared.state.lock();
                    match &outcome {
                        Ok(()) => {
                            if let Some(buffer) = st.buffers.get_mut(&content_type) {
                                buffer.signature = to.clone();
                            }
                        }
                        Err(ResourceError::NotSupported(_)) => st.switch.mark_change_type_broken(),
                        Err(_) => {}
                    }
                    st.switch.complete();
                }
                outcome?;
                Ok(Completion::Immediate)
            }),
        )
    }

    /// Re-anchor a sequence-mode buffer at `timestamp` after a discontinuity.
    pub fn resync(
        &self,
        content_type: ContentType,
        timestamp: f64,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let queued = self.queue_resync(content_type, timestamp);
        async move {
            for pending in queued? {
                pending.wait().await?;
            }
            Ok(())
        }
    }

    fn queue_resync(&self, content_type: ContentType, timestamp: f64) -> Result<Vec<Deferred<()>>> {
        if content_type.is_text() {
            return Ok(Vec::new());
        }
        let sequence_mode = {
            let mut st = self.shared.state.lock();
            if st.destroyed {
                return Err(Error::Destroyed);
            }
            if content_type == ContentType::Video {
                st.sync.reset();
            }
            st.sequence_mode
        };
        if !sequence_mode {
            return Ok(Vec::new());
        }
        if let Some(end) = self.buffer_end(content_type) {
            if (end - timestamp).abs() < RESYNC_THRESHOLD_SECS {
                tracing::debug!(content_type = %content_type, end, timestamp, "Skipping resync near buffered end");
                return Ok(Vec::new());
            }
        }
        Ok(vec![
            self.shared.enqueue_abort(content_type)?,
            self.shared.enqueue_set_offset(content_type, timestamp)?,
        ])
    }

    /// Whether moving `content_type` to the given track would need a full
    /// session reset.
    pub fn is_reset_necessary(
        &self,
        content_type: ContentType,
        track: &TrackDescriptor,
        mime_type: &str,
        codecs: &str,
    ) -> bool {
        let st = self.shared.state.lock();
        let Some(buffer) = st.buffers.get(&content_type) else {
            return false;
        };
        if track.expects_encryption() != buffer.expect_encrypted {
            return true;
        }
        let to = TypeSignature::new(mime_type, codecs);
        let caps = self.shared.capabilities(&st);
        matches!(
            codec_switch::decide(content_type, &buffer.signature, &to, &caps),
            SwitchDecision::Switch(CodecSwitch {
                strategy: SwitchStrategy::Reset,
                ..
            })
        )
    }

    /// Tear down and recreate the session behind a barrier, restoring
    /// playback position and transport state.
    pub fn reset_session(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let queued = self.shared.spawn_barrier("reset", reset_session);
        async move { queued?.wait().await }
    }
}

async fn reset_session(shared: Arc<Shared>) -> Result<()> {
    let element = Arc::clone(&shared.platform.element);
    let position = element.current_time();
    let paused = element.paused();
    let autoplay = element.autoplay();
    element.set_autoplay(false);

    tracing::info!(position, paused, "Resetting media session");
    shared
        .events
        .broadcast(EventCategory::Session, EventPayload::ResetStarted { position });

    let outcome = rebuild_session(&shared).await;

    element.set_current_time(position);
    element.set_autoplay(autoplay);
    if !paused {
        element.play();
    }
    shared.state.lock().switch.complete();

    match &outcome {
        Ok(()) => shared.events.broadcast(
            EventCategory::Session,
            EventPayload::ResetCompleted {
                position,
                resumed: !paused,
            },
        ),
        Err(e) => {
            tracing::error!("Session reset failed: {e}");
            shared.events.broadcast(
                EventCategory::Session,
                EventPayload::ResetFailed {
                    position,
                    error: e.to_string(),
                },
            );
        }
    }
    outcome
}

async fn rebuild_session(shared: &Arc<Shared>) -> Result<()> {
    let (old_session, types) = {
        let st = shared.state.lock();
        if st.destroyed {
            return Err(Error::Destroyed);
        }
        (st.session.clone(), st.buffers.keys().copied().collect::<Vec<_>>())
    };

    let mut old_duration = None;
    if let Some(old) = &old_session {
        for content_type in &types {
            if let Err(e) = old.remove_buffer(*content_type) {
                tracing::warn!(content_type = %content_type, "Failed to remove buffer during reset: {e}");
            }
        }
        old_duration = Some(old.duration()).filter(|d| d.is_finite() && *d > 0.0);
    }

    // The old buffers are gone; past this point the state must not keep
    // pointing at them.
    let outcome = attach_session(shared, old_duration).await;
    if outcome.is_err() {
        shared.fail(&types);
    }
    outcome
}

async fn attach_session(shared: &Arc<Shared>, old_duration: Option<f64>) -> Result<()> {
    let session = shared
        .platform
        .provider
        .create_session()
        .map_err(|e| Error::session("create_session", e))?;
    shared.platform.element.attach(Arc::clone(&session));
    session.ready().await.map_err(|e| Error::session("ready", e))?;
    if let Some(duration) = old_duration {
        session
            .set_duration(duration)
            .map_err(|e| Error::session("set_duration", e))?;
    }

    let (generation, specs) = {
        let mut st = shared.state.lock();
        if st.destroyed {
            return Err(Error::Destroyed);
        }
        st.generation += 1;
        st.session = Some(Arc::clone(&session));
        let sequence_mode = st.sequence_mode;
        let specs: Vec<_> = st
            .buffers
            .iter()
            .map(|(ct, b)| {
                let spec = BufferSpec {
                    content_type: *ct,
                    signature: b.signature.clone(),
                    sequence_mode,
                };
                (spec, b.timestamp_offset, b.append_window)
            })
            .collect();
        (st.generation, specs)
    };

    for (spec, offset, (window_start, window_end)) in specs {
        let content_type = spec.content_type;
        let handle = shared.completion_handle(content_type, generation);
        let resource = session
            .add_buffer(&spec, handle)
            .map_err(|e| Error::session("add_buffer", e))?;
        resource
            .set_timestamp_offset(offset)
            .map_err(|e| Error::threw(content_type, None, e))?;
        resource
            .set_append_window(window_start, window_end)
            .map_err(|e| Error::threw(content_type, None, e))?;

        let mut st = shared.state.lock();
        if let Some(buffer) = st.buffers.get_mut(&content_type) {
            buffer.resource = resource;
            buffer.timescale = None;
        }
        tracing::debug!(content_type = %content_type, signature = %spec.signature, "Buffer recreated");
    }
    Ok(())
}
