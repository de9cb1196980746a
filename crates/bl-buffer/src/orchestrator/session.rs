//! Session lifecycle: init, duration, end of stream and teardown.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bl_core::events::{EventCategory, EventPayload};
use bl_core::{ContentType, EndOfStreamReason, Error, ManifestKind, Result, TrackDescriptor};

use super::shared::{BufferState, Shared, TextState};
use super::BufferOrchestrator;
use crate::queue::OperationQueue;
use crate::ranges;
use crate::resource::{BufferSpec, ReadyState};

impl BufferOrchestrator {
    /// Open a session and create one buffer per media track.
    pub async fn init(
        &self,
        tracks_by_type: BTreeMap<ContentType, TrackDescriptor>,
        sequence_mode: bool,
        manifest_kind: ManifestKind,
        ignore_drift: bool,
    ) -> Result<()> {
        let shared = &self.shared;
        {
            let st = shared.state.lock();
            if st.destroyed {
                return Err(Error::Destroyed);
            }
            if st.session.is_some() {
                return Err(Error::Validation("orchestrator already initialized".into()));
            }
        }

        let session = shared
            .platform
            .provider
            .create_session()
            .map_err(|e| Error::session("create_session", e))?;
        shared.platform.element.attach(Arc::clone(&session));
        session.ready().await.map_err(|e| Error::session("ready", e))?;

        let split_muxed = shared.config.split_muxed_content
            && !tracks_by_type.contains_key(&ContentType::Audio)
            && tracks_by_type
                .get(&ContentType::Video)
                .is_some_and(|t| t.signature().is_muxed());

        for (content_type, track) in &tracks_by_type {
            let signature = track.signature();
            if !content_type.is_text() && !session.is_type_supported(&signature) {
                tracing::error!(content_type = %content_type, signature = %signature, "Track type is not supported");
                return Err(Error::unsupported(signature.to_string()));
            }
        }

        let generation = shared.state.lock().generation;
        let mut buffers = BTreeMap::new();
        let mut text = None;
        for (content_type, track) in &tracks_by_type {
            if content_type.is_text() {
                text = Some(TextState {
                    signature: track.signature(),
                    timestamp_offset: 0.0,
                    append_window: (0.0, f64::INFINITY),
                });
                continue;
            }
            let spec = BufferSpec {
                content_type: *content_type,
                signature: track.signature(),
                sequence_mode,
            };
            let handle = shared.completion_handle(*content_type, generation);
            let resource = session
                .add_buffer(&spec, handle)
                .map_err(|e| Error::session("add_buffer", e))?;
            buffers.insert(
                *content_type,
                BufferState::new(resource, spec.signature, track.expects_encryption()),
            );
        }

        let installed = {
            let mut st = shared.state.lock();
            if st.destroyed {
                false
            } else {
                st.queues = buffers.keys().map(|ct| (*ct, OperationQueue::new())).collect();
                st.buffers = buffers;
                st.text = text;
                st.session = Some(Arc::clone(&session));
                st.sequence_mode = sequence_mode;
                st.manifest_kind = manifest_kind;
                st.ignore_drift = ignore_drift;
                st.split_muxed = split_muxed;
                true
            }
        };
        if !installed {
            for content_type in tracks_by_type.keys().filter(|ct| !ct.is_text()) {
                let _ = session.remove_buffer(*content_type);
            }
            return Err(Error::Destroyed);
        }

        tracing::info!(
            session = %shared.events.session(),
            tracks = tracks_by_type.len(),
            sequence_mode,
            manifest = %manifest_kind,
            split_muxed,
            "Buffer orchestrator initialized"
        );
        Ok(())
    }

    /// Signal the end of the stream once every queued operation has run.
    pub fn end_of_stream(
        &self,
        reason: Option<EndOfStreamReason>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let queued = self.shared.spawn_barrier("end_of_stream", move |shared| async move {
            let Some(session) = shared.session() else {
                return Ok(());
            };
            let state = session.ready_state();
            if matches!(state, ReadyState::Ended | ReadyState::Closed) {
                tracing::debug!(ready_state = %state, "Skipping end of stream");
                return Ok(());
            }
            session
                .end_of_stream(reason)
                .map_err(|e| Error::session("end_of_stream", e))?;
            shared
                .events
                .broadcast(EventCategory::Session, EventPayload::EndOfStream { reason });
            Ok(())
        });
        async move { queued?.wait().await }
    }

    /// Set the presentation duration once every queued operation has run.
    pub fn set_duration(&self, duration: f64) -> impl Future<Output = Result<()>> + Send + 'static {
        let queued = if duration.is_nan() || duration < 0.0 {
            Err(Error::Validation(format!("invalid duration {duration}")))
        } else {
            self.shared
                .spawn_barrier("set_duration", move |shared| apply_duration(shared, duration))
        };
        async move { queued?.wait().await }
    }

    /// Reject queued work, wait for in-flight work and release the session.
    /// Safe to call more than once.
    pub async fn destroy(&self) -> Result<()> {
        self.shared.destroy().await
    }
}

async fn apply_duration(shared: Arc<Shared>, duration: f64) -> Result<()> {
    let Some(session) = shared.session() else {
        return Err(Error::session("set_duration", "no session"));
    };

    let mut placeholders = Vec::new();
    let current = session.duration();
    if current.is_nan() || duration < current {
        // Shrinking evicts media, and every affected buffer signals a
        // completion nobody queued.
        let resources: Vec<_> = {
            let st = shared.state.lock();
            st.buffers
                .iter()
                .map(|(ct, b)| (*ct, Arc::clone(&b.resource)))
                .collect()
        };
        for (content_type, resource) in resources {
            let evicts = ranges::buffer_end(&resource.buffered()).is_some_and(|end| end > duration);
            if evicts {
                if let Some(id) = shared.unshift_placeholder(content_type) {
                    placeholders.push((content_type, id));
                }
            }
        }
    }

    if let Err(e) = session.set_duration(duration) {
        shared.drop_placeholders(&placeholders);
        return Err(Error::session("set_duration", e));
    }
    tracing::debug!(duration, evicting = placeholders.len(), "Duration set");
    shared
        .events
        .broadcast(EventCategory::Session, EventPayload::DurationChanged { duration });
    Ok(())
}
