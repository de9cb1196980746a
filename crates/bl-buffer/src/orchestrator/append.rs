//! Segment appends, removals and clears.

use std::future::Future;
use std::sync::Arc;

use bl_core::events::{EventCategory, EventPayload};
use bl_core::{ContentType, Error, ManifestKind, Result, SegmentReference};
use bl_media::ContainerFormat;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::{BufferOrchestrator, MetadataSample};
use crate::deferred::Deferred;
use crate::operation::{Completion, OperationKind};
use crate::ranges;
use crate::timestamp::{self, best_content_type};

/// How the streaming controller arrived at this append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendContext {
    /// First append after a seek.
    pub seeked: bool,
    /// First append after an automatic variant change.
    pub adaptation: bool,
}

impl AppendContext {
    pub fn seeked() -> Self {
        Self {
            seeked: true,
            adaptation: false,
        }
    }

    pub fn adaptation() -> Self {
        Self {
            seeked: false,
            adaptation: true,
        }
    }

    fn is_boundary(self) -> bool {
        self.seeked || self.adaptation
    }
}

/// Buffer facts read once per append.
struct AppendView {
    format: ContainerFormat,
    timescale: Option<u32>,
    expect_encrypted: bool,
    active_offset: f64,
    sequence_mode: bool,
    manifest_kind: ManifestKind,
    ignore_drift: bool,
}

fn await_queued(queued: Result<Deferred<()>>) -> BoxFuture<'static, Result<()>> {
    async move { queued?.wait().await }.boxed()
}

impl BufferOrchestrator {
    /// Append a segment. Init segments are appended with no reference.
    pub fn append_segment(
        &self,
        content_type: ContentType,
        data: Bytes,
        reference: Option<&SegmentReference>,
        context: AppendContext,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        if content_type.is_text() {
            return self.append_text(data, reference);
        }
        await_queued(self.queue_media_append(content_type, data, reference, context))
    }

    fn queue_media_append(
        &self,
        content_type: ContentType,
        data: Bytes,
        reference: Option<&SegmentReference>,
        context: AppendContext,
    ) -> Result<Deferred<()>> {
        let shared = &self.shared;
        let mut view = {
            let st = shared.state.lock();
            if st.destroyed {
                return Err(Error::Destroyed);
            }
            let Some(buffer) = st.buffers.get(&content_type) else {
                return Err(Error::Validation(format!("no {content_type} buffer")));
            };
            AppendView {
                format: ContainerFormat::from_mime(&buffer.signature.basic_type()),
                timescale: buffer.timescale,
                expect_encrypted: buffer.expect_encrypted,
                active_offset: buffer.timestamp_offset,
                sequence_mode: st.sequence_mode,
                manifest_kind: st.manifest_kind,
                ignore_drift: st.ignore_drift,
            }
        };

        if view.format == ContainerFormat::Mp4 && bl_media::mp4::is_init_segment(&data) {
            self.inspect_init_segment(content_type, &data, &mut view);
        }

        if let Some(reference) = reference {
            if view.timescale.is_none() {
                view.timescale = reference.init_segment.as_ref().and_then(|i| i.timescale);
            }
            if view.format.carries_id3() {
                self.forward_metadata(content_type, &data, reference, view.format);
            }
            if view.sequence_mode {
                self.sequence_offset(content_type, &data, reference, &view, context)?;
            } else if view.manifest_kind == ManifestKind::Hls
                && !view.ignore_drift
                && !view.format.carries_id3()
            {
                self.correct_offset(content_type, &data, reference, &view, context)?;
            }
        }

        let uri = reference.and_then(|r| r.first_uri());
        tracing::trace!(content_type = %content_type, uri = ?uri, bytes = data.len(), "Queueing append");
        shared.enqueue_append(content_type, data, uri)
    }

    /// Cache the timescale and check the encryption boxes against the
    /// track's declared DRM.
    fn inspect_init_segment(&self, content_type: ContentType, data: &[u8], view: &mut AppendView) {
        match bl_media::mp4::read_timescale(data) {
            Ok(Some(timescale)) => {
                view.timescale = Some(timescale);
                if let Some(buffer) = self.shared.state.lock().buffers.get_mut(&content_type) {
                    buffer.timescale = Some(timescale);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(content_type = %content_type, "Could not read init segment timescale: {e}"),
        }

        match bl_media::mp4::is_encrypted(data) {
            Ok(encrypted) if encrypted != view.expect_encrypted => {
                tracing::warn!(
                    content_type = %content_type,
                    expected = view.expect_encrypted,
                    encrypted,
                    "Init segment encryption does not match the track"
                );
                self.shared.events.broadcast(
                    EventCategory::Buffer,
                    EventPayload::UnexpectedEncryption {
                        content_type,
                        expected: view.expect_encrypted,
                    },
                );
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(content_type = %content_type, "Could not inspect sample entries: {e}"),
        }
    }

    fn forward_metadata(
        &self,
        content_type: ContentType,
        data: &[u8],
        reference: &SegmentReference,
        format: ContainerFormat,
    ) {
        if !self.shared.config.forward_metadata {
            return;
        }
        let frames = match bl_media::extract_metadata(format, data) {
            Ok(frames) if !frames.is_empty() => frames,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(content_type = %content_type, "Could not parse ID3 tag: {e}");
                return;
            }
        };
        let sample = MetadataSample {
            start_time: reference.start_time,
            end_time: reference.end_time,
            frames,
        };
        let handler = self.shared.state.lock().metadata_handler.clone();
        if let Some(handler) = handler {
            handler(&sample);
        }
        self.shared.events.broadcast(
            EventCategory::Buffer,
            EventPayload::Metadata {
                start_time: sample.start_time,
                end_time: sample.end_time,
                frame_ids: sample.frames.iter().map(|f| f.id.clone()).collect(),
            },
        );
    }

    /// Segments mode: replace the offset when the container timing drifts
    /// from the manifest timing.
    fn correct_offset(
        &self,
        content_type: ContentType,
        data: &[u8],
        reference: &SegmentReference,
        view: &AppendView,
        context: AppendContext,
    ) -> Result<()> {
        if !view.format.has_embedded_timestamp() {
            return Ok(());
        }
        let container_ts = timestamp::container_timestamp(content_type, view.format, data, view.timescale);
        let Some(offset) = timestamp::reconcile(
            view.active_offset,
            reference.start_time,
            container_ts,
            context.is_boundary(),
            self.shared.config.offset_tolerance_secs,
        ) else {
            return Ok(());
        };

        tracing::info!(
            content_type = %content_type,
            previous = view.active_offset,
            offset,
            "Correcting timestamp offset"
        );
        self.shared.events.broadcast(
            EventCategory::Buffer,
            EventPayload::OffsetCorrected {
                content_type,
                previous: view.active_offset,
                offset,
            },
        );
        self.shared.enqueue_abort(content_type)?;
        self.shared.enqueue_set_offset(content_type, offset)?;
        Ok(())
    }

    /// Sequence mode: re-anchor at boundaries, and let the best buffer
    /// establish the offset text cues are aligned with.
    fn sequence_offset(
        &self,
        content_type: ContentType,
        data: &[u8],
        reference: &SegmentReference,
        view: &AppendView,
        context: AppendContext,
    ) -> Result<()> {
        let mut active = view.active_offset;
        if context.is_boundary() {
            self.shared.enqueue_abort(content_type)?;
            self.shared.enqueue_set_offset(content_type, reference.start_time)?;
            active = reference.start_time;
        }

        let best = {
            let st = self.shared.state.lock();
            best_content_type(st.buffers.keys().copied())
        };
        if best != Some(content_type) {
            return Ok(());
        }

        let container_ts = if view.format.has_embedded_timestamp() {
            timestamp::container_timestamp(content_type, view.format, data, view.timescale)
        } else {
            None
        };
        let offset = container_ts.map_or(active, |ts| reference.start_time - ts);
        let established = self.shared.state.lock().sync.establish(offset);
        if established {
            tracing::debug!(content_type = %content_type, offset, "Text offset established");
            self.shared
                .events
                .broadcast(EventCategory::Buffer, EventPayload::TextOffsetResolved { offset });
        }
        Ok(())
    }

    /// Text bypasses the queues; in sequence mode it waits for the media
    /// offset first.
    fn append_text(&self, data: Bytes, reference: Option<&SegmentReference>) -> BoxFuture<'static, Result<()>> {
        let sink = self.shared.platform.text_sink.clone();
        let (start, end) = reference.map_or((0.0, 0.0), |r| (r.start_time, r.end_time));
        let uri = reference.and_then(|r| r.first_uri());
        let prepared = {
            let st = self.shared.state.lock();
            if st.destroyed {
                Err(Error::Destroyed)
            } else if st.text.is_none() {
                Err(Error::Validation("no text track".into()))
            } else {
                Ok(st.sequence_mode.then(|| st.sync.waiter()))
            }
        };
        let shared = Arc::clone(&self.shared);

        async move {
            let waiter = prepared?;
            let Some(sink) = sink else {
                return Err(Error::Validation("no text sink".into()));
            };
            if let Some(waiter) = waiter {
                let offset = waiter.wait().await?;
                sink.set_timestamp_offset(offset);
                {
                    let mut st = shared.state.lock();
                    if let Some(text) = st.text.as_mut() {
                        text.timestamp_offset = offset;
                    }
                }
            }
            sink.append(data, start, end)
                .await
                .map_err(|e| Error::failed(ContentType::Text, uri, e))
        }
        .boxed()
    }

    /// Remove `[start, end)`. An empty or inverted range completes at once.
    pub fn remove(
        &self,
        content_type: ContentType,
        start: f64,
        end: f64,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        if content_type.is_text() {
            let sink = self.shared.platform.text_sink.clone();
            let destroyed = self.shared.state.lock().destroyed;
            return async move {
                if destroyed {
                    return Err(Error::Destroyed);
                }
                match sink {
                    Some(sink) if end > start => sink
                        .remove(start, end)
                        .await
                        .map_err(|e| Error::failed(ContentType::Text, None, e)),
                    _ => Ok(()),
                }
            }
            .boxed();
        }
        await_queued(self.shared.enqueue_remove(content_type, start, end))
    }

    /// Remove everything buffered for the content type.
    pub fn clear(&self, content_type: ContentType) -> impl Future<Output = Result<()>> + Send + 'static {
        if content_type.is_text() {
            return self.remove(content_type, 0.0, f64::INFINITY).boxed();
        }

        let session = self.shared.session();
        let queued = self.shared.enqueue(
            content_type,
            OperationKind::Remove,
            None,
            Box::new(move |res| {
                let end = session
                    .map(|s| s.duration())
                    .filter(|d| d.is_finite() && *d > 0.0)
                    .or_else(|| ranges::buffer_end(&res.buffered()))
                    .unwrap_or(0.0);
                if end <= 0.0 {
                    return Ok(Completion::Immediate);
                }
                res.remove(0.0, end)?;
                Ok(Completion::Signaled)
            }),
        );

        if queued.is_ok() && content_type == ContentType::Video {
            let mut st = self.shared.state.lock();
            if st.sequence_mode {
                st.sync.reset();
            }
        }
        await_queued(queued)
    }
}
