//! Orchestrator state and the queue scheduling core.
//!
//! All mutable state lives in one [`State`] behind a mutex. Start actions
//! and resource calls always run with the lock released, so a resource may
//! signal completion re-entrantly from inside a start action.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use bl_core::config::BufferConfig;
use bl_core::events::{EventBus, EventCategory, EventPayload};
use bl_core::{BarrierId, ContentType, Error, ManifestKind, Result, TypeSignature};
use parking_lot::Mutex;

use crate::codec_switch::{CodecSwitchMachine, SwitchCapabilities};
use crate::deferred::Deferred;
use crate::operation::{Completion, Operation, OperationId, OperationKind, StartFn};
use crate::queue::OperationQueue;
use crate::resource::{BufferResource, CompletionHandle, ResourceError, SessionResource, SettleSink};
use crate::timestamp::TimestampSync;

use super::{MetadataHandler, Platform};

/// One platform-backed buffer.
pub(crate) struct BufferState {
    pub resource: Arc<dyn BufferResource>,
    pub signature: TypeSignature,
    pub append_window: (f64, f64),
    /// Offset as last enqueued, ahead of the resource's own value.
    pub timestamp_offset: f64,
    pub expect_encrypted: bool,
    /// Media timescale from the most recent init segment.
    pub timescale: Option<u32>,
}

impl BufferState {
    pub fn new(resource: Arc<dyn BufferResource>, signature: TypeSignature, expect_encrypted: bool) -> Self {
        Self {
            resource,
            signature,
            append_window: (0.0, f64::INFINITY),
            timestamp_offset: 0.0,
            expect_encrypted,
            timescale: None,
        }
    }
}

pub(crate) struct TextState {
    pub signature: TypeSignature,
    pub timestamp_offset: f64,
    pub append_window: (f64, f64),
}

pub(crate) struct State {
    pub destroyed: bool,
    /// Bumped whenever buffer resources are recreated.
    pub generation: u64,
    pub session: Option<Arc<dyn SessionResource>>,
    pub buffers: BTreeMap<ContentType, BufferState>,
    pub queues: BTreeMap<ContentType, OperationQueue>,
    pub text: Option<TextState>,
    pub sequence_mode: bool,
    pub manifest_kind: ManifestKind,
    pub ignore_drift: bool,
    pub split_muxed: bool,
    pub sync: TimestampSync,
    pub switch: CodecSwitchMachine,
    pub metadata_handler: Option<MetadataHandler>,
    next_op_id: OperationId,
}

impl State {
    fn new() -> Self {
        Self {
            destroyed: false,
            generation: 0,
            session: None,
            buffers: BTreeMap::new(),
            queues: BTreeMap::new(),
            text: None,
            sequence_mode: false,
            manifest_kind: ManifestKind::default(),
            ignore_drift: false,
            split_muxed: false,
            sync: TimestampSync::new(),
            switch: CodecSwitchMachine::new(),
            metadata_handler: None,
            next_op_id: 1,
        }
    }

    pub fn next_id(&mut self) -> OperationId {
        let id = self.next_op_id;
        self.next_op_id += 1;
        id
    }
}

/// Entries a barrier pushed, one per buffer.
pub(crate) struct BarrierTicket {
    pub id: BarrierId,
    label: &'static str,
    entries: Vec<(ContentType, OperationId, Deferred<()>)>,
}

pub(crate) struct Shared {
    pub state: Mutex<State>,
    pub config: BufferConfig,
    pub platform: Platform,
    pub events: Arc<EventBus>,
}

impl Shared {
    pub fn new(platform: Platform, config: BufferConfig, events: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(State::new()),
            config,
            platform,
            events,
        }
    }

    pub fn session(&self) -> Option<Arc<dyn SessionResource>> {
        self.state.lock().session.clone()
    }

    pub fn resource(&self, content_type: ContentType) -> Option<Arc<dyn BufferResource>> {
        self.state
            .lock()
            .buffers
            .get(&content_type)
            .map(|b| Arc::clone(&b.resource))
    }

    pub fn completion_handle(self: &Arc<Self>, content_type: ContentType, generation: u64) -> CompletionHandle {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let sink: Weak<dyn SettleSink> = weak;
        CompletionHandle::new(sink, content_type, generation)
    }

    /// Switch inputs from configuration, the live session and learned state.
    pub fn capabilities(&self, st: &State) -> SwitchCapabilities {
        let session_change_type = st
            .session
            .as_ref()
            .map(|s| s.supports_change_type())
            .unwrap_or(false);
        st.switch.capabilities(SwitchCapabilities {
            strategy: self.config.codec_switching_strategy,
            change_type_supported: self.config.in_place_switch_supported && session_change_type,
            change_type_broken: false,
            split_muxed_content: st.split_muxed,
        })
    }

    // -----------------------------------------------------------------------
    // Enqueueing
    // -----------------------------------------------------------------------

    /// Push an operation; start it right away if the queue was idle.
    pub fn enqueue(
        &self,
        content_type: ContentType,
        kind: OperationKind,
        uri: Option<String>,
        start: StartFn,
    ) -> Result<Deferred<()>> {
        let (result, should_start) = {
            let mut st = self.state.lock();
            if st.destroyed {
                return Err(Error::Destroyed);
            }
            let id = st.next_id();
            let Some(queue) = st.queues.get_mut(&content_type) else {
                return Err(Error::Validation(format!("no {content_type} buffer")));
            };
            let op = Operation::new(id, kind, uri, start);
            let result = op.result.clone();
            (result, queue.push(op))
        };
        if should_start {
            self.run_starts(content_type);
        }
        Ok(result)
    }

    pub fn enqueue_append(
        &self,
        content_type: ContentType,
        data: bytes::Bytes,
        uri: Option<String>,
    ) -> Result<Deferred<()>> {
        self.enqueue(
            content_type,
            OperationKind::Append,
            uri,
            Box::new(move |res| {
                res.append(data)?;
                Ok(Completion::Signaled)
            }),
        )
    }

    /// A zero or negative range completes immediately without touching the
    /// resource.
    pub fn enqueue_remove(&self, content_type: ContentType, start: f64, end: f64) -> Result<Deferred<()>> {
        self.enqueue(
            content_type,
            OperationKind::Remove,
            None,
            Box::new(move |res| {
                if end <= start {
                    return Ok(Completion::Immediate);
                }
                res.remove(start, end)?;
                Ok(Completion::Signaled)
            }),
        )
    }

    pub fn enqueue_abort(&self, content_type: ContentType) -> Result<Deferred<()>> {
        self.enqueue(
            content_type,
            OperationKind::Abort,
            None,
            Box::new(|res| {
                res.abort()?;
                Ok(Completion::Immediate)
            }),
        )
    }

    pub fn enqueue_set_offset(&self, content_type: ContentType, offset: f64) -> Result<Deferred<()>> {
        if let Some(buffer) = self.state.lock().buffers.get_mut(&content_type) {
            buffer.timestamp_offset = offset;
        }
        self.enqueue(
            content_type,
            OperationKind::SetTimestampOffset,
            None,
            Box::new(move |res| {
                res.set_timestamp_offset(offset)?;
                Ok(Completion::Immediate)
            }),
        )
    }

    pub fn enqueue_set_window(&self, content_type: ContentType, start: f64, end: f64) -> Result<Deferred<()>> {
        if let Some(buffer) = self.state.lock().buffers.get_mut(&content_type) {
            buffer.append_window = (start, end);
        }
        self.enqueue(
            content_type,
            OperationKind::SetAppendWindow,
            None,
            Box::new(move |res| {
                res.set_append_window(start, end)?;
                Ok(Completion::Immediate)
            }),
        )
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Start the head operation, and keep going while operations complete
    /// synchronously.
    pub fn run_starts(&self, content_type: ContentType) {
        loop {
            let (id, kind, uri, start, resource) = {
                let mut guard = self.state.lock();
                let st = &mut *guard;
                let resource = st.buffers.get(&content_type).map(|b| Arc::clone(&b.resource));
                let Some(head) = st.queues.get_mut(&content_type).and_then(|q| q.head_mut()) else {
                    return;
                };
                let Some(start) = head.start.take() else {
                    return;
                };
                (head.id, head.kind, head.uri.clone(), start, resource)
            };

            let Some(resource) = resource else {
                self.finish_head(
                    content_type,
                    id,
                    Err(Error::Internal(format!("no {content_type} buffer resource"))),
                );
                continue;
            };

            tracing::trace!(content_type = %content_type, op = id, kind = %kind, "Starting operation");
            match start(resource.as_ref()) {
                Ok(Completion::Signaled) | Ok(Completion::Held) => return,
                Ok(Completion::Immediate) => self.finish_head(content_type, id, Ok(())),
                Err(e) => {
                    let err = thrown_error(content_type, uri, e);
                    self.report_failure(content_type, &err);
                    self.finish_head(content_type, id, Err(err));
                }
            }
        }
    }

    /// Pop and settle the head if it is still operation `id`.
    fn finish_head(&self, content_type: ContentType, id: OperationId, outcome: Result<()>) {
        let mut st = self.state.lock();
        let Some(queue) = st.queues.get_mut(&content_type) else {
            return;
        };
        if queue.head().map(|op| op.id) != Some(id) {
            return;
        }
        if let Some(op) = queue.pop() {
            match outcome {
                Ok(()) => op.result.resolve(()),
                Err(e) => op.result.reject(e),
            };
        }
    }

    fn report_failure(&self, content_type: ContentType, err: &Error) {
        tracing::warn!(content_type = %content_type, "Buffer operation failed: {err}");
        let payload = match err {
            Error::QuotaExceeded { .. } => EventPayload::QuotaExceeded { content_type },
            Error::OperationThrew { uri, .. } | Error::OperationFailed { uri, .. } => {
                EventPayload::OperationFailed {
                    content_type,
                    uri: uri.clone(),
                    error: err.to_string(),
                }
            }
            other => EventPayload::OperationFailed {
                content_type,
                uri: None,
                error: other.to_string(),
            },
        };
        self.events.broadcast(EventCategory::Buffer, payload);
    }

    // -----------------------------------------------------------------------
    // Placeholders
    // -----------------------------------------------------------------------

    /// Put an already-started entry ahead of the head, to absorb a completion
    /// signal the platform raises on its own.
    pub fn unshift_placeholder(&self, content_type: ContentType) -> Option<OperationId> {
        let mut st = self.state.lock();
        let id = st.next_id();
        let queue = st.queues.get_mut(&content_type)?;
        queue.unshift(Operation::placeholder(id));
        Some(id)
    }

    /// Withdraw placeholders whose signal will never arrive.
    pub fn drop_placeholders(&self, placeholders: &[(ContentType, OperationId)]) {
        let mut st = self.state.lock();
        for (content_type, id) in placeholders {
            if let Some(op) = st.queues.get_mut(content_type).and_then(|q| q.remove(*id)) {
                op.result.resolve(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Barriers
    // -----------------------------------------------------------------------

    /// Push a synchronizing entry on every queue.
    fn push_barrier(&self, label: &'static str) -> Result<BarrierTicket> {
        let id = BarrierId::new();
        let (entries, to_start) = {
            let mut guard = self.state.lock();
            if guard.destroyed {
                return Err(Error::Destroyed);
            }
            let st = &mut *guard;
            let types: Vec<ContentType> = st.queues.keys().copied().collect();
            let mut entries = Vec::with_capacity(types.len());
            let mut to_start = Vec::new();
            for content_type in types {
                let op_id = st.next_id();
                let (op, ready) = Operation::barrier(op_id);
                if let Some(queue) = st.queues.get_mut(&content_type) {
                    if queue.push(op) {
                        to_start.push(content_type);
                    }
                    entries.push((content_type, op_id, ready));
                }
            }
            (entries, to_start)
        };
        for content_type in to_start {
            self.run_starts(content_type);
        }
        tracing::debug!(barrier = %id, label, buffers = entries.len(), "Barrier queued");
        Ok(BarrierTicket { id, label, entries })
    }

    /// Queue a barrier and drive it on the runtime. The returned cell
    /// settles with the action's outcome once every buffer is released.
    pub fn spawn_barrier<F, Fut>(self: &Arc<Self>, label: &'static str, action: F) -> Result<Deferred<()>>
    where
        F: FnOnce(Arc<Shared>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let ticket = self.push_barrier(label)?;
        let done = Deferred::new();
        let settle = done.clone();
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            match shared.run_barrier(ticket, action).await {
                Ok(()) => settle.resolve(()),
                Err(e) => settle.reject(e),
            };
        });
        Ok(done)
    }

    async fn run_barrier<F, Fut>(self: Arc<Self>, ticket: BarrierTicket, action: F) -> Result<()>
    where
        F: FnOnce(Arc<Shared>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let ready = futures::future::try_join_all(ticket.entries.iter().map(|(_, _, r)| r.wait())).await;
        let outcome = match ready {
            Ok(_) => {
                tracing::debug!(barrier = %ticket.id, label = ticket.label, "Barrier reached; running action");
                action(Arc::clone(&self)).await
            }
            Err(e) => Err(e),
        };
        self.release_barrier(&ticket);
        if let Err(e) = &outcome {
            tracing::warn!(barrier = %ticket.id, label = ticket.label, "Barrier action failed: {e}");
        }
        outcome
    }

    /// Remove the barrier's entries and let every queue resume.
    fn release_barrier(&self, ticket: &BarrierTicket) {
        let released: Vec<ContentType> = {
            let mut st = self.state.lock();
            ticket
                .entries
                .iter()
                .filter_map(|(content_type, op_id, _)| {
                    let op = st.queues.get_mut(content_type)?.remove(*op_id)?;
                    op.result.resolve(());
                    Some(*content_type)
                })
                .collect()
        };
        for content_type in released {
            self.run_starts(content_type);
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Reject queued work, wait for in-flight work, release every resource.
    pub async fn destroy(&self) -> Result<()> {
        let (aborted, in_flight) = {
            let mut st = self.state.lock();
            if st.destroyed {
                return Ok(());
            }
            st.destroyed = true;
            st.sync.cancel();
            st.switch.complete();
            let mut aborted = Vec::new();
            let mut in_flight = Vec::new();
            for (content_type, queue) in st.queues.iter_mut() {
                aborted.extend(queue.drain_pending().into_iter().map(|op| (*content_type, op)));
                if let Some(head) = queue.head() {
                    in_flight.push(head.result.clone());
                }
            }
            (aborted, in_flight)
        };

        tracing::info!(aborted = aborted.len(), in_flight = in_flight.len(), "Destroying buffer orchestrator");
        for (content_type, op) in aborted {
            op.abort(Error::Aborted { content_type });
        }
        for result in in_flight {
            // Outcome belongs to the original caller.
            let _ = result.wait().await;
        }

        let (session, buffers) = {
            let mut st = self.state.lock();
            st.queues.clear();
            st.text = None;
            (st.session.take(), std::mem::take(&mut st.buffers))
        };
        if let Some(session) = session {
            for content_type in buffers.keys() {
                if let Err(e) = session.remove_buffer(*content_type) {
                    tracing::warn!(content_type = %content_type, "Failed to remove buffer: {e}");
                }
            }
        }
        self.events.broadcast(EventCategory::Session, EventPayload::Destroyed);
        Ok(())
    }

    /// Enter the terminal state after the session was lost mid-reset.
    ///
    /// Called from inside the reset barrier, so each queue head is the
    /// barrier entry; everything behind it is rejected. The buffer
    /// resources belong to a session that is no longer attached and are
    /// dropped rather than released.
    pub fn fail(&self, content_types: &[ContentType]) {
        let aborted = {
            let mut st = self.state.lock();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
            st.sync.cancel();
            st.switch.complete();
            st.session = None;
            st.buffers.clear();
            st.text = None;
            let mut aborted = Vec::new();
            for content_type in content_types {
                if let Some(queue) = st.queues.get_mut(content_type) {
                    aborted.extend(queue.drain_pending().into_iter().map(|op| (*content_type, op)));
                }
            }
            aborted
        };
        tracing::error!(aborted = aborted.len(), "Media session lost; rejecting further work");
        for (content_type, op) in aborted {
            op.abort(Error::Aborted { content_type });
        }
    }
}

impl SettleSink for Shared {
    fn settle(&self, content_type: ContentType, generation: u64, outcome: std::result::Result<(), ResourceError>) {
        let advance = {
            let mut st = self.state.lock();
            if st.generation != generation {
                tracing::debug!(content_type = %content_type, generation, "Ignoring signal from a replaced buffer");
                return;
            }
            let Some(queue) = st.queues.get_mut(&content_type) else {
                return;
            };
            let Some((kind, started, uri)) = queue.head().map(|h| (h.kind, h.is_started(), h.uri.clone())) else {
                tracing::debug!(content_type = %content_type, "Completion signal with nothing in flight");
                return;
            };
            if kind == OperationKind::Barrier || !started {
                tracing::warn!(content_type = %content_type, kind = %kind, "Ignoring completion signal for an operation not in flight");
                return;
            }
            match outcome {
                Ok(()) => {
                    if let Some(op) = queue.pop() {
                        op.result.resolve(());
                    }
                    true
                }
                Err(error) => {
                    // The pop happens on the completion signal that follows.
                    let err = signaled_error(content_type, uri, error);
                    if let Some(head) = queue.head() {
                        head.result.reject(err.clone());
                    }
                    drop(st);
                    self.report_failure(content_type, &err);
                    false
                }
            }
        };
        if advance {
            self.run_starts(content_type);
        }
    }
}

/// Error for a start action that failed synchronously.
fn thrown_error(content_type: ContentType, uri: Option<String>, error: ResourceError) -> Error {
    match error {
        ResourceError::QuotaExceeded => Error::QuotaExceeded { content_type, uri },
        other => Error::threw(content_type, uri, other),
    }
}

/// Error for a failure the resource signalled asynchronously.
fn signaled_error(content_type: ContentType, uri: Option<String>, error: ResourceError) -> Error {
    match error {
        ResourceError::QuotaExceeded => Error::QuotaExceeded { content_type, uri },
        other => Error::failed(content_type, uri, other),
    }
}
