//! In-memory platform backend.
//!
//! Implements every resource trait with configurable latency, records each
//! call in an inspectable log, and can inject failures. Used by the CLI
//! simulator and the test suite.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bl_core::config::SimulationConfig;
use bl_core::{ContentType, EndOfStreamReason, TypeSignature};
use bl_media::ContainerFormat;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::operation::OperationKind;
use crate::orchestrator::Platform;
use crate::ranges::{self, TimeRange};
use crate::resource::{
    BufferResource, BufferSpec, CompletionHandle, PlaybackElement, ReadyState, ResourceError,
    SessionProvider, SessionResource, TextSink,
};

/// One call made against the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    CreateSession,
    AddBuffer { content_type: ContentType, signature: String },
    RemoveBuffer { content_type: ContentType },
    Append { content_type: ContentType, bytes: usize },
    Remove { content_type: ContentType, start: f64, end: f64 },
    Abort { content_type: ContentType },
    SetTimestampOffset { content_type: ContentType, offset: f64 },
    SetAppendWindow { content_type: ContentType, start: f64, end: f64 },
    ChangeType { content_type: ContentType, signature: String },
    /// The resource signalled completion of its in-flight work.
    Completed { content_type: ContentType },
    Failed { content_type: ContentType, error: String },
    SetDuration { duration: f64 },
    EndOfStream { reason: Option<EndOfStreamReason> },
}

impl PlatformCall {
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Self::AddBuffer { content_type, .. }
            | Self::RemoveBuffer { content_type }
            | Self::Append { content_type, .. }
            | Self::Remove { content_type, .. }
            | Self::Abort { content_type }
            | Self::SetTimestampOffset { content_type, .. }
            | Self::SetAppendWindow { content_type, .. }
            | Self::ChangeType { content_type, .. }
            | Self::Completed { content_type }
            | Self::Failed { content_type, .. } => Some(*content_type),
            Self::CreateSession | Self::SetDuration { .. } | Self::EndOfStream { .. } => None,
        }
    }
}

impl fmt::Display for PlatformCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateSession => write!(f, "create_session"),
            Self::AddBuffer { content_type, signature } => write!(f, "{content_type}: add_buffer {signature}"),
            Self::RemoveBuffer { content_type } => write!(f, "{content_type}: remove_buffer"),
            Self::Append { content_type, bytes } => write!(f, "{content_type}: append {bytes} bytes"),
            Self::Remove { content_type, start, end } => write!(f, "{content_type}: remove [{start:.3}, {end:.3})"),
            Self::Abort { content_type } => write!(f, "{content_type}: abort"),
            Self::SetTimestampOffset { content_type, offset } => {
                write!(f, "{content_type}: timestamp_offset = {offset:.3}")
            }
            Self::SetAppendWindow { content_type, start, end } => {
                write!(f, "{content_type}: append_window = [{start:.3}, {end:.3})")
            }
            Self::ChangeType { content_type, signature } => write!(f, "{content_type}: change_type {signature}"),
            Self::Completed { content_type } => write!(f, "{content_type}: complete"),
            Self::Failed { content_type, error } => write!(f, "{content_type}: error ({error})"),
            Self::SetDuration { duration } => write!(f, "duration = {duration:.3}"),
            Self::EndOfStream { reason: Some(reason) } => write!(f, "end_of_stream ({reason})"),
            Self::EndOfStream { reason: None } => write!(f, "end_of_stream"),
        }
    }
}

/// How an injected failure surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The call itself returns the error.
    Throw,
    /// The call succeeds; the error is signalled later, followed by a
    /// completion.
    Signal,
}

#[derive(Debug, Clone)]
struct Fault {
    content_type: ContentType,
    kind: OperationKind,
    mode: FailureMode,
    error: ResourceError,
}

struct PlatformInner {
    config: SimulationConfig,
    calls: Mutex<Vec<PlatformCall>>,
    faults: Mutex<Vec<Fault>>,
    latencies: Mutex<HashMap<ContentType, VecDeque<Duration>>>,
    options: Mutex<PlatformOptions>,
    sessions: Mutex<Vec<Arc<MemorySession>>>,
}

#[derive(Debug, Clone, Default)]
struct PlatformOptions {
    change_type_supported: bool,
    reject_change_type: bool,
    unsupported: Vec<String>,
    fail_duration: bool,
}

impl PlatformInner {
    fn record(&self, call: PlatformCall) {
        tracing::trace!(call = %call, "Platform call");
        self.calls.lock().push(call);
    }

    fn take_fault(&self, content_type: ContentType, kind: OperationKind) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let index = faults
            .iter()
            .position(|f| f.content_type == content_type && f.kind == kind)?;
        Some(faults.remove(index))
    }

    fn latency(&self, content_type: ContentType, default_ms: u64) -> Duration {
        self.latencies
            .lock()
            .get_mut(&content_type)
            .and_then(|q| q.pop_front())
            .unwrap_or(Duration::from_millis(default_ms))
    }
}

/// Session provider and owner of every in-memory resource.
#[derive(Clone)]
pub struct MemoryPlatform {
    inner: Arc<PlatformInner>,
    element: Arc<MemoryElement>,
    text: Arc<MemoryTextSink>,
}

impl MemoryPlatform {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            inner: Arc::new(PlatformInner {
                config,
                calls: Mutex::new(Vec::new()),
                faults: Mutex::new(Vec::new()),
                latencies: Mutex::new(HashMap::new()),
                options: Mutex::new(PlatformOptions {
                    change_type_supported: true,
                    ..PlatformOptions::default()
                }),
                sessions: Mutex::new(Vec::new()),
            }),
            element: Arc::new(MemoryElement::new()),
            text: Arc::new(MemoryTextSink::new()),
        }
    }

    /// Collaborators to hand to the orchestrator.
    pub fn platform(&self) -> Platform {
        Platform {
            provider: Arc::new(self.clone()),
            element: self.element.clone(),
            text_sink: Some(self.text.clone()),
        }
    }

    pub fn element(&self) -> Arc<MemoryElement> {
        Arc::clone(&self.element)
    }

    pub fn text_sink(&self) -> Arc<MemoryTextSink> {
        Arc::clone(&self.text)
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.inner.calls.lock().clone()
    }

    /// Calls concerning one content type.
    pub fn calls_for(&self, content_type: ContentType) -> Vec<PlatformCall> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|c| c.content_type() == Some(content_type))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// Make the next `kind` call on `content_type` fail.
    pub fn fail_next(&self, content_type: ContentType, kind: OperationKind, mode: FailureMode, error: ResourceError) {
        self.inner.faults.lock().push(Fault {
            content_type,
            kind,
            mode,
            error,
        });
    }

    /// Latency for the next append or remove on `content_type`, overriding
    /// the configured default once.
    pub fn push_latency(&self, content_type: ContentType, latency: Duration) {
        self.inner
            .latencies
            .lock()
            .entry(content_type)
            .or_default()
            .push_back(latency);
    }

    pub fn set_change_type_supported(&self, supported: bool) {
        self.inner.options.lock().change_type_supported = supported;
    }

    /// `change_type` fails with `NotSupported` from now on.
    pub fn reject_change_type(&self) {
        self.inner.options.lock().reject_change_type = true;
    }

    /// Reject signatures whose mime type or codecs contain `needle`.
    pub fn mark_unsupported(&self, needle: impl Into<String>) {
        self.inner.options.lock().unsupported.push(needle.into());
    }

    /// `set_duration` fails from now on.
    pub fn fail_set_duration(&self) {
        self.inner.options.lock().fail_duration = true;
    }

    /// Most recently created session.
    pub fn session(&self) -> Option<Arc<MemorySession>> {
        self.inner.sessions.lock().last().cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }
}

impl SessionProvider for MemoryPlatform {
    fn create_session(&self) -> Result<Arc<dyn SessionResource>, ResourceError> {
        self.inner.record(PlatformCall::CreateSession);
        let session = Arc::new(MemorySession {
            platform: Arc::clone(&self.inner),
            state: Mutex::new(SessionState {
                ready_state: ReadyState::Closed,
                duration: f64::NAN,
                buffers: BTreeMap::new(),
            }),
        });
        self.inner.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct SessionState {
    ready_state: ReadyState,
    duration: f64,
    buffers: BTreeMap<ContentType, Arc<MemoryBuffer>>,
}

pub struct MemorySession {
    platform: Arc<PlatformInner>,
    state: Mutex<SessionState>,
}

impl MemorySession {
    /// Buffer currently registered for `content_type`.
    pub fn buffer(&self, content_type: ContentType) -> Option<Arc<MemoryBuffer>> {
        self.state.lock().buffers.get(&content_type).cloned()
    }

    /// Close the session as if the element had been detached.
    pub fn close(&self) {
        self.state.lock().ready_state = ReadyState::Closed;
    }
}

#[async_trait]
impl SessionResource for MemorySession {
    async fn ready(&self) -> Result<(), ResourceError> {
        let latency = Duration::from_millis(self.platform.config.session_open_latency_ms);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().ready_state = ReadyState::Open;
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn is_type_supported(&self, signature: &TypeSignature) -> bool {
        let options = self.platform.options.lock();
        !options
            .unsupported
            .iter()
            .any(|needle| signature.mime_type.contains(needle.as_str()) || signature.codecs.contains(needle.as_str()))
    }

    fn supports_change_type(&self) -> bool {
        self.platform.options.lock().change_type_supported
    }

    fn add_buffer(
        &self,
        spec: &BufferSpec,
        completion: CompletionHandle,
    ) -> Result<Arc<dyn BufferResource>, ResourceError> {
        let mut state = self.state.lock();
        if state.ready_state != ReadyState::Open {
            return Err(ResourceError::InvalidState(format!(
                "add_buffer on {} session",
                state.ready_state
            )));
        }
        self.platform.record(PlatformCall::AddBuffer {
            content_type: spec.content_type,
            signature: spec.signature.to_string(),
        });
        let buffer = Arc::new(MemoryBuffer::new(spec, completion, Arc::clone(&self.platform)));
        state.buffers.insert(spec.content_type, Arc::clone(&buffer));
        Ok(buffer)
    }

    fn remove_buffer(&self, content_type: ContentType) -> Result<(), ResourceError> {
        self.platform.record(PlatformCall::RemoveBuffer { content_type });
        self.state
            .lock()
            .buffers
            .remove(&content_type)
            .map(|_| ())
            .ok_or_else(|| ResourceError::InvalidState(format!("no {content_type} buffer")))
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn set_duration(&self, duration: f64) -> Result<(), ResourceError> {
        if self.platform.options.lock().fail_duration {
            return Err(ResourceError::InvalidState("duration is locked".into()));
        }
        self.platform.record(PlatformCall::SetDuration { duration });
        let evicted: Vec<Arc<MemoryBuffer>> = {
            let mut state = self.state.lock();
            state.duration = duration;
            state.buffers.values().cloned().collect()
        };
        for buffer in evicted {
            buffer.truncate(duration);
        }
        Ok(())
    }

    fn end_of_stream(&self, reason: Option<EndOfStreamReason>) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        if state.ready_state != ReadyState::Open {
            return Err(ResourceError::InvalidState(format!("session is {}", state.ready_state)));
        }
        self.platform.record(PlatformCall::EndOfStream { reason });
        state.ready_state = ReadyState::Ended;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

struct BufferInner {
    updating: bool,
    ranges: Vec<TimeRange>,
    offset: f64,
    window: (f64, f64),
    signature: TypeSignature,
    timescale: Option<u32>,
}

/// Buffer resource keeping only buffered ranges.
pub struct MemoryBuffer {
    content_type: ContentType,
    sequence_mode: bool,
    completion: CompletionHandle,
    platform: Arc<PlatformInner>,
    inner: Arc<Mutex<BufferInner>>,
}

impl MemoryBuffer {
    fn new(spec: &BufferSpec, completion: CompletionHandle, platform: Arc<PlatformInner>) -> Self {
        Self {
            content_type: spec.content_type,
            sequence_mode: spec.sequence_mode,
            completion,
            platform,
            inner: Arc::new(Mutex::new(BufferInner {
                updating: false,
                ranges: Vec::new(),
                offset: 0.0,
                window: (0.0, f64::INFINITY),
                signature: spec.signature.clone(),
                timescale: None,
            })),
        }
    }

    pub fn is_updating(&self) -> bool {
        self.inner.lock().updating
    }

    pub fn signature(&self) -> TypeSignature {
        self.inner.lock().signature.clone()
    }

    fn check_idle(&self, inner: &BufferInner, call: &str) -> Result<(), ResourceError> {
        if inner.updating {
            return Err(ResourceError::InvalidState(format!(
                "{call} on {} buffer while updating",
                self.content_type
            )));
        }
        Ok(())
    }

    /// Range an appended segment occupies, or `None` for an init segment.
    fn place(&self, inner: &mut BufferInner, data: &[u8]) -> Option<TimeRange> {
        let format = ContainerFormat::from_mime(&inner.signature.basic_type());
        if format == ContainerFormat::Mp4 && bl_media::mp4::is_init_segment(data) {
            inner.timescale = bl_media::mp4::read_timescale(data).ok().flatten();
            return None;
        }
        let duration = self.platform.config.segment_duration_ms as f64 / 1000.0;
        let start = if self.sequence_mode {
            let start = inner.offset;
            inner.offset += duration;
            start
        } else {
            bl_media::extract_start_time(format, data, inner.timescale)
                .ok()
                .flatten()
                .map(|ts| ts + inner.offset)
                .or_else(|| ranges::buffer_end(&inner.ranges))
                .unwrap_or(inner.offset)
        };
        let start = start.max(inner.window.0);
        let end = (start + duration).min(inner.window.1);
        (end > start).then(|| TimeRange::new(start, end))
    }

    /// Finish the in-flight operation after `latency`, applying `effect`
    /// to the buffer state first.
    fn finish_later<F>(&self, latency: Duration, failure: Option<ResourceError>, effect: F)
    where
        F: FnOnce(&mut BufferInner) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let platform = Arc::clone(&self.platform);
        let completion = self.completion.clone();
        let content_type = self.content_type;
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            {
                let mut state = inner.lock();
                if failure.is_none() {
                    effect(&mut *state);
                }
                state.updating = false;
            }
            if let Some(error) = failure {
                platform.record(PlatformCall::Failed {
                    content_type,
                    error: error.to_string(),
                });
                completion.fail(error);
            }
            platform.record(PlatformCall::Completed { content_type });
            completion.complete();
        });
    }

    /// Evict everything after `duration`, as a duration change does.
    fn truncate(&self, duration: f64) {
        let evicts = {
            let mut inner = self.inner.lock();
            let evicts = ranges::buffer_end(&inner.ranges).is_some_and(|end| end > duration);
            if evicts {
                inner.updating = true;
            }
            evicts
        };
        if evicts {
            let latency = Duration::from_millis(self.platform.config.remove_latency_ms);
            self.finish_later(latency, None, move |inner| {
                ranges::remove_range(&mut inner.ranges, duration, f64::INFINITY);
            });
        }
    }

    fn injected(&self, kind: OperationKind) -> Result<Option<ResourceError>, ResourceError> {
        match self.platform.take_fault(self.content_type, kind) {
            Some(Fault {
                mode: FailureMode::Throw,
                error,
                ..
            }) => Err(error),
            Some(Fault {
                mode: FailureMode::Signal,
                error,
                ..
            }) => Ok(Some(error)),
            None => Ok(None),
        }
    }
}

impl BufferResource for MemoryBuffer {
    fn append(&self, data: Bytes) -> Result<(), ResourceError> {
        let (range, failure) = {
            let mut inner = self.inner.lock();
            self.check_idle(&inner, "append")?;
            self.platform.record(PlatformCall::Append {
                content_type: self.content_type,
                bytes: data.len(),
            });
            let failure = self.injected(OperationKind::Append)?;
            inner.updating = true;
            let range = if failure.is_none() {
                self.place(&mut inner, &data)
            } else {
                None
            };
            (range, failure)
        };
        let latency = self
            .platform
            .latency(self.content_type, self.platform.config.append_latency_ms);
        self.finish_later(latency, failure, move |inner| {
            if let Some(range) = range {
                ranges::add_range(&mut inner.ranges, range);
            }
        });
        Ok(())
    }

    fn remove(&self, start: f64, end: f64) -> Result<(), ResourceError> {
        let failure = {
            let mut inner = self.inner.lock();
            self.check_idle(&inner, "remove")?;
            self.platform.record(PlatformCall::Remove {
                content_type: self.content_type,
                start,
                end,
            });
            let failure = self.injected(OperationKind::Remove)?;
            inner.updating = true;
            failure
        };
        let latency = self
            .platform
            .latency(self.content_type, self.platform.config.remove_latency_ms);
        self.finish_later(latency, failure, move |inner| {
            ranges::remove_range(&mut inner.ranges, start, end);
        });
        Ok(())
    }

    fn abort(&self) -> Result<(), ResourceError> {
        self.platform.record(PlatformCall::Abort {
            content_type: self.content_type,
        });
        self.injected(OperationKind::Abort)?;
        Ok(())
    }

    fn set_timestamp_offset(&self, offset: f64) -> Result<(), ResourceError> {
        let mut inner = self.inner.lock();
        self.check_idle(&inner, "set_timestamp_offset")?;
        self.platform.record(PlatformCall::SetTimestampOffset {
            content_type: self.content_type,
            offset,
        });
        inner.offset = offset;
        Ok(())
    }

    fn timestamp_offset(&self) -> f64 {
        self.inner.lock().offset
    }

    fn set_append_window(&self, start: f64, end: f64) -> Result<(), ResourceError> {
        let mut inner = self.inner.lock();
        self.check_idle(&inner, "set_append_window")?;
        if start >= end {
            return Err(ResourceError::Other(format!("empty append window [{start}, {end})")));
        }
        self.platform.record(PlatformCall::SetAppendWindow {
            content_type: self.content_type,
            start,
            end,
        });
        inner.window = (start, end);
        Ok(())
    }

    fn change_type(&self, signature: &TypeSignature) -> Result<(), ResourceError> {
        let mut inner = self.inner.lock();
        self.check_idle(&inner, "change_type")?;
        self.platform.record(PlatformCall::ChangeType {
            content_type: self.content_type,
            signature: signature.to_string(),
        });
        if self.platform.options.lock().reject_change_type {
            return Err(ResourceError::NotSupported("change_type".into()));
        }
        self.injected(OperationKind::ChangeType)?;
        inner.signature = signature.clone();
        inner.timescale = None;
        Ok(())
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.inner.lock().ranges.clone()
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ElementState {
    current_time: f64,
    paused: bool,
    autoplay: bool,
    attached: usize,
    plays: usize,
}

/// Playback element tracking transport state only.
#[derive(Debug)]
pub struct MemoryElement {
    state: Mutex<ElementState>,
}

impl MemoryElement {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ElementState {
                paused: true,
                ..ElementState::default()
            }),
        }
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    /// Sessions attached so far.
    pub fn attach_count(&self) -> usize {
        self.state.lock().attached
    }

    pub fn play_count(&self) -> usize {
        self.state.lock().plays
    }
}

impl Default for MemoryElement {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackElement for MemoryElement {
    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn set_current_time(&self, time: f64) {
        self.state.lock().current_time = time;
    }

    fn paused(&self) -> bool {
        self.state.lock().paused
    }

    fn play(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        state.plays += 1;
    }

    fn autoplay(&self) -> bool {
        self.state.lock().autoplay
    }

    fn set_autoplay(&self, autoplay: bool) {
        self.state.lock().autoplay = autoplay;
    }

    /// Loading a new source rewinds and pauses, unless autoplay is set.
    fn attach(&self, _session: Arc<dyn SessionResource>) {
        let mut state = self.state.lock();
        state.attached += 1;
        state.current_time = 0.0;
        state.paused = !state.autoplay;
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// A text segment as the sink received it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCue {
    pub start: f64,
    pub end: f64,
    /// Offset in effect when the segment arrived.
    pub offset: f64,
    pub bytes: usize,
}

#[derive(Debug, Default)]
struct TextState {
    cues: Vec<TextCue>,
    ranges: Vec<TimeRange>,
    offset: f64,
    window: (f64, f64),
}

#[derive(Debug)]
pub struct MemoryTextSink {
    state: Mutex<TextState>,
}

impl MemoryTextSink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TextState {
                window: (0.0, f64::INFINITY),
                ..TextState::default()
            }),
        }
    }

    pub fn cues(&self) -> Vec<TextCue> {
        self.state.lock().cues.clone()
    }

    pub fn offset(&self) -> f64 {
        self.state.lock().offset
    }

    pub fn append_window(&self) -> (f64, f64) {
        self.state.lock().window
    }
}

impl Default for MemoryTextSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextSink for MemoryTextSink {
    async fn append(&self, data: Bytes, start: f64, end: f64) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        let offset = state.offset;
        state.cues.push(TextCue {
            start,
            end,
            offset,
            bytes: data.len(),
        });
        let (window_start, window_end) = state.window;
        let start = (start + offset).max(window_start);
        let end = (end + offset).min(window_end);
        if end > start {
            ranges::add_range(&mut state.ranges, TimeRange::new(start, end));
        }
        Ok(())
    }

    async fn remove(&self, start: f64, end: f64) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        ranges::remove_range(&mut state.ranges, start, end);
        state.cues.retain(|c| c.end + c.offset <= start || c.start + c.offset >= end);
        Ok(())
    }

    fn set_timestamp_offset(&self, offset: f64) {
        self.state.lock().offset = offset;
    }

    fn set_append_window(&self, start: f64, end: f64) {
        self.state.lock().window = (start, end);
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.state.lock().ranges.clone()
    }
}
