//! Shared test harness for orchestrator integration tests.
//!
//! [`Harness`] wires a [`BufferOrchestrator`] to the in-memory platform with
//! short, deterministic latencies. Tests run on a paused tokio clock.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use bl_buffer::{BufferOrchestrator, MemoryPlatform, PlatformCall};
use bl_core::config::{BufferConfig, SimulationConfig};
use bl_core::events::EventPayload;
use bl_core::{ContentType, ManifestKind, SegmentReference, TrackDescriptor, TypeSignature};
use bl_media::mp4::{write_init_segment, write_media_segment, InitSegmentSpec, TrackKind};
use bytes::Bytes;

pub const VIDEO_TIMESCALE: u32 = 90_000;
pub const AUDIO_TIMESCALE: u32 = 48_000;

/// Test harness wrapping an orchestrator and the platform behind it.
pub struct Harness {
    pub platform: MemoryPlatform,
    pub orchestrator: BufferOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    pub fn with_config(config: BufferConfig) -> Self {
        let platform = MemoryPlatform::new(simulation());
        let orchestrator = BufferOrchestrator::new(platform.platform(), config);
        Self {
            platform,
            orchestrator,
        }
    }

    /// Init with audio and video tracks in segments mode.
    pub async fn init_av(&self) {
        self.init(av_tracks(), false, ManifestKind::Dash).await;
    }

    pub async fn init(
        &self,
        tracks: BTreeMap<ContentType, TrackDescriptor>,
        sequence_mode: bool,
        manifest: ManifestKind,
    ) {
        self.orchestrator
            .init(tracks, sequence_mode, manifest, false)
            .await
            .expect("init failed");
        self.platform.clear_calls();
    }

    /// Platform calls for one content type, without completion signals.
    pub fn requests(&self, content_type: ContentType) -> Vec<PlatformCall> {
        self.platform
            .calls_for(content_type)
            .into_iter()
            .filter(|c| !matches!(c, PlatformCall::Completed { .. } | PlatformCall::Failed { .. }))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&PlatformCall) -> bool) -> usize {
        self.platform.calls().iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred` in the global log.
    pub fn position(&self, pred: impl Fn(&PlatformCall) -> bool) -> Option<usize> {
        self.platform.calls().iter().position(pred)
    }

    pub fn events(&self) -> Vec<EventPayload> {
        self.orchestrator
            .events()
            .recent_events(100)
            .into_iter()
            .rev()
            .map(|e| e.payload)
            .collect()
    }
}

pub fn simulation() -> SimulationConfig {
    SimulationConfig {
        append_latency_ms: 10,
        remove_latency_ms: 5,
        session_open_latency_ms: 0,
        segment_duration_ms: 2_000,
    }
}

pub fn avc() -> TrackDescriptor {
    TrackDescriptor::new("video/mp4", "avc1.64001f")
}

pub fn aac() -> TrackDescriptor {
    TrackDescriptor::new("audio/mp4", "mp4a.40.2")
}

pub fn hevc() -> TypeSignature {
    TypeSignature::new("video/mp4", "hvc1.1.6.L93.90")
}

pub fn av_tracks() -> BTreeMap<ContentType, TrackDescriptor> {
    BTreeMap::from([(ContentType::Audio, aac()), (ContentType::Video, avc())])
}

/// Opaque media bytes with no readable container timing.
pub fn opaque(tag: &'static str) -> Bytes {
    Bytes::from_static(tag.as_bytes())
}

pub fn video_init() -> Bytes {
    Bytes::from(write_init_segment(&InitSegmentSpec::new(TrackKind::Video, VIDEO_TIMESCALE)))
}

/// Fragment whose `tfdt` places it at `seconds`.
pub fn video_fragment(sequence: u32, seconds: f64) -> Bytes {
    let bmdt = (seconds * f64::from(VIDEO_TIMESCALE)).round() as u64;
    Bytes::from(write_media_segment(sequence, 1, bmdt, b"video-sample"))
}

pub fn reference(start: f64, end: f64, uri: &str) -> SegmentReference {
    SegmentReference::new(start, end).with_uri(uri)
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
