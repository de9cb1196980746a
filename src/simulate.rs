//! Scripted playback sessions against the in-memory platform.
//!
//! A [`Scenario`] appends synthetic fMP4 audio and video segments, optionally
//! switches the video codec part way through, then sets the duration and
//! ends the stream. The resulting platform call log and event trail show
//! exactly what the orchestrator asked the platform to do.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use bl_buffer::{AppendContext, BufferOrchestrator, MemoryPlatform, StreamProperties};
use bl_core::config::Config;
use bl_core::events::EventPayload;
use bl_core::{ContentType, ManifestKind, SegmentReference, TrackDescriptor, TypeSignature};
use bl_media::mp4::{write_init_segment, write_media_segment, InitSegmentSpec, TrackKind};
use bytes::Bytes;
use serde::Serialize;

const VIDEO_TIMESCALE: u32 = 90_000;
const AUDIO_TIMESCALE: u32 = 48_000;

/// What to play.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub segments: u32,
    pub manifest: ManifestKind,
    pub sequence_mode: bool,
    /// Segment index before which the video codec changes.
    pub switch_at: Option<u32>,
    pub switch_codecs: String,
    /// Container time of the first segment, in seconds. A non-zero value
    /// exercises offset correction for HLS.
    pub container_start: f64,
    pub end_of_stream: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            segments: 5,
            manifest: ManifestKind::Dash,
            sequence_mode: false,
            switch_at: None,
            switch_codecs: "hvc1.1.6.L93.90".into(),
            container_start: 0.0,
            end_of_stream: true,
        }
    }
}

/// Outcome of a simulated session.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub calls: Vec<String>,
    pub events: Vec<EventPayload>,
    pub buffered: BTreeMap<String, Vec<(f64, f64)>>,
    pub timestamp_offsets: BTreeMap<String, f64>,
    pub resets: u32,
    pub ended: bool,
}

/// Run `scenario` to completion and tear the session down.
pub async fn run(scenario: &Scenario, config: &Config) -> Result<SimulationReport> {
    let platform = MemoryPlatform::new(config.simulation.clone());
    let orchestrator = BufferOrchestrator::new(platform.platform(), config.buffer.clone());
    let segment_secs = config.simulation.segment_duration_ms as f64 / 1000.0;

    let tracks = BTreeMap::from([
        (ContentType::Audio, TrackDescriptor::new("audio/mp4", "mp4a.40.2")),
        (ContentType::Video, TrackDescriptor::new("video/mp4", "avc1.64001f")),
    ]);
    orchestrator
        .init(tracks.clone(), scenario.sequence_mode, scenario.manifest, false)
        .await
        .context("Failed to initialize session")?;

    tokio::try_join!(
        append_init(&orchestrator, ContentType::Video),
        append_init(&orchestrator, ContentType::Audio),
    )?;

    for index in 0..scenario.segments {
        if scenario.switch_at == Some(index) {
            let signature = TypeSignature::new("video/mp4", scenario.switch_codecs.as_str());
            let mut properties = StreamProperties::default()
                .with_signature(signature)
                .ignoring_timestamp_offset();
            for (content_type, track) in &tracks {
                properties = properties.with_track(*content_type, track.clone());
            }
            tracing::info!(index, codecs = %scenario.switch_codecs, "Switching video codec");
            orchestrator
                .set_stream_properties(ContentType::Video, properties)
                .await
                .context("Codec switch failed")?;
            tokio::try_join!(
                append_init(&orchestrator, ContentType::Video),
                append_init(&orchestrator, ContentType::Audio),
            )?;
        }

        let start = f64::from(index) * segment_secs;
        let context = if index == 0 {
            AppendContext::seeked()
        } else {
            AppendContext::default()
        };
        let slot = Slot {
            index,
            start,
            duration: segment_secs,
            context,
        };
        tokio::try_join!(
            append_fragment(&orchestrator, scenario, ContentType::Video, slot),
            append_fragment(&orchestrator, scenario, ContentType::Audio, slot),
        )
        .with_context(|| format!("Append of segment {index} failed"))?;
    }

    let duration = f64::from(scenario.segments) * segment_secs;
    orchestrator.set_duration(duration).await.context("Failed to set duration")?;
    if scenario.end_of_stream {
        orchestrator.end_of_stream(None).await.context("Failed to end stream")?;
    }

    let mut buffered = BTreeMap::new();
    let mut timestamp_offsets = BTreeMap::new();
    for content_type in orchestrator.content_types() {
        let ranges = orchestrator
            .buffered_ranges_for(content_type)
            .into_iter()
            .map(|r| (r.start, r.end))
            .collect();
        buffered.insert(content_type.to_string(), ranges);
        if let Some(offset) = orchestrator.timestamp_offset(content_type) {
            timestamp_offsets.insert(content_type.to_string(), offset);
        }
    }
    let resets = orchestrator.reset_count();
    let ended = orchestrator.is_ended();

    orchestrator.destroy().await.context("Teardown failed")?;

    let events = orchestrator
        .events()
        .recent_events(usize::MAX)
        .into_iter()
        .rev()
        .map(|e| e.payload)
        .collect();

    Ok(SimulationReport {
        calls: platform.calls().iter().map(ToString::to_string).collect(),
        events,
        buffered,
        timestamp_offsets,
        resets,
        ended,
    })
}

async fn append_init(orchestrator: &BufferOrchestrator, content_type: ContentType) -> Result<()> {
    let spec = match content_type {
        ContentType::Audio => InitSegmentSpec::new(TrackKind::Audio, AUDIO_TIMESCALE),
        _ => InitSegmentSpec::new(TrackKind::Video, VIDEO_TIMESCALE),
    };
    let data = Bytes::from(write_init_segment(&spec));
    orchestrator
        .append_segment(content_type, data, None, AppendContext::default())
        .await
        .with_context(|| format!("Failed to append {content_type} init segment"))
}

/// Position of one segment in the timeline.
#[derive(Debug, Clone, Copy)]
struct Slot {
    index: u32,
    start: f64,
    duration: f64,
    context: AppendContext,
}

async fn append_fragment(
    orchestrator: &BufferOrchestrator,
    scenario: &Scenario,
    content_type: ContentType,
    slot: Slot,
) -> Result<()> {
    let Slot {
        index,
        start,
        duration,
        context,
    } = slot;
    let timescale = match content_type {
        ContentType::Audio => AUDIO_TIMESCALE,
        _ => VIDEO_TIMESCALE,
    };
    let decode_time = ((scenario.container_start + start) * f64::from(timescale)).round() as u64;
    let data = Bytes::from(write_media_segment(index + 1, 1, decode_time, b"sample"));
    let reference = SegmentReference::new(start, start + duration)
        .with_uri(format!("{content_type}/{index}.m4s"));
    orchestrator
        .append_segment(content_type, data, Some(&reference), context)
        .await?;
    Ok(())
}
