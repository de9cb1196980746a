mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use bl_buffer::{AppendContext, MetadataSample, PlatformCall};
use bl_core::events::EventPayload;
use bl_core::{ContentType, ManifestKind, TrackDescriptor};
use bl_media::id3;
use bl_media::mp4::{write_init_segment, InitSegmentSpec, TrackKind};
use bytes::Bytes;
use common::*;
use parking_lot::Mutex;

fn offset_calls(h: &Harness, content_type: ContentType) -> Vec<f64> {
    h.requests(content_type)
        .into_iter()
        .filter_map(|c| match c {
            PlatformCall::SetTimestampOffset { offset, .. } => Some(offset),
            _ => None,
        })
        .collect()
}

async fn append(h: &Harness, content_type: ContentType, data: Bytes, start: f64, context: AppendContext) {
    let reference = reference(start, start + 2.0, "seg");
    h.orchestrator
        .append_segment(content_type, data, Some(&reference), context)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn hls_offset_correction_is_applied_once() {
    let h = Harness::new();
    h.init(av_tracks(), false, ManifestKind::Hls).await;
    h.orchestrator
        .append_segment(ContentType::Video, video_init(), None, AppendContext::default())
        .await
        .unwrap();

    // Container time runs 10s ahead of the playlist.
    append(&h, ContentType::Video, video_fragment(1, 10.0), 0.0, AppendContext::default()).await;
    append(&h, ContentType::Video, video_fragment(2, 12.0), 2.0, AppendContext::default()).await;
    append(&h, ContentType::Video, video_fragment(3, 14.0004), 4.0, AppendContext::default()).await;

    assert_eq!(offset_calls(&h, ContentType::Video), vec![-10.0]);
    assert_eq!(h.orchestrator.timestamp_offset(ContentType::Video), Some(-10.0));
    assert_eq!(h.orchestrator.buffer_start(ContentType::Video), Some(0.0));
    let corrected: Vec<_> = h
        .events()
        .into_iter()
        .filter(|e| matches!(e, EventPayload::OffsetCorrected { .. }))
        .collect();
    assert_eq!(corrected.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn drift_beyond_tolerance_is_corrected_again() {
    let h = Harness::new();
    h.init(av_tracks(), false, ManifestKind::Hls).await;
    h.orchestrator
        .append_segment(ContentType::Video, video_init(), None, AppendContext::default())
        .await
        .unwrap();

    append(&h, ContentType::Video, video_fragment(1, 10.0), 0.0, AppendContext::default()).await;
    append(&h, ContentType::Video, video_fragment(2, 12.5), 2.0, AppendContext::default()).await;

    assert_eq!(offset_calls(&h, ContentType::Video), vec![-10.0, -10.5]);
}

#[tokio::test(start_paused = true)]
async fn seek_forces_correction_even_without_drift() {
    let h = Harness::new();
    h.init(av_tracks(), false, ManifestKind::Hls).await;
    h.orchestrator
        .append_segment(ContentType::Video, video_init(), None, AppendContext::default())
        .await
        .unwrap();

    append(&h, ContentType::Video, video_fragment(1, 10.0), 0.0, AppendContext::default()).await;
    append(&h, ContentType::Video, video_fragment(9, 50.0), 40.0, AppendContext::seeked()).await;

    assert_eq!(offset_calls(&h, ContentType::Video), vec![-10.0, -10.0]);
    let aborts = h
        .requests(ContentType::Video)
        .iter()
        .filter(|c| matches!(c, PlatformCall::Abort { .. }))
        .count();
    assert_eq!(aborts, 2);
}

#[tokio::test(start_paused = true)]
async fn dash_and_ignored_drift_never_correct() {
    for (manifest, ignore_drift) in [(ManifestKind::Dash, false), (ManifestKind::Hls, true)] {
        let h = Harness::new();
        h.orchestrator
            .init(av_tracks(), false, manifest, ignore_drift)
            .await
            .unwrap();
        h.platform.clear_calls();
        h.orchestrator
            .append_segment(ContentType::Video, video_init(), None, AppendContext::default())
            .await
            .unwrap();
        append(&h, ContentType::Video, video_fragment(1, 10.0), 0.0, AppendContext::seeked()).await;

        assert!(offset_calls(&h, ContentType::Video).is_empty(), "{manifest} corrected");
    }
}

#[tokio::test(start_paused = true)]
async fn init_segment_timescale_is_cached() {
    let h = Harness::new();
    h.init(av_tracks(), false, ManifestKind::Hls).await;

    // Without an init segment the fragment time cannot be scaled.
    append(&h, ContentType::Video, video_fragment(1, 10.0), 0.0, AppendContext::default()).await;
    assert!(offset_calls(&h, ContentType::Video).is_empty());

    h.orchestrator
        .append_segment(ContentType::Video, video_init(), None, AppendContext::default())
        .await
        .unwrap();
    append(&h, ContentType::Video, video_fragment(2, 12.0), 2.0, AppendContext::default()).await;
    assert_eq!(offset_calls(&h, ContentType::Video), vec![-10.0]);
}

#[tokio::test(start_paused = true)]
async fn encrypted_init_on_clear_track_is_reported() {
    let h = Harness::new();
    h.init_av().await;
    let encrypted = write_init_segment(&InitSegmentSpec::new(TrackKind::Audio, AUDIO_TIMESCALE).encrypted());

    h.orchestrator
        .append_segment(ContentType::Audio, Bytes::from(encrypted), None, AppendContext::default())
        .await
        .unwrap();

    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::UnexpectedEncryption { content_type: ContentType::Audio, expected: false }
    )));
}

#[tokio::test(start_paused = true)]
async fn protected_track_with_encrypted_init_is_quiet() {
    let h = Harness::new();
    let tracks = BTreeMap::from([(ContentType::Video, avc().with_drm("com.widevine.alpha"))]);
    h.init(tracks, false, ManifestKind::Dash).await;
    let encrypted = write_init_segment(&InitSegmentSpec::new(TrackKind::Video, VIDEO_TIMESCALE).encrypted());

    h.orchestrator
        .append_segment(ContentType::Video, Bytes::from(encrypted), None, AppendContext::default())
        .await
        .unwrap();
    assert!(!h
        .events()
        .iter()
        .any(|e| matches!(e, EventPayload::UnexpectedEncryption { .. })));
}

#[tokio::test(start_paused = true)]
async fn id3_metadata_is_forwarded_without_correction() {
    let h = Harness::new();
    let tracks = BTreeMap::from([(ContentType::Audio, TrackDescriptor::new("audio/aac", "mp4a.40.2"))]);
    h.init(tracks, false, ManifestKind::Hls).await;

    let samples = Arc::new(Mutex::new(Vec::new()));
    h.orchestrator.set_metadata_handler({
        let samples = Arc::clone(&samples);
        move |sample: &MetadataSample| samples.lock().push(sample.clone())
    });

    let mut segment = id3::write_tag(&[("PRIV", &b"com.apple.streaming.transportStreamTimestamp\0\0\0\0\0\0\0\0\0"[..])]);
    segment.extend_from_slice(b"adts-frames");
    append(&h, ContentType::Audio, Bytes::from(segment), 20.0, AppendContext::default()).await;

    let samples = samples.lock();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].start_time, 20.0);
    assert_eq!(samples[0].end_time, 22.0);
    assert_eq!(samples[0].frames[0].id, "PRIV");
    assert!(offset_calls(&h, ContentType::Audio).is_empty());
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, EventPayload::Metadata { frame_ids, .. } if frame_ids == &vec!["PRIV".to_string()])));
}

#[tokio::test(start_paused = true)]
async fn sequence_mode_text_waits_for_video_offset() {
    let h = Harness::new();
    let tracks = BTreeMap::from([
        (ContentType::Video, avc()),
        (ContentType::Text, TrackDescriptor::new("text/vtt", "")),
    ]);
    h.init(tracks, true, ManifestKind::Hls).await;

    let text = h.orchestrator.append_segment(
        ContentType::Text,
        Bytes::from_static(b"WEBVTT\n\n00:00.000 --> 00:02.000\nhello"),
        Some(&reference(10.0, 12.0, "sub-5.vtt")),
        AppendContext::default(),
    );
    let text = tokio::spawn(text);
    advance(50).await;
    assert!(h.platform.text_sink().cues().is_empty());
    assert!(!h.orchestrator.text_offset_established());

    h.orchestrator
        .append_segment(ContentType::Video, video_init(), None, AppendContext::default())
        .await
        .unwrap();
    append(&h, ContentType::Video, video_fragment(1, 100.0), 10.0, AppendContext::seeked()).await;

    text.await.unwrap().unwrap();
    let cues = h.platform.text_sink().cues();
    assert_eq!(cues.len(), 1);
    assert_eq!(cues[0].offset, -90.0);
    assert_eq!(h.orchestrator.timestamp_offset(ContentType::Text), Some(-90.0));
    assert_eq!(offset_calls(&h, ContentType::Video), vec![10.0]);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, EventPayload::TextOffsetResolved { offset } if *offset == -90.0)));
}

#[tokio::test(start_paused = true)]
async fn resync_starts_a_new_discontinuity() {
    let h = Harness::new();
    let tracks = BTreeMap::from([
        (ContentType::Video, avc()),
        (ContentType::Text, TrackDescriptor::new("text/vtt", "")),
    ]);
    h.init(tracks, true, ManifestKind::Hls).await;
    append(&h, ContentType::Video, opaque("v1"), 0.0, AppendContext::seeked()).await;
    assert!(h.orchestrator.text_offset_established());
    assert_eq!(h.orchestrator.buffer_end(ContentType::Video), Some(2.0));
    h.platform.clear_calls();

    // Close to the buffered end: only the text sync is reset.
    h.orchestrator.resync(ContentType::Video, 2.1).await.unwrap();
    assert!(!h.orchestrator.text_offset_established());
    assert!(h.requests(ContentType::Video).is_empty());

    h.orchestrator.resync(ContentType::Video, 30.0).await.unwrap();
    assert_eq!(
        h.requests(ContentType::Video),
        vec![
            PlatformCall::Abort { content_type: ContentType::Video },
            PlatformCall::SetTimestampOffset { content_type: ContentType::Video, offset: 30.0 },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn resync_outside_sequence_mode_touches_nothing() {
    let h = Harness::new();
    h.init_av().await;
    h.orchestrator.resync(ContentType::Video, 30.0).await.unwrap();
    h.orchestrator.resync(ContentType::Text, 30.0).await.unwrap();
    assert!(h.platform.calls().is_empty());
}
