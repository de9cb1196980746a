mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use bl_buffer::{AppendContext, FailureMode, OperationKind, PlatformCall, ResourceError, StreamProperties};
use bl_core::events::EventPayload;
use bl_core::{ContentType, Error};
use common::*;
use parking_lot::Mutex;

#[tokio::test(start_paused = true)]
async fn operations_run_in_submission_order() {
    let h = Harness::new();
    h.init_av().await;
    let orch = &h.orchestrator;

    let first = orch.append_segment(ContentType::Video, opaque("seg-1"), None, AppendContext::default());
    let remove = orch.remove(ContentType::Video, 0.0, 1.0);
    let props = orch.set_stream_properties(
        ContentType::Video,
        StreamProperties::new(5.0).with_append_window(0.0, 30.0),
    );
    let second = orch.append_segment(ContentType::Video, opaque("seg-2"), None, AppendContext::default());

    futures::try_join!(first, remove, props, second).unwrap();

    assert_eq!(
        h.requests(ContentType::Video),
        vec![
            PlatformCall::Append { content_type: ContentType::Video, bytes: 5 },
            PlatformCall::Remove { content_type: ContentType::Video, start: 0.0, end: 1.0 },
            PlatformCall::Abort { content_type: ContentType::Video },
            PlatformCall::SetTimestampOffset { content_type: ContentType::Video, offset: 5.0 },
            PlatformCall::SetAppendWindow { content_type: ContentType::Video, start: 0.0, end: 30.0 },
            PlatformCall::Append { content_type: ContentType::Video, bytes: 5 },
        ]
    );
    assert_eq!(orch.queue_len(ContentType::Video), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_append_completes_before_fast_successor() {
    let h = Harness::new();
    h.init_av().await;
    h.platform.push_latency(ContentType::Video, Duration::from_millis(100));
    h.platform.push_latency(ContentType::Video, Duration::from_millis(10));

    let order = Arc::new(Mutex::new(Vec::new()));
    let a = h.orchestrator.append_segment(
        ContentType::Video,
        opaque("a"),
        Some(&reference(0.0, 2.0, "a.m4s")),
        AppendContext::default(),
    );
    let b = h.orchestrator.append_segment(
        ContentType::Video,
        opaque("b"),
        Some(&reference(2.0, 4.0, "b.m4s")),
        AppendContext::default(),
    );
    let started = tokio::time::Instant::now();

    let task_b = tokio::spawn({
        let order = Arc::clone(&order);
        async move {
            b.await.unwrap();
            order.lock().push(("b", started.elapsed()));
        }
    });
    let task_a = tokio::spawn({
        let order = Arc::clone(&order);
        async move {
            a.await.unwrap();
            order.lock().push(("a", started.elapsed()));
        }
    });
    task_a.await.unwrap();
    task_b.await.unwrap();

    let order = order.lock().clone();
    assert_eq!(order.iter().map(|(name, _)| *name).collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(order[0].1 >= Duration::from_millis(100));
    assert!(order[1].1 >= Duration::from_millis(110));
}

#[tokio::test(start_paused = true)]
async fn buffers_progress_independently() {
    let h = Harness::new();
    h.init_av().await;
    h.platform.push_latency(ContentType::Video, Duration::from_millis(500));

    let video = h
        .orchestrator
        .append_segment(ContentType::Video, opaque("v"), None, AppendContext::default());
    h.orchestrator
        .append_segment(ContentType::Audio, opaque("a"), None, AppendContext::default())
        .await
        .unwrap();

    assert_eq!(h.orchestrator.queue_len(ContentType::Video), 1);
    assert_eq!(h.orchestrator.buffer_end(ContentType::Audio), Some(2.0));
    video.await.unwrap();
    assert_eq!(h.orchestrator.buffer_end(ContentType::Video), Some(2.0));
}

#[tokio::test(start_paused = true)]
async fn thrown_quota_error_reaches_caller_and_queue_continues() {
    let h = Harness::new();
    h.init_av().await;
    h.platform.fail_next(
        ContentType::Video,
        OperationKind::Append,
        FailureMode::Throw,
        ResourceError::QuotaExceeded,
    );

    let failed = h.orchestrator.append_segment(
        ContentType::Video,
        opaque("big"),
        Some(&reference(0.0, 2.0, "https://cdn.test/v/1.m4s")),
        AppendContext::default(),
    );
    let next = h
        .orchestrator
        .append_segment(ContentType::Video, opaque("next"), None, AppendContext::default());

    let err = failed.await.unwrap_err();
    assert_matches!(
        &err,
        Error::QuotaExceeded { content_type: ContentType::Video, uri: Some(uri) } if uri == "https://cdn.test/v/1.m4s"
    );
    next.await.unwrap();
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, EventPayload::QuotaExceeded { content_type: ContentType::Video })));
}

#[tokio::test(start_paused = true)]
async fn signalled_error_rejects_head_and_next_starts_after_completion() {
    let h = Harness::new();
    h.init_av().await;
    h.platform.fail_next(
        ContentType::Audio,
        OperationKind::Append,
        FailureMode::Signal,
        ResourceError::Other("decode error".into()),
    );

    let failed = h
        .orchestrator
        .append_segment(ContentType::Audio, opaque("bad"), None, AppendContext::default());
    let next = h
        .orchestrator
        .append_segment(ContentType::Audio, opaque("good"), None, AppendContext::default());

    assert_matches!(
        failed.await,
        Err(Error::OperationFailed { content_type: ContentType::Audio, .. })
    );
    next.await.unwrap();

    let log = h.platform.calls_for(ContentType::Audio);
    let failed_at = log.iter().position(|c| matches!(c, PlatformCall::Failed { .. })).unwrap();
    let second_append = log
        .iter()
        .rposition(|c| matches!(c, PlatformCall::Append { .. }))
        .unwrap();
    assert!(matches!(log[failed_at + 1], PlatformCall::Completed { .. }));
    assert!(second_append > failed_at + 1);
    assert_eq!(h.orchestrator.buffer_end(ContentType::Audio), Some(2.0));
}

#[tokio::test(start_paused = true)]
async fn empty_remove_completes_without_platform_call() {
    let h = Harness::new();
    h.init_av().await;

    h.orchestrator.remove(ContentType::Video, 5.0, 5.0).await.unwrap();
    h.orchestrator.remove(ContentType::Video, 8.0, 3.0).await.unwrap();
    assert!(h.requests(ContentType::Video).is_empty());
}

#[tokio::test(start_paused = true)]
async fn clear_removes_everything_buffered() {
    let h = Harness::new();
    h.init_av().await;
    for tag in ["1", "2", "3"] {
        h.orchestrator
            .append_segment(ContentType::Video, opaque(tag), None, AppendContext::default())
            .await
            .unwrap();
    }
    assert_eq!(h.orchestrator.buffered_ahead_of(ContentType::Video, 1.0), 5.0);
    assert!(h.orchestrator.is_buffered(ContentType::Video, 5.9));

    h.orchestrator.clear(ContentType::Video).await.unwrap();
    assert!(h.orchestrator.buffered_ranges_for(ContentType::Video).is_empty());
    assert!(h
        .requests(ContentType::Video)
        .contains(&PlatformCall::Remove { content_type: ContentType::Video, start: 0.0, end: 6.0 }));
}

#[tokio::test(start_paused = true)]
async fn append_to_unknown_buffer_is_rejected() {
    let h = Harness::new();
    h.init(
        std::collections::BTreeMap::from([(ContentType::Video, avc())]),
        false,
        bl_core::ManifestKind::Dash,
    )
    .await;

    let result = h
        .orchestrator
        .append_segment(ContentType::Audio, opaque("a"), None, AppendContext::default())
        .await;
    assert_matches!(result, Err(Error::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn init_rejects_unsupported_track() {
    let h = Harness::new();
    h.platform.mark_unsupported("hvc1");
    let tracks = std::collections::BTreeMap::from([(
        ContentType::Video,
        bl_core::TrackDescriptor::new("video/mp4", "hvc1.1.6.L93.90"),
    )]);

    let result = h
        .orchestrator
        .init(tracks, false, bl_core::ManifestKind::Dash, false)
        .await;
    assert_matches!(result, Err(Error::Unsupported { .. }));
    assert!(!h.orchestrator.is_initialized());
}
