mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use bl_buffer::{AppendContext, OperationKind, PlatformCall};
use bl_core::events::EventPayload;
use bl_core::{ContentType, EndOfStreamReason, Error};
use common::*;

#[tokio::test(start_paused = true)]
async fn barrier_holds_every_queue_until_its_action_ran() {
    let h = Harness::new();
    h.init_av().await;
    let orch = &h.orchestrator;
    h.platform.push_latency(ContentType::Video, Duration::from_millis(100));

    let in_flight = orch.append_segment(ContentType::Video, opaque("v1"), None, AppendContext::default());
    let duration = orch.set_duration(60.0);
    let behind = orch.append_segment(ContentType::Video, opaque("v2"), None, AppendContext::default());

    assert_eq!(
        orch.queued_operations(ContentType::Video),
        vec![OperationKind::Append, OperationKind::Barrier, OperationKind::Append]
    );
    assert_eq!(orch.queued_operations(ContentType::Audio), vec![OperationKind::Barrier]);

    // Audio is idle but held by the barrier.
    let audio = orch.append_segment(ContentType::Audio, opaque("a1"), None, AppendContext::default());
    advance(50).await;
    assert!(h.requests(ContentType::Audio).is_empty());
    assert_eq!(h.count(|c| matches!(c, PlatformCall::Append { .. })), 1);
    assert_eq!(h.count(|c| matches!(c, PlatformCall::SetDuration { .. })), 0);

    futures::try_join!(in_flight, duration, behind, audio).unwrap();

    let set_duration = h.position(|c| matches!(c, PlatformCall::SetDuration { .. })).unwrap();
    let first_completion = h.position(|c| matches!(c, PlatformCall::Completed { .. })).unwrap();
    let audio_append = h
        .position(|c| matches!(c, PlatformCall::Append { content_type: ContentType::Audio, .. }))
        .unwrap();
    assert!(first_completion < set_duration);
    assert!(set_duration < audio_append);
    assert_eq!(orch.queue_len(ContentType::Video), 0);
    assert_eq!(orch.queue_len(ContentType::Audio), 0);
}

#[tokio::test(start_paused = true)]
async fn shrinking_duration_waits_for_both_buffers_and_both_resume() {
    let h = Harness::new();
    h.init_av().await;
    let orch = &h.orchestrator;
    for ct in [ContentType::Audio, ContentType::Video] {
        for tag in ["1", "2"] {
            orch.append_segment(ct, opaque(tag), None, AppendContext::default())
                .await
                .unwrap();
        }
    }
    h.platform.clear_calls();

    h.platform.push_latency(ContentType::Video, Duration::from_millis(100));
    h.platform.push_latency(ContentType::Audio, Duration::from_millis(30));
    let video = orch.append_segment(ContentType::Video, opaque("v3"), None, AppendContext::default());
    let audio = orch.append_segment(ContentType::Audio, opaque("a3"), None, AppendContext::default());
    let shrink = orch.set_duration(3.0);
    let video_after = orch.append_segment(ContentType::Video, opaque("v4"), None, AppendContext::default());
    let audio_after = orch.append_segment(ContentType::Audio, opaque("a4"), None, AppendContext::default());

    futures::try_join!(video, audio, shrink, video_after, audio_after).unwrap();

    let calls = h.platform.calls();
    let set_duration = calls
        .iter()
        .position(|c| matches!(c, PlatformCall::SetDuration { duration } if *duration == 3.0))
        .unwrap();
    let completions_before = calls[..set_duration]
        .iter()
        .filter(|c| matches!(c, PlatformCall::Completed { .. }))
        .count();
    assert_eq!(completions_before, 2);
    let appends_after = calls[set_duration..]
        .iter()
        .filter(|c| matches!(c, PlatformCall::Append { .. }))
        .count();
    assert_eq!(appends_after, 2);

    // Evicted down to 3s, then one more segment on each buffer.
    assert_eq!(orch.buffer_end(ContentType::Video), Some(5.0));
    assert_eq!(orch.buffer_end(ContentType::Audio), Some(5.0));
    assert_eq!(orch.queue_len(ContentType::Video), 0);
    assert_eq!(orch.queue_len(ContentType::Audio), 0);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, EventPayload::DurationChanged { duration } if *duration == 3.0)));
}

#[tokio::test(start_paused = true)]
async fn failed_duration_change_releases_queues() {
    let h = Harness::new();
    h.init_av().await;
    h.orchestrator
        .append_segment(ContentType::Video, opaque("v1"), None, AppendContext::default())
        .await
        .unwrap();
    h.platform.fail_set_duration();

    let result = h.orchestrator.set_duration(1.0).await;
    assert_matches!(result, Err(Error::Session { ref step, .. }) if step == "set_duration");

    h.orchestrator
        .append_segment(ContentType::Video, opaque("v2"), None, AppendContext::default())
        .await
        .unwrap();
    assert_eq!(h.orchestrator.queue_len(ContentType::Video), 0);
    assert_eq!(h.orchestrator.buffer_end(ContentType::Video), Some(4.0));
}

#[tokio::test(start_paused = true)]
async fn invalid_duration_is_rejected_without_barrier() {
    let h = Harness::new();
    h.init_av().await;

    assert_matches!(h.orchestrator.set_duration(f64::NAN).await, Err(Error::Validation(_)));
    assert_matches!(h.orchestrator.set_duration(-1.0).await, Err(Error::Validation(_)));
    assert!(h.platform.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn end_of_stream_runs_once() {
    let h = Harness::new();
    h.init_av().await;
    h.platform.push_latency(ContentType::Audio, Duration::from_millis(40));
    let pending = h
        .orchestrator
        .append_segment(ContentType::Audio, opaque("a1"), None, AppendContext::default());

    let first = h.orchestrator.end_of_stream(None);
    let second = h.orchestrator.end_of_stream(Some(EndOfStreamReason::Network));
    futures::try_join!(pending, first, second).unwrap();

    assert!(h.orchestrator.is_ended());
    assert_eq!(
        h.count(|c| matches!(c, PlatformCall::EndOfStream { .. })),
        1
    );
    let end = h.position(|c| matches!(c, PlatformCall::EndOfStream { reason: None })).unwrap();
    let completed = h.position(|c| matches!(c, PlatformCall::Completed { .. })).unwrap();
    assert!(completed < end);
}

#[tokio::test(start_paused = true)]
async fn end_of_stream_on_closed_session_is_a_noop() {
    let h = Harness::new();
    h.init_av().await;
    h.platform.session().unwrap().close();

    h.orchestrator.end_of_stream(None).await.unwrap();
    assert_eq!(h.count(|c| matches!(c, PlatformCall::EndOfStream { .. })), 0);
    assert!(!h.orchestrator.is_ended());
}
