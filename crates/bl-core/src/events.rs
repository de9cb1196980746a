//! Orchestrator diagnostic events.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers (a debug overlay,
//! the CLI simulator) can catch up on what the orchestrator did.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::SessionId;
use crate::media::{ContentType, EndOfStreamReason};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventCategory
// ---------------------------------------------------------------------------

/// Scope of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Concerns a single buffer and its queue.
    Buffer,
    /// Concerns the whole session (barriers, resets, teardown).
    Session,
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Buffer operations ---------------------------------------------------
    OperationFailed {
        content_type: ContentType,
        uri: Option<String>,
        error: String,
    },
    QuotaExceeded {
        content_type: ContentType,
    },
    OffsetCorrected {
        content_type: ContentType,
        previous: f64,
        offset: f64,
    },
    TextOffsetResolved {
        offset: f64,
    },
    UnexpectedEncryption {
        content_type: ContentType,
        expected: bool,
    },
    Metadata {
        start_time: f64,
        end_time: f64,
        frame_ids: Vec<String>,
    },

    // -- Codec switching -----------------------------------------------------
    CodecSwitched {
        content_type: ContentType,
        from: String,
        to: String,
        strategy: String,
    },
    ResetStarted {
        position: f64,
    },
    ResetCompleted {
        position: f64,
        resumed: bool,
    },
    /// The session could not be rebuilt; the orchestrator accepts no more work.
    ResetFailed {
        position: f64,
        error: String,
    },

    // -- Session -------------------------------------------------------------
    DurationChanged {
        duration: f64,
    },
    EndOfStream {
        reason: Option<EndOfStreamReason>,
    },
    Destroyed,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped, categorised event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// Session that emitted the event.
    pub session: SessionId,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(session: SessionId, category: EventCategory, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            timestamp: Utc::now(),
            category,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    session: SessionId,
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus for one session.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(session: SessionId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            session,
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, category: EventCategory, payload: EventPayload) {
        let event = Event::new(self.session, category, payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(SessionId::new(), 256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(SessionId::new(), 16);
        let mut rx = bus.subscribe();

        bus.broadcast(
            EventCategory::Buffer,
            EventPayload::QuotaExceeded {
                content_type: ContentType::Video,
            },
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.category, EventCategory::Buffer);
        assert_eq!(event.session, bus.session());
        match &event.payload {
            EventPayload::QuotaExceeded { content_type } => {
                assert_eq!(*content_type, ContentType::Video)
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::default();
        for i in 0..150 {
            bus.broadcast(
                EventCategory::Session,
                EventPayload::DurationChanged {
                    duration: i as f64,
                },
            );
        }
        let recent = bus.recent_events(200);
        assert_eq!(recent.len(), MAX_RECENT_EVENTS);
        match &recent[0].payload {
            EventPayload::DurationChanged { duration } => assert_eq!(*duration, 149.0),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(SessionId::new(), 4);
        bus.broadcast(EventCategory::Session, EventPayload::Destroyed);
        assert_eq!(bus.recent_events(10).len(), 1);
    }

    #[test]
    fn payload_serializes_with_tag() {
        let payload = EventPayload::CodecSwitched {
            content_type: ContentType::Audio,
            from: "audio/mp4; codecs=\"mp4a.40.2\"".into(),
            to: "audio/mp4; codecs=\"ec-3\"".into(),
            strategy: "in_place".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"codec_switched\""));
        assert!(json.contains("\"content_type\":\"audio\""));
    }

    #[test]
    fn default_event_bus_is_empty() {
        assert!(EventBus::default().recent_events(10).is_empty());
    }
}
