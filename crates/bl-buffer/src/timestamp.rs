//! Timestamp reconciliation between manifest timing and container timing.

use bl_core::{ContentType, Error, Result};
use bl_media::ContainerFormat;

use crate::deferred::{Deferred, DeferredState};

/// Decide whether a container-derived offset should replace the active one.
///
/// `calculated = reference_start - container_timestamp`. It is applied when
/// it diverges from `active_offset` by more than `tolerance`, or
/// unconditionally at a seek or adaptation boundary. Without a container
/// timestamp no correction is possible.
pub fn reconcile(
    active_offset: f64,
    reference_start: f64,
    container_timestamp: Option<f64>,
    boundary: bool,
    tolerance: f64,
) -> Option<f64> {
    let container_timestamp = container_timestamp?;
    let calculated = reference_start - container_timestamp;
    if boundary || (calculated - active_offset).abs() > tolerance {
        Some(calculated)
    } else {
        None
    }
}

/// Read the decode start time embedded in a media segment.
///
/// Parse failures are logged and treated as "no timestamp".
pub fn container_timestamp(
    content_type: ContentType,
    format: ContainerFormat,
    data: &[u8],
    timescale: Option<u32>,
) -> Option<f64> {
    match bl_media::extract_start_time(format, data, timescale) {
        Ok(ts) => ts,
        Err(e) => {
            tracing::warn!(content_type = %content_type, format = %format, "Could not read container timestamp: {e}");
            None
        }
    }
}

/// Buffer whose timing drives text alignment in sequence mode: video when
/// present, otherwise audio.
pub fn best_content_type<I>(types: I) -> Option<ContentType>
where
    I: IntoIterator<Item = ContentType>,
{
    let mut best = None;
    for ct in types {
        match ct {
            ContentType::Video => return Some(ContentType::Video),
            ContentType::Audio => best = Some(ContentType::Audio),
            ContentType::Text => {}
        }
    }
    best
}

/// Per-session "offset established" signal consumed by text appends in
/// sequence mode.
#[derive(Debug)]
pub struct TimestampSync {
    established: Deferred<f64>,
    last_offset: Option<f64>,
}

impl TimestampSync {
    pub fn new() -> Self {
        Self {
            established: Deferred::new(),
            last_offset: None,
        }
    }

    /// Handle text appends wait on.
    pub fn waiter(&self) -> Deferred<f64> {
        self.established.clone()
    }

    /// Record the best buffer's offset. Only the first call after creation or
    /// [`reset`](Self::reset) settles the signal; returns whether it did.
    pub fn establish(&mut self, offset: f64) -> bool {
        self.last_offset = Some(offset);
        self.established.resolve(offset)
    }

    pub fn last_offset(&self) -> Option<f64> {
        self.last_offset
    }

    pub fn is_established(&self) -> bool {
        matches!(self.established.state(), DeferredState::Resolved(_))
    }

    /// Start a new discontinuity. A still-pending signal is kept so existing
    /// waiters receive the next offset.
    pub fn reset(&mut self) {
        if !self.established.is_pending() {
            self.established = Deferred::new();
        }
    }

    /// Fail every waiter; used on teardown.
    pub fn cancel(&mut self) {
        self.established.reject(Error::Destroyed);
    }
}

impl Default for TimestampSync {
    fn default() -> Self {
        Self::new()
    }
}
