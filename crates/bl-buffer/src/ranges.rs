//! Buffered time range arithmetic.
//!
//! Ranges are kept sorted and non-overlapping, in seconds, the way a platform
//! buffer reports what it holds.

use std::fmt;

/// Ranges closer than this are merged.
const MERGE_EPSILON: f64 = 1e-6;

/// A half-open interval of buffered media, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3})", self.start, self.end)
    }
}

/// Start of the earliest range.
pub fn buffer_start(ranges: &[TimeRange]) -> Option<f64> {
    ranges.first().map(|r| r.start)
}

/// End of the latest range.
pub fn buffer_end(ranges: &[TimeRange]) -> Option<f64> {
    ranges.last().map(|r| r.end)
}

/// Whether `time` is buffered, treating a gap of up to `small_gap_limit`
/// before the first range as buffered.
pub fn is_buffered(ranges: &[TimeRange], time: f64, small_gap_limit: f64) -> bool {
    let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
        return false;
    };
    // A single near-empty range is reported by some platforms after eviction.
    if ranges.len() == 1 && first.duration() < 1e-4 {
        return false;
    }
    if time > last.end {
        return false;
    }
    time + small_gap_limit >= first.start
}

/// Seconds of media buffered at or after `time`, summed across ranges.
pub fn buffered_ahead_of(ranges: &[TimeRange], time: f64) -> f64 {
    ranges
        .iter()
        .filter(|r| r.end > time)
        .map(|r| r.end - r.start.max(time))
        .sum()
}

/// Insert `range`, merging with any overlapping or adjacent ranges.
pub fn add_range(ranges: &mut Vec<TimeRange>, range: TimeRange) {
    if range.end <= range.start {
        return;
    }
    let mut merged = range;
    ranges.retain(|r| {
        let touches = r.start <= merged.end + MERGE_EPSILON && r.end + MERGE_EPSILON >= merged.start;
        if touches {
            merged.start = merged.start.min(r.start);
            merged.end = merged.end.max(r.end);
        }
        !touches
    });
    let at = ranges.partition_point(|r| r.start < merged.start);
    ranges.insert(at, merged);
}

/// Remove `[start, end)` from the ranges, splitting where necessary.
pub fn remove_range(ranges: &mut Vec<TimeRange>, start: f64, end: f64) {
    if end <= start {
        return;
    }
    let mut kept = Vec::with_capacity(ranges.len() + 1);
    for r in ranges.drain(..) {
        if r.end <= start || r.start >= end {
            kept.push(r);
            continue;
        }
        if r.start < start {
            kept.push(TimeRange::new(r.start, start));
        }
        if r.end > end {
            kept.push(TimeRange::new(end, r.end));
        }
    }
    *ranges = kept;
}
