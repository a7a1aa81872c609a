//! # Stage: Rolling Window
//!
//! ## Responsibility
//! Holds the most recent flushed [`Bucket`]s of one series in a fixed-length
//! buffer and produces immutable [`WindowSnapshot`]s for fan-out.
//!
//! ## Guarantees
//! - Fixed length: the window always has exactly `capacity` slots
//! - FIFO: every append evicts slot 0, including `None` placeholders during
//!   the initial fill
//! - O(1) append
//!
//! ## NOT Responsible For
//! - Computing buckets (that is [`crate::cache::AggregationCache`])
//! - Deciding when to flush (that is [`crate::scheduler`])

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// One flushed aggregate summarising every sample of a single interval.
///
/// `average`, `min` and `max` are all `None` when the interval had no samples,
/// and all `Some` otherwise, with `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Flush time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bucket {
    /// A bucket for an interval that saw no samples.
    pub fn empty(timestamp: u64) -> Self {
        Self { timestamp, average: None, min: None, max: None }
    }

    /// `true` when the interval had no samples.
    pub fn is_empty(&self) -> bool {
        self.average.is_none()
    }
}

/// An immutable copy of a window, oldest slot first.
///
/// Cloning is a reference-count bump, so one flush can be handed to any
/// number of consumers without copying the buckets.
pub type WindowSnapshot = Arc<[Option<Bucket>]>;

/// An all-`None` snapshot of the given length.
pub fn empty_snapshot(capacity: usize) -> WindowSnapshot {
    vec![None; capacity].into()
}

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// RollingWindow
// ---------------------------------------------------------------------------

/// A fixed-length FIFO of bucket slots.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    slots: VecDeque<Option<Bucket>>,
}

impl RollingWindow {
    /// Create a window of `capacity` empty slots.
    ///
    /// Callers validate `capacity > 0` before constructing a series; a zero
    /// capacity window stays empty and ignores appends.
    pub fn new(capacity: usize) -> Self {
        Self { slots: std::iter::repeat(None).take(capacity).collect() }
    }

    /// Evict slot 0 and append `bucket` at the end.
    pub fn append(&mut self, bucket: Bucket) {
        if self.slots.is_empty() {
            return;
        }
        self.slots.pop_front();
        self.slots.push_back(Some(bucket));
    }

    /// Number of slots. Constant for the window's lifetime.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots holding a flushed bucket.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The most recently appended bucket, if any.
    pub fn newest(&self) -> Option<&Bucket> {
        self.slots.back().and_then(Option::as_ref)
    }

    /// Iterate slots from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Option<Bucket>> + '_ {
        self.slots.iter()
    }

    /// Copy the current slots into a shareable snapshot.
    pub fn snapshot(&self) -> WindowSnapshot {
        self.slots.iter().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
