//! # Stage: Broadcast Hub
//!
//! ## Responsibility
//! Shares each series' latest window with every consumer that asked for it.
//! Registrations are keyed by `(consumer_id, series_id)`; a repeat subscribe
//! returns the existing [`ConsumerChannel`].
//!
//! ## Guarantees
//! - Seeded: a new channel holds the series' current window before it is
//!   returned
//! - Whole-window fan-out: every publish replaces the snapshot by value
//! - Non-blocking: each channel is a `watch` channel, so a slow consumer only
//!   ever misses intermediate snapshots and never stalls a flush
//! - Stale after removal: channels of a removed series receive nothing more
//!
//! ## NOT Responsible For
//! - Producing snapshots (that is the series worker in [`crate::scheduler`])
//! - Series lifecycle (that is [`crate::registry::SeriesRegistry`])

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::{Result, TrendError};
use crate::window::{empty_snapshot, WindowSnapshot};

// ---------------------------------------------------------------------------
// ConsumerChannel
// ---------------------------------------------------------------------------

/// The live channel behind one `(consumer_id, series_id)` registration.
#[derive(Debug)]
pub struct ConsumerChannel {
    consumer_id: String,
    series_id: String,
    tx: watch::Sender<WindowSnapshot>,
    stale: AtomicBool,
}

impl ConsumerChannel {
    fn new(consumer_id: &str, series_id: &str, seed: WindowSnapshot) -> Self {
        let (tx, _rx) = watch::channel(seed);
        Self {
            consumer_id: consumer_id.to_string(),
            series_id: series_id.to_string(),
            tx,
            stale: AtomicBool::new(false),
        }
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    /// The most recent snapshot pushed to this channel.
    pub fn latest(&self) -> WindowSnapshot {
        self.tx.borrow().clone()
    }

    /// A receiver whose current value is the latest snapshot.
    pub fn receiver(&self) -> watch::Receiver<WindowSnapshot> {
        self.tx.subscribe()
    }

    /// A stream yielding the latest snapshot immediately, then every
    /// snapshot published after it. Intermediate snapshots are skipped when
    /// the reader falls behind.
    pub fn stream(&self) -> WatchStream<WindowSnapshot> {
        WatchStream::new(self.tx.subscribe())
    }

    /// `true` once the series was deleted or this registration was removed.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn push(&self, snapshot: WindowSnapshot) {
        // send_replace succeeds with zero receivers and never waits.
        self.tx.send_replace(snapshot);
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// BroadcastHub
// ---------------------------------------------------------------------------

/// Per-series fan-out state.
struct Topic {
    latest: WindowSnapshot,
    consumers: HashMap<String, Arc<ConsumerChannel>>,
}

/// Deduplicating registry of consumer channels.
///
/// Clone freely; all clones share the same registrations.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `series_id` subscribable with an all-`None` window of `capacity`.
    ///
    /// Re-registering an existing series resets its latest snapshot and
    /// pushes the empty window to its consumers.
    pub fn register_series(&self, series_id: &str, capacity: usize) {
        let seed = empty_snapshot(capacity);
        let mut topics = self.topics();
        match topics.get_mut(series_id) {
            Some(topic) => {
                topic.latest = seed.clone();
                for ch in topic.consumers.values() {
                    ch.push(seed.clone());
                }
            }
            None => {
                topics.insert(
                    series_id.to_string(),
                    Topic { latest: seed, consumers: HashMap::new() },
                );
            }
        }
    }

    /// Drop `series_id` and mark every channel registered against it stale.
    pub fn remove_series(&self, series_id: &str) {
        let removed = self.topics().remove(series_id);
        if let Some(topic) = removed {
            for ch in topic.consumers.values() {
                ch.mark_stale();
            }
            tracing::debug!(
                target: "vessel_trends::hub",
                series_id,
                consumers = topic.consumers.len(),
                "series removed from hub"
            );
        }
    }

    /// Return the channel for `(consumer_id, series_id)`, creating and seeding
    /// it on first use.
    pub fn subscribe(&self, consumer_id: &str, series_id: &str) -> Result<Arc<ConsumerChannel>> {
        let mut topics = self.topics();
        let topic = topics
            .get_mut(series_id)
            .ok_or_else(|| TrendError::NotFound(series_id.to_string()))?;

        if let Some(existing) = topic.consumers.get(consumer_id) {
            tracing::debug!(target: "vessel_trends::hub", consumer_id, series_id, "dedup hit");
            return Ok(Arc::clone(existing));
        }

        let channel = Arc::new(ConsumerChannel::new(consumer_id, series_id, topic.latest.clone()));
        topic
            .consumers
            .insert(consumer_id.to_string(), Arc::clone(&channel));
        tracing::debug!(target: "vessel_trends::hub", consumer_id, series_id, "consumer registered");
        Ok(channel)
    }

    /// Remove one registration. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, consumer_id: &str, series_id: &str) -> bool {
        let removed = self
            .topics()
            .get_mut(series_id)
            .and_then(|topic| topic.consumers.remove(consumer_id));
        match removed {
            Some(ch) => {
                ch.mark_stale();
                true
            }
            None => false,
        }
    }

    /// Replace the latest window of `series_id` and push it to its consumers.
    ///
    /// Publishing to an unknown (already removed) series is a no-op.
    pub fn publish(&self, series_id: &str, snapshot: WindowSnapshot) {
        let mut topics = self.topics();
        let Some(topic) = topics.get_mut(series_id) else {
            return;
        };
        for ch in topic.consumers.values() {
            ch.push(snapshot.clone());
        }
        topic.latest = snapshot;
    }

    /// Latest window of `series_id`, if the series is registered.
    pub fn latest(&self, series_id: &str) -> Option<WindowSnapshot> {
        self.topics().get(series_id).map(|t| t.latest.clone())
    }

    /// Number of registrations against `series_id`.
    pub fn consumer_count(&self, series_id: &str) -> usize {
        self.topics().get(series_id).map_or(0, |t| t.consumers.len())
    }

    pub fn contains_series(&self, series_id: &str) -> bool {
        self.topics().contains_key(series_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
