//! # Stage: Flush Scheduler
//!
//! ## Responsibility
//! Runs one worker task per started series. The worker owns that series'
//! [`AggregationCache`] and [`RollingWindow`], ingests feed updates, and on
//! every interval tick turns the cache into a [`Bucket`], appends it, and
//! publishes the new window through the [`BroadcastHub`].
//!
//! ## Guarantees
//! - Mutual exclusion: ingest and flush run on the same task and never
//!   interleave
//! - First flush happens one full interval after start
//! - Flush is O(1) in the number of samples and never awaits
//! - Shutdown: once the shutdown signal is observed, no further ingest or
//!   flush runs
//!
//! ## NOT Responsible For
//! - Registering series or tearing down feed subscriptions (that is
//!   [`crate::registry`])

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::StreamExt;

use crate::cache::AggregationCache;
use crate::feed::{select_sample, PathStream, PathUpdate, SourceSelector};
use crate::hub::BroadcastHub;
use crate::window::{now_ms, Bucket, RollingWindow};

/// Fold `cache` into a bucket stamped `timestamp`, append it to `window`, and
/// reset the cache.
pub fn flush(cache: &mut AggregationCache, window: &mut RollingWindow, timestamp: u64) -> Bucket {
    let bucket = cache.take_bucket(timestamp);
    window.append(bucket);
    bucket
}

/// Single-owner state of one running series.
pub struct SeriesWorker {
    series_id: String,
    source: SourceSelector,
    period: Duration,
    cache: AggregationCache,
    window: RollingWindow,
    hub: BroadcastHub,
}

impl SeriesWorker {
    /// A worker with an empty cache and an all-`None` window.
    pub fn new(
        series_id: impl Into<String>,
        source: SourceSelector,
        period: Duration,
        capacity: usize,
        hub: BroadcastHub,
    ) -> Self {
        Self {
            series_id: series_id.into(),
            source,
            period,
            cache: AggregationCache::new(),
            window: RollingWindow::new(capacity),
            hub,
        }
    }

    pub fn cache(&self) -> &AggregationCache {
        &self.cache
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    /// Apply the ingestion policy to one feed emission.
    ///
    /// Returns `true` if a sample reached the cache.
    pub fn ingest_update(&mut self, update: Option<&PathUpdate>) -> bool {
        match select_sample(update, &self.source) {
            Some(value) => {
                self.cache.ingest(value);
                true
            }
            None => {
                tracing::trace!(
                    target: "vessel_trends::scheduler",
                    series_id = %self.series_id,
                    known = update.is_some(),
                    "feed update dropped"
                );
                false
            }
        }
    }

    /// Flush at `timestamp` and publish the resulting window.
    pub fn tick(&mut self, timestamp: u64) -> Bucket {
        let samples = self.cache.sample_count();
        let bucket = flush(&mut self.cache, &mut self.window, timestamp);
        self.hub.publish(&self.series_id, self.window.snapshot());
        tracing::debug!(
            target: "vessel_trends::scheduler",
            series_id = %self.series_id,
            samples,
            average = ?bucket.average,
            "flushed bucket"
        );
        bucket
    }

    /// Drive the series until `shutdown` fires (or its sender is dropped).
    ///
    /// When the feed stream ends the timer keeps running and flushes empty
    /// buckets; there is no reconnection here.
    pub async fn run(mut self, mut updates: PathStream, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut feed_open = true;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick(now_ms());
                }
                update = updates.next(), if feed_open => match update {
                    Some(update) => {
                        self.ingest_update(update.as_ref());
                    }
                    None => {
                        feed_open = false;
                        tracing::warn!(
                            target: "vessel_trends::scheduler",
                            series_id = %self.series_id,
                            "feed stream ended; flushing empty buckets from now on"
                        );
                    }
                },
            }
        }

        tracing::debug!(target: "vessel_trends::scheduler", series_id = %self.series_id, "worker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::SourceValue;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn update(source: &str, value: f64) -> PathUpdate {
        let mut sources = HashMap::new();
        sources.insert(source.to_string(), SourceValue { value });
        PathUpdate { default_source: source.to_string(), sources }
    }

    fn worker(capacity: usize) -> (SeriesWorker, BroadcastHub) {
        let hub = BroadcastHub::new();
        hub.register_series("s1", capacity);
        let w = SeriesWorker::new("s1", SourceSelector::Default, Duration::from_secs(5), capacity, hub.clone());
        (w, hub)
    }

    #[test]
    fn test_flush_appends_and_resets() {
        let mut cache = AggregationCache::new();
        let mut window = RollingWindow::new(3);
        for v in [2.0, 4.0, 6.0] {
            cache.ingest(v);
        }
        let b = flush(&mut cache, &mut window, 10);
        assert_eq!(b.average, Some(4.0));
        assert_eq!(b.min, Some(2.0));
        assert_eq!(b.max, Some(6.0));
        assert!(cache.is_empty());
        let snap = window.snapshot();
        assert!(snap[..2].iter().all(Option::is_none));
        assert_eq!(snap[2], Some(b));
    }

    #[test]
    fn test_consecutive_flushes_shift_window() {
        let (mut w, _hub) = worker(3);
        w.ingest_update(Some(&update("a", 1.0)));
        let b1 = w.tick(1);
        let b2 = w.tick(2);
        assert!(b2.is_empty());
        let snap = w.window().snapshot();
        assert_eq!(snap[0], None);
        assert_eq!(snap[1], Some(b1));
        assert_eq!(snap[2], Some(b2));
    }

    #[test]
    fn test_ingest_unknown_path_leaves_cache_untouched() {
        let (mut w, _hub) = worker(3);
        assert!(!w.ingest_update(None));
        assert!(w.cache().is_empty());
    }

    #[test]
    fn test_ingest_missing_named_source_leaves_cache_untouched() {
        let hub = BroadcastHub::new();
        let mut w = SeriesWorker::new("s1", SourceSelector::from("ais"), Duration::from_secs(1), 2, hub);
        assert!(!w.ingest_update(Some(&update("gps", 3.0))));
        assert!(w.cache().is_empty());
    }

    #[test]
    fn test_tick_publishes_to_hub() {
        let (mut w, hub) = worker(2);
        let ch = hub.subscribe("c1", "s1").unwrap();
        w.ingest_update(Some(&update("a", 7.0)));
        w.tick(5);
        assert_eq!(ch.latest()[1].and_then(|b| b.max), Some(7.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_interval() {
        let (w, hub) = worker(3);
        let ch = hub.subscribe("c1", "s1").unwrap();
        let mut rx = ch.receiver();
        let (tx, feed_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(w.run(Box::pin(UnboundedReceiverStream::new(feed_rx)), stop_rx));

        for v in [2.0, 4.0, 6.0] {
            tx.send(Some(update("a", v))).unwrap();
        }
        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        let b = snap[2].expect("first bucket");
        assert_eq!((b.average, b.min, b.max), (Some(4.0), Some(2.0), Some(6.0)));

        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert!(snap[2].unwrap().is_empty());
        assert_eq!(snap[1], Some(b));

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_feed_end() {
        let (w, hub) = worker(2);
        let ch = hub.subscribe("c1", "s1").unwrap();
        let mut rx = ch.receiver();
        let (tx, feed_rx) = mpsc::unbounded_channel::<Option<PathUpdate>>();
        drop(tx);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(w.run(Box::pin(UnboundedReceiverStream::new(feed_rx)), stop_rx));
        rx.changed().await.unwrap();
        assert!(rx.borrow()[1].unwrap().is_empty());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        let (w, _hub) = worker(2);
        let (_tx, feed_rx) = mpsc::unbounded_channel::<Option<PathUpdate>>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(w.run(Box::pin(UnboundedReceiverStream::new(feed_rx)), stop_rx));
        drop(stop_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}
