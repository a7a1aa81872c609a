//! Series registry: the admin API.
//!
//! ## Design
//! - `series`: `Mutex<HashMap<SeriesId, SeriesEntry>>`, so lookups are by id,
//!   never by scanning
//! - Each started series gets one [`SeriesWorker`] task, a feed subscription
//!   and a shutdown `oneshot`
//! - The [`BroadcastHub`] topic exists from `add_series` onward, so consumers
//!   can subscribe before the series starts and always see a full-length
//!   window
//!
//! ## Series lifecycle
//! 1. `add_series` validates the config, assigns a UUID, registers the topic
//! 2. `start_series` subscribes to the feed and spawns the worker
//! 3. `delete_series` removes the entry, signals the worker, unsubscribes the
//!    feed, waits for the worker to finish, then marks consumer channels stale

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, SeriesSpec};
use crate::error::{Result, TrendError};
use crate::feed::{SourceFeed, SourceSelector, UnsubscribeHandle};
use crate::hub::{BroadcastHub, ConsumerChannel};
use crate::scheduler::SeriesWorker;
use crate::window::WindowSnapshot;

/// Longest accepted flush interval (one year). Keeps every tick deadline
/// representable as an `Instant`.
pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Immutable definition of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesConfig {
    pub path: String,
    pub source: SourceSelector,
    pub flush_interval: Duration,
    pub capacity: usize,
}

impl SeriesConfig {
    /// Validate raw parameters. `interval_secs` must be finite, positive and
    /// no longer than [`MAX_FLUSH_INTERVAL`]; `capacity` must be non-zero.
    pub fn new(
        path: impl Into<String>,
        source: impl Into<SourceSelector>,
        interval_secs: f64,
        capacity: usize,
    ) -> Result<Self> {
        if !(interval_secs.is_finite() && interval_secs > 0.0) {
            return Err(TrendError::invalid(
                "flush_interval",
                format!("must be a positive number of seconds, got {interval_secs}"),
            ));
        }
        let flush_interval = Duration::try_from_secs_f64(interval_secs)
            .map_err(|e| TrendError::invalid("flush_interval", e.to_string()))?;
        if flush_interval.is_zero() {
            return Err(TrendError::invalid("flush_interval", "rounds down to zero"));
        }
        if flush_interval > MAX_FLUSH_INTERVAL {
            return Err(TrendError::invalid(
                "flush_interval",
                format!(
                    "must be at most {} seconds, got {interval_secs}",
                    MAX_FLUSH_INTERVAL.as_secs()
                ),
            ));
        }
        if capacity == 0 {
            return Err(TrendError::invalid("capacity", "must be > 0"));
        }
        Ok(Self {
            path: path.into(),
            source: source.into(),
            flush_interval,
            capacity,
        })
    }
}

impl TryFrom<&SeriesSpec> for SeriesConfig {
    type Error = TrendError;

    fn try_from(spec: &SeriesSpec) -> Result<Self> {
        SeriesConfig::new(spec.path.clone(), spec.source.clone(), spec.interval_secs, spec.capacity)
    }
}

/// Read-only view of a registered series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesInfo {
    pub id: String,
    pub config: SeriesConfig,
    pub running: bool,
}

/// Handles owned by a started series.
struct SeriesRuntime {
    shutdown: oneshot::Sender<()>,
    feed_handle: UnsubscribeHandle,
    task: JoinHandle<()>,
}

struct SeriesEntry {
    config: SeriesConfig,
    runtime: Option<SeriesRuntime>,
}

/// Owns every series and wires them to the feed and the hub.
pub struct SeriesRegistry {
    feed: Arc<dyn SourceFeed>,
    hub: BroadcastHub,
    series: Mutex<HashMap<String, SeriesEntry>>,
}

impl SeriesRegistry {
    pub fn new(feed: Arc<dyn SourceFeed>) -> Self {
        Self::with_hub(feed, BroadcastHub::new())
    }

    /// Build a registry that publishes through an existing hub.
    pub fn with_hub(feed: Arc<dyn SourceFeed>, hub: BroadcastHub) -> Self {
        Self { feed, hub, series: Mutex::new(HashMap::new()) }
    }

    fn series(&self) -> MutexGuard<'_, HashMap<String, SeriesEntry>> {
        self.series.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    // -----------------------------------------------------------------------
    // Admin API
    // -----------------------------------------------------------------------

    /// Register a new, not yet running, series and return its id.
    pub fn add_series(
        &self,
        path: &str,
        source: impl Into<SourceSelector>,
        interval_secs: f64,
        capacity: usize,
    ) -> Result<String> {
        let config = SeriesConfig::new(path, source, interval_secs, capacity)?;
        Ok(self.insert(config))
    }

    fn insert(&self, config: SeriesConfig) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.hub.register_series(&id, config.capacity);
        tracing::info!(
            target: "vessel_trends::registry",
            series_id = %id,
            path = %config.path,
            source = %config.source,
            interval_ms = config.flush_interval.as_millis() as u64,
            capacity = config.capacity,
            "series added"
        );
        self.series()
            .insert(id.clone(), SeriesEntry { config, runtime: None });
        id
    }

    /// Open the feed subscription and spawn the flush worker.
    ///
    /// Fails with [`TrendError::NoRuntime`] outside a tokio runtime. The
    /// registry lock is not held while the feed is called, so a feed may call
    /// back into the registry.
    pub fn start_series(&self, series_id: &str) -> Result<()> {
        let cfg = {
            let series = self.series();
            let entry = series
                .get(series_id)
                .ok_or_else(|| TrendError::NotFound(series_id.to_string()))?;
            if entry.runtime.is_some() {
                return Err(TrendError::AlreadyStarted(series_id.to_string()));
            }
            entry.config.clone()
        };
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TrendError::NoRuntime)?;

        let worker = SeriesWorker::new(
            series_id,
            cfg.source.clone(),
            cfg.flush_interval,
            cfg.capacity,
            self.hub.clone(),
        );
        let subscription = self.feed.subscribe_path(series_id, &cfg.path);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(worker.run(subscription.updates, shutdown_rx));
        let started = SeriesRuntime {
            shutdown,
            feed_handle: subscription.handle,
            task,
        };

        let mut series = self.series();
        let outcome = match series.get_mut(series_id) {
            None => Err(TrendError::NotFound(series_id.to_string())),
            Some(entry) if entry.runtime.is_some() => {
                Err(TrendError::AlreadyStarted(series_id.to_string()))
            }
            Some(entry) => {
                entry.runtime = Some(started);
                tracing::info!(target: "vessel_trends::registry", series_id, path = %cfg.path, "series started");
                return Ok(());
            }
        };
        drop(series);

        // Lost a race with a concurrent delete or start: undo our worker.
        let _ = started.shutdown.send(());
        started.feed_handle.unsubscribe();
        outcome
    }

    /// Add a series and start it immediately.
    pub fn add_and_start(
        &self,
        path: &str,
        source: impl Into<SourceSelector>,
        interval_secs: f64,
        capacity: usize,
    ) -> Result<String> {
        let id = self.add_series(path, source, interval_secs, capacity)?;
        self.start_series(&id)?;
        Ok(id)
    }

    /// Stop and forget a series.
    ///
    /// When this returns, the worker has exited: no ingest or flush will run
    /// for `series_id` again, and every consumer channel registered against
    /// it is stale.
    pub async fn delete_series(&self, series_id: &str) -> Result<()> {
        let entry = self
            .series()
            .remove(series_id)
            .ok_or_else(|| TrendError::NotFound(series_id.to_string()))?;

        if let Some(runtime) = entry.runtime {
            // The worker may already be gone; a closed receiver is fine.
            let _ = runtime.shutdown.send(());
            runtime.feed_handle.unsubscribe();
            if let Err(e) = runtime.task.await {
                tracing::error!(
                    target: "vessel_trends::registry",
                    series_id,
                    error = %e,
                    "series worker did not exit cleanly"
                );
            }
        }

        self.hub.remove_series(series_id);
        tracing::info!(target: "vessel_trends::registry", series_id, "series deleted");
        Ok(())
    }

    /// Delete every series.
    pub async fn shutdown(&self) {
        for id in self.series_ids() {
            // NotFound here only means a concurrent delete won the race.
            let _ = self.delete_series(&id).await;
        }
    }

    /// Add and start every series listed in `config`, in order.
    ///
    /// All specs are validated before any series is added.
    pub fn load_from_config(&self, config: &AppConfig) -> Result<Vec<String>> {
        let configs = config
            .series
            .iter()
            .map(SeriesConfig::try_from)
            .collect::<Result<Vec<_>>>()?;
        let mut ids = Vec::with_capacity(configs.len());
        for cfg in configs {
            let id = self.insert(cfg);
            self.start_series(&id)?;
            ids.push(id);
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Consumer API
    // -----------------------------------------------------------------------

    /// Register `consumer_id` for `series_id` (deduplicated by the hub).
    pub fn subscribe(&self, consumer_id: &str, series_id: &str) -> Result<Arc<ConsumerChannel>> {
        self.hub.subscribe(consumer_id, series_id)
    }

    /// Latest published window of `series_id`.
    pub fn snapshot(&self, series_id: &str) -> Result<WindowSnapshot> {
        self.hub
            .latest(series_id)
            .ok_or_else(|| TrendError::NotFound(series_id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn get(&self, series_id: &str) -> Option<SeriesInfo> {
        self.series().get(series_id).map(|e| SeriesInfo {
            id: series_id.to_string(),
            config: e.config.clone(),
            running: e.runtime.is_some(),
        })
    }

    pub fn series_ids(&self) -> Vec<String> {
        self.series().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.series().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
