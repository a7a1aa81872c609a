//! Upstream feed boundary: the [`SourceFeed`] trait, the update shape it
//! delivers, the sub-source selection policy, and [`MemoryFeed`], an
//! in-process implementation.
//!
//! ## Feed contract
//! - `subscribe_path` returns a stream of `Option<PathUpdate>`; `None` means
//!   the path is not yet known upstream
//! - every subscription carries an [`UnsubscribeHandle`]; unsubscribing twice
//!   is a no-op
//! - the feed never retries or reconnects; a finished stream means no more
//!   samples

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

// ---------------------------------------------------------------------------
// Update types
// ---------------------------------------------------------------------------

/// One sub-source's latest reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceValue {
    pub value: f64,
}

/// The full state of a path as pushed by the feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathUpdate {
    /// Sub-source the feed currently prefers for this path.
    pub default_source: String,
    /// Latest value per sub-source id.
    #[serde(default)]
    pub sources: HashMap<String, SourceValue>,
}

impl PathUpdate {
    /// Pick the sample value the selector asks for, if the update carries it.
    pub fn sample_for(&self, selector: &SourceSelector) -> Option<f64> {
        let id = match selector {
            SourceSelector::Default => self.default_source.as_str(),
            SourceSelector::Named(id) => id.as_str(),
        };
        self.sources.get(id).map(|s| s.value)
    }
}

/// Which sub-source of a path a series samples.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceSelector {
    /// Follow whatever the feed declares as the path's default sub-source.
    #[default]
    Default,
    /// Always sample this sub-source id.
    Named(String),
}

impl From<&str> for SourceSelector {
    fn from(s: &str) -> Self {
        if s == "default" {
            SourceSelector::Default
        } else {
            SourceSelector::Named(s.to_string())
        }
    }
}

impl From<String> for SourceSelector {
    fn from(s: String) -> Self {
        SourceSelector::from(s.as_str())
    }
}

impl From<SourceSelector> for String {
    fn from(s: SourceSelector) -> Self {
        s.to_string()
    }
}

impl std::fmt::Display for SourceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSelector::Default => write!(f, "default"),
            SourceSelector::Named(id) => write!(f, "{id}"),
        }
    }
}

/// Resolve a raw feed emission into a sample for `selector`.
///
/// Returns `None` when the path is still unknown, when the selected
/// sub-source is missing, or when the value is not finite. None of these are
/// errors: the feed may announce a path before it has any readings.
pub fn select_sample(update: Option<&PathUpdate>, selector: &SourceSelector) -> Option<f64> {
    let value = update?.sample_for(selector)?;
    if value.is_finite() {
        Some(value)
    } else {
        tracing::debug!(target: "vessel_trends::feed", %selector, value, "non-finite sample ignored");
        None
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

type CancelFn = Box<dyn FnOnce() + Send>;

/// Cancels a feed subscription. Safe to call any number of times.
pub struct UnsubscribeHandle {
    cancel: Mutex<Option<CancelFn>>,
}

impl UnsubscribeHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { cancel: Mutex::new(Some(Box::new(cancel))) }
    }

    /// A handle with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: Mutex::new(None) }
    }

    /// Run the cancel action the first time; later calls do nothing.
    pub fn unsubscribe(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// `true` until [`unsubscribe`](Self::unsubscribe) has run.
    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for UnsubscribeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsubscribeHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Boxed stream of raw path emissions.
pub type PathStream = Pin<Box<dyn Stream<Item = Option<PathUpdate>> + Send>>;

/// What a feed hands back for one path subscription.
pub struct PathSubscription {
    pub updates: PathStream,
    pub handle: UnsubscribeHandle,
}

/// An upstream source of path updates.
pub trait SourceFeed: Send + Sync {
    /// Open a subscription to `path` on behalf of series `series_id`.
    fn subscribe_path(&self, series_id: &str, path: &str) -> PathSubscription;
}

// ---------------------------------------------------------------------------
// MemoryFeed
// ---------------------------------------------------------------------------

struct PathSubscriber {
    id: u64,
    series_id: String,
    tx: mpsc::UnboundedSender<Option<PathUpdate>>,
}

#[derive(Default)]
struct FeedState {
    paths: HashMap<String, PathUpdate>,
    subscribers: HashMap<String, Vec<PathSubscriber>>,
    next_id: u64,
}

/// In-process [`SourceFeed`] that keeps the latest reading per sub-source.
///
/// Clone freely; all clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<FeedState>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a reading and push the path's new state to its subscribers.
    ///
    /// The first sub-source ever published on a path becomes its default.
    pub fn publish(&self, path: &str, source_id: &str, value: f64) {
        let mut state = self.state();
        let entry = state
            .paths
            .entry(path.to_string())
            .or_insert_with(|| PathUpdate {
                default_source: source_id.to_string(),
                sources: HashMap::new(),
            });
        entry.sources.insert(source_id.to_string(), SourceValue { value });
        let update = entry.clone();
        Self::fan_out(&mut state, path, update);
    }

    /// Change which sub-source the path declares as default.
    pub fn set_default_source(&self, path: &str, source_id: &str) {
        let mut state = self.state();
        let entry = state.paths.entry(path.to_string()).or_default();
        entry.default_source = source_id.to_string();
        let update = entry.clone();
        Self::fan_out(&mut state, path, update);
    }

    /// Current state of `path`, or `None` if it was never published.
    pub fn current(&self, path: &str) -> Option<PathUpdate> {
        self.state().paths.get(path).cloned()
    }

    /// Number of live subscriptions to `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.state().subscribers.get(path).map_or(0, Vec::len)
    }

    /// Series ids currently subscribed to `path`.
    pub fn subscribers_of(&self, path: &str) -> Vec<String> {
        self.state()
            .subscribers
            .get(path)
            .map(|subs| subs.iter().map(|s| s.series_id.clone()).collect())
            .unwrap_or_default()
    }

    fn fan_out(state: &mut FeedState, path: &str, update: PathUpdate) {
        if let Some(subs) = state.subscribers.get_mut(path) {
            subs.retain(|s| s.tx.send(Some(update.clone())).is_ok());
        }
    }
}

impl SourceFeed for MemoryFeed {
    fn subscribe_path(&self, series_id: &str, path: &str) -> PathSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state();
            let id = state.next_id;
            state.next_id += 1;
            // Replay the current state, or None for a path we have never seen.
            let _ = tx.send(state.paths.get(path).cloned());
            state
                .subscribers
                .entry(path.to_string())
                .or_default()
                .push(PathSubscriber { id, series_id: series_id.to_string(), tx });
            id
        };

        let feed = self.clone();
        let path_owned = path.to_string();
        let handle = UnsubscribeHandle::new(move || {
            let mut state = feed.state();
            if let Some(subs) = state.subscribers.get_mut(&path_owned) {
                subs.retain(|s| s.id != id);
                if subs.is_empty() {
                    state.subscribers.remove(&path_owned);
                }
            }
        });

        PathSubscription {
            updates: Box::pin(UnboundedReceiverStream::new(rx)),
            handle,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
