//! Rolling trend windows over live vessel telemetry.
//!
//! A [`SeriesRegistry`] binds feed paths to per-series workers. Each worker
//! accumulates samples in an [`AggregationCache`], flushes one [`Bucket`] per
//! interval into a fixed-length [`RollingWindow`], and publishes the whole
//! window through the [`BroadcastHub`] to every consumer subscribed to that
//! series.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod hub;
pub mod registry;
pub mod scheduler;
pub mod window;

pub use cache::AggregationCache;
pub use config::{AppConfig, SeriesSpec};
pub use error::{Result, TrendError};
pub use feed::{MemoryFeed, PathSubscription, PathUpdate, SourceFeed, SourceSelector, SourceValue, UnsubscribeHandle};
pub use hub::{BroadcastHub, ConsumerChannel};
pub use registry::{SeriesConfig, SeriesInfo, SeriesRegistry};
pub use window::{Bucket, RollingWindow, WindowSnapshot};
