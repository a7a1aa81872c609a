use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, StreamMap};
use tracing_subscriber::EnvFilter;

use vessel_trends::cli::{effective_config, render_snapshot, resolve_log_filter, Args};
use vessel_trends::{AppConfig, MemoryFeed, SeriesRegistry, SeriesSpec, SourceSelector};

// ---------------------------------------------------------------------------
// Feed drivers
// ---------------------------------------------------------------------------

/// One JSON line on stdin: `{"path": "...", "source": "...", "value": 1.0}`.
#[derive(Debug, Deserialize)]
struct FeedLine {
    path: String,
    source: String,
    value: f64,
    /// Optional: also declare `source` as the path's default.
    #[serde(default)]
    make_default: bool,
}

/// Publish every well-formed stdin line into `feed` until EOF.
fn spawn_stdin_feed(feed: MemoryFeed) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<FeedLine>(&line) {
                    Ok(l) => {
                        feed.publish(&l.path, &l.source, l.value);
                        if l.make_default {
                            feed.set_default_source(&l.path, &l.source);
                        }
                    }
                    Err(e) => tracing::warn!(target: "vessel_trends::stdin", error = %e, "bad feed line"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(target: "vessel_trends::stdin", error = %e, "stdin read failed");
                    break;
                }
            }
        }
        tracing::info!(target: "vessel_trends::stdin", "stdin feed closed");
    })
}

/// Random-walk samples on every path, four times a second.
fn spawn_demo_feed(feed: MemoryFeed, paths: Vec<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut values: HashMap<String, f64> =
            paths.iter().map(|p| (p.clone(), rng.gen_range(0.0..20.0))).collect();
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            ticker.tick().await;
            for (path, value) in values.iter_mut() {
                *value = (*value + rng.gen_range(-1.0..1.0)).max(0.0);
                feed.publish(path, "demo.primary", *value);
                // A noisier secondary sensor on the same path.
                feed.publish(path, "demo.secondary", *value + rng.gen_range(-0.5..0.5));
            }
        }
    })
}

fn demo_series() -> Vec<SeriesSpec> {
    vec![
        SeriesSpec {
            path: "environment.wind.speedApparent".to_string(),
            source: SourceSelector::Default,
            interval_secs: 1.0,
            capacity: 10,
        },
        SeriesSpec {
            path: "navigation.speedOverGround".to_string(),
            source: SourceSelector::Named("demo.secondary".to_string()),
            interval_secs: 2.0,
            capacity: 5,
        },
    ]
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file = args.config.as_deref().map(AppConfig::load).transpose()?;
    let filter = resolve_log_filter(
        env::var("RUST_LOG").ok().as_deref(),
        args.log_level.as_deref(),
        file.as_ref().and_then(|c| c.log_level.as_deref()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter)?)
        .init();

    let mut cfg = effective_config(file, &args);
    if cfg.series.is_empty() {
        if !args.demo {
            return Err("no series configured: pass --config, --path, or --demo".into());
        }
        cfg.series = demo_series();
    }

    let feed = MemoryFeed::new();
    let registry = SeriesRegistry::new(Arc::new(feed.clone()));
    let ids = registry.load_from_config(&cfg)?;

    let driver = if args.demo {
        spawn_demo_feed(feed.clone(), cfg.series.iter().map(|s| s.path.clone()).collect())
    } else {
        spawn_stdin_feed(feed.clone())
    };

    let mut streams = StreamMap::new();
    for (idx, id) in ids.iter().enumerate() {
        let channel = registry.subscribe(&args.consumer, id)?;
        streams.insert(idx, channel.stream());
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0u64;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            item = streams.next() => {
                let Some((idx, snapshot)) = item else { break };
                let spec = &cfg.series[idx];
                if args.json {
                    let line = serde_json::json!({
                        "series_id": ids[idx],
                        "path": spec.path,
                        "window": &*snapshot,
                    });
                    println!("{line}");
                } else {
                    println!("{}", render_snapshot(&spec.path, &snapshot));
                }
                printed += 1;
                if args.ticks.is_some_and(|limit| printed >= limit) {
                    break;
                }
            }
        }
    }

    driver.abort();
    registry.shutdown().await;
    Ok(())
}
