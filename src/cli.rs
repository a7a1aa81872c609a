use crate::config::{AppConfig, SeriesSpec};
use crate::feed::SourceSelector;
use crate::window::{Bucket, WindowSnapshot};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

/// Filter used when neither `RUST_LOG`, `--log-level` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser)]
#[command(name = "vessel-trends")]
#[command(version)]
#[command(about = "Rolling min/avg/max trend windows over live vessel telemetry")]
pub struct Args {
    /// TOML file listing the series to run
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Extra series path to run in addition to the config file
    #[arg(long)]
    pub path: Option<String>,

    /// Sub-source for --path ("default" follows the feed's default source)
    #[arg(long, default_value = "default")]
    pub source: String,

    /// Flush interval in seconds for --path
    #[arg(long, default_value = "5")]
    pub interval: f64,

    /// Window capacity (number of buckets) for --path
    #[arg(long, default_value = "12")]
    pub capacity: usize,

    /// Drive an in-process feed with random-walk samples for every series path
    #[arg(long)]
    pub demo: bool,

    /// Consumer id used when subscribing to each series
    #[arg(long, default_value = "cli")]
    pub consumer: String,

    /// Stop after printing this many snapshots (runs until Ctrl-C otherwise)
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Print snapshots as JSON lines instead of coloured text
    #[arg(long)]
    pub json: bool,

    /// Tracing filter (overridden by RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    /// The ad-hoc series described by `--path` and friends, if any.
    pub fn adhoc_series(&self) -> Option<SeriesSpec> {
        self.path.as_ref().map(|path| SeriesSpec {
            path: path.clone(),
            source: SourceSelector::from(self.source.as_str()),
            interval_secs: self.interval,
            capacity: self.capacity,
        })
    }
}

/// Pick the tracing filter: `RUST_LOG` wins, then the CLI, then the config.
pub fn resolve_log_filter(env: Option<&str>, cli: Option<&str>, config: Option<&str>) -> String {
    env.or(cli)
        .or(config)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_LOG_FILTER)
        .to_string()
}

/// Merge the config file with the `--path` series.
pub fn effective_config(file: Option<AppConfig>, args: &Args) -> AppConfig {
    let mut cfg = file.unwrap_or_default();
    if let Some(spec) = args.adhoc_series() {
        cfg.series.push(spec);
    }
    cfg
}

/// One-line text rendering of a window, oldest bucket first.
///
/// Empty slots print as `·`, empty buckets as `—`.
pub fn render_snapshot(path: &str, snapshot: &WindowSnapshot) -> String {
    let cells: Vec<String> = snapshot.iter().map(render_slot).collect();
    format!("{} [{}]", path.bold(), cells.join(" "))
}

fn render_slot(slot: &Option<Bucket>) -> String {
    match slot {
        None => "·".dimmed().to_string(),
        Some(Bucket { average: Some(avg), min: Some(min), max: Some(max), .. }) => {
            format!("{}{}{}", format!("{min:.2}").blue(), format!("/{avg:.2}/").green(), format!("{max:.2}").red())
        }
        Some(_) => "—".yellow().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["vt"]);
        assert!(args.config.is_none());
        assert!(args.path.is_none());
        assert_eq!(args.source, "default");
        assert!((args.interval - 5.0).abs() < 1e-12);
        assert_eq!(args.capacity, 12);
        assert!(!args.demo);
        assert_eq!(args.consumer, "cli");
        assert!(args.ticks.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_args_parse_full() {
        let args = Args::parse_from([
            "vt",
            "--config",
            "trends.toml",
            "--path",
            "navigation.speedOverGround",
            "--source",
            "gps.1",
            "--interval",
            "0.5",
            "--capacity",
            "30",
            "--demo",
            "--consumer",
            "dash",
            "--ticks",
            "4",
            "--json",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("trends.toml")));
        assert_eq!(args.capacity, 30);
        assert!(args.demo);
        assert!(args.json);
        assert_eq!(args.ticks, Some(4));
        assert_eq!(args.consumer, "dash");
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_adhoc_series_absent_without_path() {
        let args = Args::parse_from(["vt", "--capacity", "3"]);
        assert!(args.adhoc_series().is_none());
    }

    #[test]
    fn test_adhoc_series_uses_flags() {
        let args = Args::parse_from(["vt", "--path", "p", "--source", "ais", "--capacity", "3"]);
        let spec = args.adhoc_series().unwrap();
        assert_eq!(spec.path, "p");
        assert_eq!(spec.source, SourceSelector::Named("ais".into()));
        assert_eq!(spec.capacity, 3);
    }

    #[test]
    fn test_effective_config_appends_adhoc() {
        let file = AppConfig::from_toml_str(
            "[[series]]\npath = \"a\"\ninterval_secs = 1\ncapacity = 2\n",
        )
        .unwrap();
        let args = Args::parse_from(["vt", "--path", "b"]);
        let cfg = effective_config(Some(file), &args);
        let paths: Vec<&str> = cfg.series.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_log_filter_precedence() {
        assert_eq!(resolve_log_filter(Some("trace"), Some("debug"), Some("warn")), "trace");
        assert_eq!(resolve_log_filter(None, Some("debug"), Some("warn")), "debug");
        assert_eq!(resolve_log_filter(None, None, Some("warn")), "warn");
        assert_eq!(resolve_log_filter(None, None, None), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_resolve_log_filter_ignores_blank() {
        assert_eq!(resolve_log_filter(Some("  "), None, None), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_render_snapshot_marks_slots() {
        colored::control::set_override(false);
        let snap: WindowSnapshot = vec![
            None,
            Some(Bucket::empty(1)),
            Some(Bucket { timestamp: 2, average: Some(4.0), min: Some(2.0), max: Some(6.0) }),
        ]
        .into();
        let line = render_snapshot("p", &snap);
        assert_eq!(line, "p [· — 2.00/4.00/6.00]");
    }
}
