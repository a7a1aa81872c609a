//! TOML configuration: which series to run at startup.
//!
//! ```toml
//! log_level = "info"
//!
//! [[series]]
//! path = "environment.wind.speedApparent"
//! source = "default"
//! interval_secs = 5.0
//! capacity = 60
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, TrendError};
use crate::feed::SourceSelector;
use crate::registry::SeriesConfig;

/// One `[[series]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub path: String,
    #[serde(default)]
    pub source: SourceSelector,
    pub interval_secs: f64,
    pub capacity: usize,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub series: Vec<SeriesSpec>,
}

impl AppConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TrendError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate config text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply the same checks as [`crate::registry::SeriesRegistry::add_series`]
    /// to every series.
    pub fn validate(&self) -> Result<()> {
        for spec in &self.series {
            SeriesConfig::try_from(spec)?;
        }
        Ok(())
    }
}
