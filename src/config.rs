//! Pipeline settings and the secrets file used for authenticated feeds.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::clean::DEFAULT_DELAY_CUTOFF;
use crate::timestamp::TIMESTAMP_FORMAT;

/// Knobs of one delay table build.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `strftime` pattern of snapshot file stems. It must round-trip through
    /// parsing to a full date and time.
    pub timestamp_format: String,
    /// Delays with an absolute value at or above this (seconds) are dropped.
    pub delay_cutoff: f64,
    /// Distance, in `shape_dist_traveled` units, beyond which a known delay
    /// is not carried to the first or last stop.
    pub dist_threshold: f64,
    /// Decimal places kept on interpolated delays.
    pub precision: u32,
}

impl PipelineConfig {
    /// Reads settings from a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timestamp_format: TIMESTAMP_FORMAT.to_string(),
            delay_cutoff: DEFAULT_DELAY_CUTOFF,
            dist_threshold: 1.0,
            precision: 0,
        }
    }
}

/// Named secrets stored as a plain JSON object on disk:
/// ```json
/// {
///   "feed_api_key": "abc123"
/// }
/// ```
pub struct Secrets {
    entries: HashMap<String, String>,
}

impl Secrets {
    /// Loads the secrets from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: HashMap<String, String> = serde_json::from_str(content)?;
        Ok(Self { entries })
    }

    /// Returns the secret called `name`.
    pub fn get(&self, name: &str) -> Result<&str> {
        self.entries
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Set the {name} secrets variable"))
    }
}
