//! Periodic snapshot collection.
//!
//! Each cycle fetches one feed, retrying immediately on failure, and stores
//! it as `<formatted header timestamp>.json`. A cycle whose attempts are all
//! exhausted writes nothing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use prost::Message;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::fetch::{HttpClient, fetch_bytes};
use crate::gtfs_rt::FeedMessage;
use crate::parser::{feed_to_json, header_timestamp};
use crate::timestamp::{TIMESTAMP_FORMAT, format_timestamp, is_valid_format};

/// Anything that can produce one raw feed payload per call.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>>;
}

/// A feed fetched with GET from a fixed URL.
pub struct HttpFeed<C> {
    pub client: C,
    pub url: String,
}

#[async_trait]
impl<C: HttpClient> FeedSource for HttpFeed<C> {
    async fn fetch(&self) -> Result<Vec<u8>> {
        fetch_bytes(&self.client, &self.url).await
    }
}

/// Encoding of the payloads returned by a [`FeedSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Json,
    Protobuf,
}

#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// Time between two cycles.
    pub frequency: Duration,
    /// Total collection time; `duration / frequency` cycles are run.
    pub duration: Duration,
    /// Attempts per cycle before giving up on it.
    pub num_tries: u32,
    /// `strftime` pattern of the file names.
    pub timestamp_format: String,
    pub payload: PayloadFormat,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(30),
            duration: Duration::from_secs(3600),
            num_tries: 3,
            timestamp_format: TIMESTAMP_FORMAT.to_string(),
            payload: PayloadFormat::Json,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectSummary {
    pub cycles: usize,
    pub written: usize,
    pub skipped: usize,
}

/// Runs the collection loop, writing snapshots into `out_dir`.
///
/// Fetch and decode failures are retried up to `num_tries` times per cycle;
/// failing to write a snapshot to disk aborts the run.
#[tracing::instrument(skip(source, config), fields(out_dir = %out_dir.display()))]
pub async fn collect_feeds<F: FeedSource + ?Sized>(
    source: &F,
    out_dir: &Path,
    config: &CollectConfig,
) -> Result<CollectSummary> {
    if config.frequency.is_zero() {
        bail!("Collection frequency must be positive");
    }
    if !is_valid_format(&config.timestamp_format) {
        bail!("Invalid timestamp format {:?}", config.timestamp_format);
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let num_calls = (config.duration.as_millis() / config.frequency.as_millis().max(1)) as usize;
    info!(
        num_calls,
        frequency_ms = config.frequency.as_millis() as u64,
        "Starting collection"
    );

    let mut summary = CollectSummary::default();
    for cycle in 1..=num_calls {
        summary.cycles += 1;

        match fetch_snapshot(source, config).await {
            Some(snapshot) => {
                let path = write_snapshot(out_dir, &snapshot)?;
                info!(cycle, path = %path.display(), "Snapshot written");
                summary.written += 1;
            }
            None => {
                warn!(cycle, num_tries = config.num_tries, "All attempts failed, skipping cycle");
                summary.skipped += 1;
            }
        }

        if cycle < num_calls {
            tokio::time::sleep(config.frequency).await;
        }
    }

    info!(
        cycles = summary.cycles,
        written = summary.written,
        skipped = summary.skipped,
        "Collection finished"
    );
    Ok(summary)
}

/// Fetched feed in the JSON snapshot shape with its file name stem.
struct FetchedSnapshot {
    name: String,
    value: Value,
}

async fn fetch_snapshot<F: FeedSource + ?Sized>(
    source: &F,
    config: &CollectConfig,
) -> Option<FetchedSnapshot> {
    for attempt in 1..=config.num_tries {
        match try_fetch(source, config).await {
            Ok(snapshot) => return Some(snapshot),
            Err(e) => debug!(attempt, error = %e, "Feed attempt failed"),
        }
    }
    None
}

async fn try_fetch<F: FeedSource + ?Sized>(
    source: &F,
    config: &CollectConfig,
) -> Result<FetchedSnapshot> {
    let bytes = source.fetch().await?;
    let value = match config.payload {
        PayloadFormat::Json => serde_json::from_slice(&bytes)?,
        PayloadFormat::Protobuf => feed_to_json(&FeedMessage::decode(bytes.as_slice())?)?,
    };
    let timestamp =
        header_timestamp(&value).ok_or_else(|| anyhow!("Feed has no header timestamp"))?;
    let name = format_timestamp(timestamp, &config.timestamp_format)
        .ok_or_else(|| anyhow!("Timestamp {timestamp} is out of range"))?;
    Ok(FetchedSnapshot { name, value })
}

fn write_snapshot(out_dir: &Path, snapshot: &FetchedSnapshot) -> Result<PathBuf> {
    let path = out_dir.join(format!("{}.json", snapshot.name));
    std::fs::write(&path, serde_json::to_vec(&snapshot.value)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::FeedHeader;
    use std::env;
    use std::fs;
    use std::sync::Mutex;

    /// Serves payloads in order, failing whenever the next entry is `None`.
    struct ScriptedFeed {
        responses: Mutex<Vec<Option<Vec<u8>>>>,
    }

    impl ScriptedFeed {
        fn new(mut responses: Vec<Option<Vec<u8>>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }

        fn remaining(&self) -> usize {
            self.responses.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedFeed {
        async fn fetch(&self) -> Result<Vec<u8>> {
            let next = self.responses.lock().unwrap().pop();
            next.flatten().ok_or_else(|| anyhow!("connection reset"))
        }
    }

    #[tokio::test]
    async fn test_retries_then_writes() {
        let dir = out_dir("gtfs_rt_delays_collect_retry");
        let feed = ScriptedFeed::new(vec![None, None, Some(json_feed(1_466_000_000))]);

        let summary = collect_feeds(&feed, &dir, &config(1, 3)).await.unwrap();

        assert_eq!(summary, CollectSummary { cycles: 1, written: 1, skipped: 0 });
        assert!(dir.join("20160615141320.json").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_cycle_writes_nothing() {
        let dir = out_dir("gtfs_rt_delays_collect_exhausted");
        let feed = ScriptedFeed::new(vec![
            None,
            None,
            Some(b"not json".to_vec()),
            Some(json_feed(1_466_000_060)),
        ]);

        let summary = collect_feeds(&feed, &dir, &config(2, 3)).await.unwrap();

        assert_eq!(summary, CollectSummary { cycles: 2, written: 1, skipped: 1 });
        assert_eq!(feed.remaining(), 0);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_protobuf_payload_is_stored_as_json() {
        let dir = out_dir("gtfs_rt_delays_collect_protobuf");
        let message = FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(1_466_000_000),
                incrementality: None,
                feed_version: None,
            },
            entity: vec![],
        };
        let feed = ScriptedFeed::new(vec![Some(message.encode_to_vec())]);
        let mut config = config(1, 1);
        config.payload = PayloadFormat::Protobuf;

        collect_feeds(&feed, &dir, &config).await.unwrap();

        let stored = fs::read(dir.join("20160615141320.json")).unwrap();
        let value: Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(header_timestamp(&value), Some(1_466_000_000));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_zero_frequency_is_rejected() {
        let feed = ScriptedFeed::new(vec![]);
        let mut config = config(1, 1);
        config.frequency = Duration::ZERO;

        let dir = env::temp_dir().join("gtfs_rt_delays_collect_zero");
        assert!(collect_feeds(&feed, &dir, &config).await.is_err());
    }

    #[tokio::test]
    async fn test_unrepresentable_timestamp_is_a_failed_attempt() {
        let dir = out_dir("gtfs_rt_delays_collect_far_future");
        let feed = ScriptedFeed::new(vec![
            Some(json_feed(9_000_000_000_000_000)),
            Some(json_feed(1_466_000_000)),
            Some(json_feed(1_466_000_060)),
        ]);

        let summary = collect_feeds(&feed, &dir, &config(2, 2)).await.unwrap();

        assert_eq!(summary, CollectSummary { cycles: 2, written: 2, skipped: 0 });
        assert!(dir.join("20160615141320.json").exists());
        assert!(dir.join("20160615141420.json").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_format_specifier_is_rejected() {
        let feed = ScriptedFeed::new(vec![Some(json_feed(1_466_000_000))]);
        let mut config = config(1, 1);
        config.timestamp_format = "%Y%Q".to_string();

        let dir = env::temp_dir().join("gtfs_rt_delays_collect_bad_format");
        let err = collect_feeds(&feed, &dir, &config).await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid timestamp format"));
        assert_eq!(feed.remaining(), 1);
    }

    // Helper functions for tests
    fn config(num_calls: u64, num_tries: u32) -> CollectConfig {
        CollectConfig {
            frequency: Duration::from_millis(1),
            duration: Duration::from_millis(num_calls),
            num_tries,
            ..Default::default()
        }
    }

    fn out_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn json_feed(timestamp: i64) -> Vec<u8> {
        serde_json::json!({
            "response": {"header": {"timestamp": timestamp}, "entity": []}
        })
        .to_string()
        .into_bytes()
    }
}
