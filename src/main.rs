//! CLI entry point for the GTFS-RT delay pipeline.
//!
//! Provides subcommands for collecting realtime snapshots on a schedule,
//! building per-stop delay tables for a service date, and inspecting a single
//! snapshot file.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gtfs_rt_delays::{
    collect::{CollectConfig, FeedSource, HttpFeed, PayloadFormat, collect_feeds},
    config::{PipelineConfig, Secrets},
    fetch::{
        BasicClient,
        auth::{ApiKey, UrlParam},
    },
    output::{append_record, print_json, write_records},
    parser::read_snapshot,
    pipeline::{build_augmented_stop_times, build_delays},
    schedule::{GtfsDirectory, parse_service_date},
    timestamp::{TIMESTAMP_FORMAT, format_timestamp},
};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_delays")]
#[command(about = "Build per-stop delay tables from GTFS-RT trip updates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a GTFS-RT trip update feed and store one snapshot per cycle
    Collect {
        /// Feed URL
        #[arg(long)]
        url: String,

        /// Directory the snapshots are written to
        #[arg(short, long, default_value = "snapshots")]
        out_dir: PathBuf,

        /// Seconds between two fetches
        #[arg(short, long, default_value_t = 30)]
        frequency: u64,

        /// Total collection time in seconds
        #[arg(short, long, default_value_t = 3600)]
        duration: u64,

        /// Attempts per cycle before skipping it
        #[arg(long, default_value_t = 3)]
        num_tries: u32,

        /// strftime pattern of the snapshot file names
        #[arg(long, default_value = TIMESTAMP_FORMAT)]
        timestamp_format: String,

        /// The feed serves protobuf FeedMessages instead of JSON
        #[arg(long, default_value_t = false)]
        protobuf: bool,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// JSON file holding the feed API key
        #[arg(long)]
        secrets: Option<PathBuf>,

        /// Name of the API key inside the secrets file
        #[arg(long, default_value = "api_key")]
        secret_name: String,

        /// Send the API key in this HTTP header
        #[arg(long, requires = "secrets", conflicts_with = "api_key_param")]
        api_key_header: Option<String>,

        /// Send the API key as this URL query parameter
        #[arg(long, requires = "secrets")]
        api_key_param: Option<String>,
    },
    /// Build the delay table of one service date
    Build {
        /// Directory holding the collected snapshots
        #[arg(short, long)]
        snapshots: PathBuf,

        /// Unzipped GTFS feed directory
        #[arg(short, long)]
        gtfs: PathBuf,

        /// Service date as YYYYMMDD
        #[arg(long)]
        date: String,

        /// CSV file the table is written to
        #[arg(short, long, default_value = "delays.csv")]
        output: PathBuf,

        /// JSON file with pipeline settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Max distance a known delay is carried to a trip's first or last stop
        #[arg(long)]
        dist_threshold: Option<f64>,

        /// Delays at or above this many seconds are discarded
        #[arg(long)]
        delay_cutoff: Option<f64>,

        /// Decimal places kept on interpolated delays
        #[arg(long)]
        precision: Option<u32>,

        /// strftime pattern of the snapshot file names
        #[arg(long)]
        timestamp_format: Option<String>,

        /// Stop after the join and write arrival and departure delays
        #[arg(long, default_value_t = false)]
        augmented_only: bool,

        /// CSV file run statistics are appended to
        #[arg(long)]
        stats: Option<PathBuf>,
    },
    /// Parse one snapshot file and report what it contains
    Inspect {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_delays.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_delays.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            url,
            out_dir,
            frequency,
            duration,
            num_tries,
            timestamp_format,
            protobuf,
            timeout,
            secrets,
            secret_name,
            api_key_header,
            api_key_param,
        } => {
            let client = BasicClient::with_timeout(Duration::from_secs(timeout))?;
            let key = match &secrets {
                Some(path) => Some(Secrets::load(path)?.get(&secret_name)?.to_string()),
                None => None,
            };

            let source: Box<dyn FeedSource> = match (key, api_key_header, api_key_param) {
                (Some(key), Some(header), _) => Box::new(HttpFeed {
                    client: ApiKey::new(client, &header, &key)?,
                    url,
                }),
                (Some(key), None, Some(param)) => Box::new(HttpFeed {
                    client: UrlParam::new(client, &param, &key),
                    url,
                }),
                (Some(_), None, None) => {
                    anyhow::bail!("--secrets needs --api-key-header or --api-key-param")
                }
                (None, None, None) => Box::new(HttpFeed { client, url }),
                (None, _, _) => {
                    anyhow::bail!("--api-key-header and --api-key-param need --secrets")
                }
            };

            let config = CollectConfig {
                frequency: Duration::from_secs(frequency),
                duration: Duration::from_secs(duration),
                num_tries,
                timestamp_format,
                payload: if protobuf {
                    PayloadFormat::Protobuf
                } else {
                    PayloadFormat::Json
                },
            };

            collect_feeds(source.as_ref(), &out_dir, &config).await?;
        }
        Commands::Build {
            snapshots,
            gtfs,
            date,
            output,
            config,
            dist_threshold,
            delay_cutoff,
            precision,
            timestamp_format,
            augmented_only,
            stats,
        } => {
            let mut pipeline = match &config {
                Some(path) => PipelineConfig::load(path)?,
                None => PipelineConfig::default(),
            };
            if let Some(v) = dist_threshold {
                pipeline.dist_threshold = v;
            }
            if let Some(v) = delay_cutoff {
                pipeline.delay_cutoff = v;
            }
            if let Some(v) = precision {
                pipeline.precision = v;
            }
            if let Some(v) = timestamp_format {
                pipeline.timestamp_format = v;
            }

            let date = parse_service_date(&date)?;
            let schedule = GtfsDirectory::load(&gtfs)
                .with_context(|| format!("Failed to load GTFS from {}", gtfs.display()))?;

            let table_stats = if augmented_only {
                let table = build_augmented_stop_times(
                    &snapshots,
                    &schedule,
                    date,
                    &pipeline.timestamp_format,
                )?;
                write_records(&output, &table.rows)?;
                table.stats
            } else {
                let table = build_delays(&snapshots, &schedule, date, &pipeline)?;
                write_records(&output, &table.rows)?;
                table.stats
            };

            print_json(&table_stats)?;
            if let Some(path) = stats {
                append_record(&path, &table_stats)?;
            }
        }
        Commands::Inspect { path } => {
            let snapshot = read_snapshot(&path)?;
            let formatted = snapshot
                .timestamp
                .and_then(|ts| format_timestamp(ts, TIMESTAMP_FORMAT));
            info!(
                path = %path.display(),
                observations = snapshot.observations.len(),
                with_delay = snapshot.observations.iter().filter(|o| o.has_delay()).count(),
                timestamp = ?snapshot.timestamp,
                formatted = ?formatted,
                "Snapshot inspected"
            );
        }
    }

    Ok(())
}
