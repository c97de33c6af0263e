//! End-to-end delay table construction for one service date.
//!
//! window -> parse admitted snapshots -> combine -> join onto schedule ->
//! delay column -> interpolation.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::clean::{DelayedStopTime, clean_delays};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::interpolate::{has_shape_distances, interpolate_delays};
use crate::join::{AugmentedStopTime, join_delays};
use crate::merge::combine_delays;
use crate::parser::read_snapshot;
use crate::schedule::ScheduleSource;
use crate::stats::DelayStats;
use crate::timestamp::SnapshotKey;
use crate::window::ServiceWindow;

/// A snapshot file whose name was parsed back into a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub key: SnapshotKey,
}

/// Rows of a build together with its coverage counters.
#[derive(Debug)]
pub struct DelayTable<T> {
    pub rows: Vec<T>,
    pub stats: DelayStats,
}

/// Lists the snapshot files of `dir`, sorted by file name.
///
/// Files whose stem does not parse with `timestamp_format` are skipped.
pub fn list_snapshots(
    dir: &Path,
    timestamp_format: &str,
) -> Result<Vec<SnapshotFile>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::MissingSnapshotDir(dir.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let key = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| SnapshotKey::from_file_stem(stem, timestamp_format));
        match key {
            Some(key) => files.push(SnapshotFile { path, key }),
            None => warn!(
                path = %path.display(),
                timestamp_format,
                "Snapshot name does not match timestamp format, skipping"
            ),
        }
    }

    Ok(files)
}

/// Scheduled stop times of `date` annotated with the arrival and departure
/// delays observed in the snapshots of `snapshot_dir`, sorted by
/// `(trip_id, stop_sequence)`.
///
/// Only snapshots inside the date's [`ServiceWindow`] are read. The output
/// has exactly one row per scheduled stop time.
#[tracing::instrument(
    skip(schedule, snapshot_dir),
    fields(snapshot_dir = %snapshot_dir.display(), %date)
)]
pub fn build_augmented_stop_times<S: ScheduleSource + ?Sized>(
    snapshot_dir: &Path,
    schedule: &S,
    date: NaiveDate,
    timestamp_format: &str,
) -> Result<DelayTable<AugmentedStopTime>, PipelineError> {
    let files = list_snapshots(snapshot_dir, timestamp_format)?;
    let stop_times = schedule.stop_times_for_date(date)?;

    let admitted: Vec<&SnapshotFile> = match ServiceWindow::for_date(date, &stop_times) {
        Some(window) => files.iter().filter(|f| window.contains(&f.key)).collect(),
        None => {
            warn!("No scheduled departures on this date, no snapshots admitted");
            Vec::new()
        }
    };
    info!(
        files = files.len(),
        admitted = admitted.len(),
        stop_times = stop_times.len(),
        "Snapshots selected"
    );

    let mut delays_list = Vec::with_capacity(admitted.len());
    for file in &admitted {
        let snapshot = read_snapshot(&file.path)?;
        debug!(
            path = %file.path.display(),
            observations = snapshot.observations.len(),
            "Snapshot parsed"
        );
        delays_list.push(snapshot.observations);
    }
    let observations: usize = delays_list.iter().map(Vec::len).sum();

    let delays = combine_delays(delays_list);
    let mut rows = join_delays(stop_times, &delays);
    rows.sort_by(|a, b| (&a.trip_id, a.stop_sequence).cmp(&(&b.trip_id, b.stop_sequence)));

    let stats = DelayStats::default()
        .with_service_date(date)
        .with_snapshots(files.len(), admitted.len())
        .with_observations(observations, delays.len());

    Ok(DelayTable { rows, stats })
}

/// Builds the per-stop delay table for `date`: one `delay` per scheduled
/// stop, interpolated along the trip shape when the schedule has
/// `shape_dist_traveled`. Rows are sorted by `(trip_id, stop_sequence)`.
#[tracing::instrument(
    skip(schedule, snapshot_dir, config),
    fields(snapshot_dir = %snapshot_dir.display(), %date)
)]
pub fn build_delays<S: ScheduleSource + ?Sized>(
    snapshot_dir: &Path,
    schedule: &S,
    date: NaiveDate,
    config: &PipelineConfig,
) -> Result<DelayTable<DelayedStopTime>, PipelineError> {
    let augmented =
        build_augmented_stop_times(snapshot_dir, schedule, date, &config.timestamp_format)?;

    let mut rows = clean_delays(augmented.rows, config.delay_cutoff);
    let observed = rows.iter().filter(|r| r.delay.is_some()).count();

    let interpolated = if has_shape_distances(&rows) {
        interpolate_delays(&mut rows, config.dist_threshold, config.precision)
    } else {
        info!("Schedule has no shape_dist_traveled, leaving missing delays null");
        0
    };

    let stats = DelayStats::from_table(&rows)
        .with_fill(observed, interpolated)
        .with_inputs(&augmented.stats);

    info!(
        stop_times = stats.stop_times,
        coverage_pct = stats.coverage_pct(),
        observed_pct = stats.observed_pct(),
        "Delay table built"
    );
    Ok(DelayTable { rows, stats })
}
