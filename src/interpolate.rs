//! Fills missing stop delays by interpolating along each trip's shape.

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::clean::DelayedStopTime;

/// Returns `true` if any row carries a `shape_dist_traveled`.
pub fn has_shape_distances(rows: &[DelayedStopTime]) -> bool {
    rows.iter().any(|r| r.shape_dist_traveled.is_some())
}

/// Fills null delays trip by trip and returns the number of stops filled.
///
/// Within a trip, ordered by `stop_sequence`:
/// - a trip without any delay is left alone;
/// - the first stop takes the delay of the first stop that has one, or `0`
///   when the two lie more than `dist_threshold` apart; the last stop is
///   pinned the same way from the last known delay;
/// - every other null delay is linearly interpolated against
///   `shape_dist_traveled` between the known delays;
/// - the trip's delays are rounded to `precision` decimal places.
///
/// Trips with a stop lacking `shape_dist_traveled` are left alone.
#[tracing::instrument(skip(rows), fields(rows = rows.len()))]
pub fn interpolate_delays(
    rows: &mut [DelayedStopTime],
    dist_threshold: f64,
    precision: u32,
) -> usize {
    if !has_shape_distances(rows) {
        warn!("No shape_dist_traveled values, skipping interpolation");
        return 0;
    }

    let view: &[DelayedStopTime] = rows;
    let mut order: Vec<usize> = (0..view.len()).collect();
    order.sort_by(|&a, &b| {
        (view[a].trip_id.as_str(), view[a].stop_sequence)
            .cmp(&(view[b].trip_id.as_str(), view[b].stop_sequence))
    });
    let trips: Vec<Vec<usize>> = order
        .into_iter()
        .chunk_by(|&i| view[i].trip_id.as_str())
        .into_iter()
        .map(|(_, stops)| stops.collect())
        .collect();

    let mut filled = 0usize;
    let mut without_data = 0usize;
    let mut without_distance = 0usize;

    for stops in &trips {
        let Some(dists) = stops
            .iter()
            .map(|&i| rows[i].shape_dist_traveled)
            .collect::<Option<Vec<f64>>>()
        else {
            debug!(trip_id = %rows[stops[0]].trip_id, "Trip lacks shape distances, leaving as is");
            without_distance += 1;
            continue;
        };

        let mut delays: Vec<Option<f64>> = stops.iter().map(|&i| rows[i].delay).collect();
        let missing = delays.iter().filter(|d| d.is_none()).count();
        if !fill_trip(&dists, &mut delays, dist_threshold) {
            without_data += 1;
            continue;
        }
        filled += missing;

        for (&i, delay) in stops.iter().zip(delays) {
            rows[i].delay = delay.map(|d| round_to(d, precision));
        }
    }

    info!(
        trips = trips.len(),
        filled, without_data, without_distance, "Delays interpolated"
    );
    filled
}

/// Pins the boundary delays of one trip and interpolates the rest in place.
///
/// Returns `false`, leaving `delays` untouched, when no delay is known.
fn fill_trip(dists: &[f64], delays: &mut [Option<f64>], dist_threshold: f64) -> bool {
    let known: Vec<usize> = (0..delays.len()).filter(|&i| delays[i].is_some()).collect();
    let (Some(&first_known), Some(&last_known)) = (known.first(), known.last()) else {
        return false;
    };

    let last = delays.len() - 1;
    for (boundary, nearest) in [(0, first_known), (last, last_known)] {
        let value = delays[nearest].unwrap_or(0.0);
        delays[boundary] = if (dists[boundary] - dists[nearest]).abs() > dist_threshold {
            Some(0.0)
        } else {
            Some(value)
        };
    }

    let mut anchors: Vec<(f64, f64)> = dists
        .iter()
        .zip(delays.iter())
        .filter_map(|(&dist, delay)| delay.map(|d| (dist, d)))
        .collect();
    anchors.sort_by(|a, b| a.0.total_cmp(&b.0));

    for (dist, delay) in dists.iter().zip(delays.iter_mut()) {
        if delay.is_none() {
            *delay = Some(interp(*dist, &anchors));
        }
    }
    true
}

/// Piecewise-linear interpolation through `anchors` (sorted by x), clamped to
/// the end values outside their range.
fn interp(x: f64, anchors: &[(f64, f64)]) -> f64 {
    let (first, last) = (anchors[0], anchors[anchors.len() - 1]);
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }

    let j = anchors.partition_point(|&(ax, _)| ax <= x) - 1;
    let ((x0, y0), (x1, y1)) = (anchors[j], anchors[j + 1]);
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
