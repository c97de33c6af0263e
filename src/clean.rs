//! Collapses arrival and departure delays into one delay per stop.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::join::AugmentedStopTime;

/// Delays at or beyond this many seconds are treated as corrupt.
pub const DEFAULT_DELAY_CUTOFF: f64 = 3600.0;

/// A scheduled stop time with its single best-estimate delay in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedStopTime {
    pub trip_id: String,
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub shape_dist_traveled: Option<f64>,
    pub delay: Option<f64>,
}

impl DelayedStopTime {
    /// Replaces the arrival/departure pair of `row` with `delay`.
    pub fn from_augmented(row: AugmentedStopTime, delay: Option<f64>) -> Self {
        Self {
            trip_id: row.trip_id,
            arrival_time: row.arrival_time,
            departure_time: row.departure_time,
            stop_id: row.stop_id,
            stop_sequence: row.stop_sequence,
            shape_dist_traveled: row.shape_dist_traveled,
            delay,
        }
    }
}

/// Computes the delay of every row, aligned with `rows`.
///
/// A stop's delay is its departure delay, except at the terminal stop of a
/// trip (maximum `stop_sequence`) where it is the arrival delay. Delays whose
/// absolute value is at least `delay_cutoff` become `None`.
#[tracing::instrument(skip(rows), fields(rows = rows.len()))]
pub fn build_delay_column(rows: &[AugmentedStopTime], delay_cutoff: f64) -> Vec<Option<f64>> {
    let mut terminal: HashMap<&str, u32> = HashMap::new();
    for row in rows {
        terminal
            .entry(row.trip_id.as_str())
            .and_modify(|seq| *seq = (*seq).max(row.stop_sequence))
            .or_insert(row.stop_sequence);
    }

    let mut rejected = 0usize;
    let delays: Vec<Option<f64>> = rows
        .iter()
        .map(|row| {
            let is_terminal = terminal.get(row.trip_id.as_str()) == Some(&row.stop_sequence);
            let delay = if is_terminal {
                row.arrival_delay
            } else {
                row.departure_delay
            };
            delay.map(|d| d as f64).filter(|d| {
                let plausible = d.abs() < delay_cutoff;
                if !plausible {
                    rejected += 1;
                }
                plausible
            })
        })
        .collect();

    info!(
        present = delays.iter().flatten().count(),
        rejected, "Delay column built"
    );
    delays
}

/// Applies [`build_delay_column`] and drops the arrival/departure pair.
pub fn clean_delays(rows: Vec<AugmentedStopTime>, delay_cutoff: f64) -> Vec<DelayedStopTime> {
    let delays = build_delay_column(&rows, delay_cutoff);
    rows.into_iter()
        .zip(delays)
        .map(|(row, delay)| DelayedStopTime::from_augmented(row, delay))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_stop_uses_arrival() {
        let rows = vec![
            row("T1", 1, None, Some(10)),
            row("T1", 2, None, Some(20)),
            row("T1", 3, Some(25), Some(30)),
        ];
        let delays = build_delay_column(&rows, DEFAULT_DELAY_CUTOFF);
        assert_eq!(delays, vec![Some(10.0), Some(20.0), Some(25.0)]);
    }

    #[test]
    fn test_terminal_is_per_trip_regardless_of_row_order() {
        let rows = vec![
            row("T2", 2, Some(-5), None),
            row("T1", 1, Some(1), Some(2)),
            row("T2", 1, Some(7), Some(8)),
        ];
        let delays = build_delay_column(&rows, DEFAULT_DELAY_CUTOFF);
        // T1 has a single stop, which is its terminal.
        assert_eq!(delays, vec![Some(-5.0), Some(1.0), Some(8.0)]);
    }

    #[test]
    fn test_implausible_delays_are_nullified() {
        let rows = vec![
            row("T1", 1, None, Some(4000)),
            row("T1", 2, None, Some(-3600)),
            row("T1", 3, None, Some(3599)),
            row("T1", 4, Some(-3599), None),
        ];
        let delays = build_delay_column(&rows, DEFAULT_DELAY_CUTOFF);
        assert_eq!(delays, vec![None, None, Some(3599.0), Some(-3599.0)]);
    }

    #[test]
    fn test_missing_delay_stays_null() {
        let rows = vec![row("T1", 1, Some(3), None), row("T1", 2, None, Some(4))];
        let delays = build_delay_column(&rows, DEFAULT_DELAY_CUTOFF);
        assert_eq!(delays, vec![None, None]);
    }

    #[test]
    fn test_clean_delays_keeps_rows() {
        let rows = vec![row("T1", 1, None, Some(10)), row("T1", 2, Some(12), None)];
        let cleaned = clean_delays(rows, 100.0);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].stop_id, "S1");
        assert_eq!(cleaned[1].delay, Some(12.0));
    }

    // Helper functions for tests
    fn row(
        trip_id: &str,
        stop_sequence: u32,
        arrival_delay: Option<i64>,
        departure_delay: Option<i64>,
    ) -> AugmentedStopTime {
        AugmentedStopTime {
            trip_id: trip_id.to_string(),
            arrival_time: "08:00:00".to_string(),
            departure_time: "08:00:00".to_string(),
            stop_id: format!("S{stop_sequence}"),
            stop_sequence,
            shape_dist_traveled: None,
            arrival_delay,
            departure_delay,
        }
    }
}
