use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::clean::DelayedStopTime;

/// Coverage summary of one delay table build.
#[derive(Debug, Default, Serialize)]
pub struct DelayStats {
    pub timestamp: DateTime<Utc>,
    pub service_date: Option<NaiveDate>,

    // inputs
    pub snapshot_files: usize,
    pub snapshots_admitted: usize,
    pub observations: usize,
    pub combined_observations: usize,

    // output table
    pub stop_times: usize,
    pub trips: usize,
    pub observed_stops: usize,
    pub interpolated_stops: usize,
    pub stops_with_delay: usize,
    pub stops_without_delay: usize,
    pub trips_without_delay: usize,
}

impl DelayStats {
    /// Counts rows, trips and delays of a finished table.
    pub fn from_table(rows: &[DelayedStopTime]) -> Self {
        let mut s = DelayStats {
            timestamp: Utc::now(),
            ..Default::default()
        };

        let mut trip_has_delay: HashMap<&str, bool> = HashMap::new();
        for row in rows {
            s.stop_times += 1;
            let has_delay = row.delay.is_some();
            if has_delay {
                s.stops_with_delay += 1;
            } else {
                s.stops_without_delay += 1;
            }
            *trip_has_delay.entry(row.trip_id.as_str()).or_insert(false) |= has_delay;
        }

        s.trips = trip_has_delay.len();
        s.trips_without_delay = trip_has_delay.values().filter(|has| !**has).count();
        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of scheduled stops that ended up with a delay.
    pub fn coverage_pct(&self) -> f64 {
        Self::pct(self.stops_with_delay, self.stop_times)
    }

    /// Share of scheduled stops with a delay straight from the feed.
    pub fn observed_pct(&self) -> f64 {
        Self::pct(self.observed_stops, self.stop_times)
    }

    pub fn with_service_date(mut self, date: NaiveDate) -> Self {
        self.service_date = Some(date);
        self
    }

    pub fn with_snapshots(mut self, files: usize, admitted: usize) -> Self {
        self.snapshot_files = files;
        self.snapshots_admitted = admitted;
        self
    }

    pub fn with_observations(mut self, observations: usize, combined: usize) -> Self {
        self.observations = observations;
        self.combined_observations = combined;
        self
    }

    pub fn with_fill(mut self, observed: usize, interpolated: usize) -> Self {
        self.observed_stops = observed;
        self.interpolated_stops = interpolated;
        self
    }

    /// Takes the service date and input counters from an earlier stage.
    pub fn with_inputs(self, inputs: &DelayStats) -> Self {
        let mut s = self
            .with_snapshots(inputs.snapshot_files, inputs.snapshots_admitted)
            .with_observations(inputs.observations, inputs.combined_observations);
        s.service_date = inputs.service_date;
        s
    }
}
