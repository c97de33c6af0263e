//! Attaches combined observations to the scheduled stop times.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::parser::DelayObservation;
use crate::schedule::ScheduledStopTime;

/// A scheduled stop time with the realtime delays observed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedStopTime {
    pub trip_id: String,
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub shape_dist_traveled: Option<f64>,
    pub arrival_delay: Option<i64>,
    pub departure_delay: Option<i64>,
}

impl AugmentedStopTime {
    pub fn unobserved(st: ScheduledStopTime) -> Self {
        Self {
            trip_id: st.trip_id,
            arrival_time: st.arrival_time,
            departure_time: st.departure_time,
            stop_id: st.stop_id,
            stop_sequence: st.stop_sequence,
            shape_dist_traveled: st.shape_dist_traveled,
            arrival_delay: None,
            departure_delay: None,
        }
    }
}

/// Left-joins `delays` onto `stop_times` by `(trip_id, stop_id, stop_sequence)`.
///
/// Every scheduled row yields exactly one output row, in input order. The
/// observation's `route_id` is not carried over. Should two observations of
/// different routes match the same stop, the first one in `delays` is used.
#[tracing::instrument(skip_all, fields(stop_times = stop_times.len(), delays = delays.len()))]
pub fn join_delays(
    stop_times: Vec<ScheduledStopTime>,
    delays: &[DelayObservation],
) -> Vec<AugmentedStopTime> {
    let mut by_stop: HashMap<(&str, &str, u32), &DelayObservation> = HashMap::new();
    for o in delays {
        let key = (o.trip_id.as_str(), o.stop_id.as_str(), o.stop_sequence);
        if let Entry::Vacant(slot) = by_stop.entry(key) {
            slot.insert(o);
        }
    }

    let mut observed = 0usize;
    let augmented: Vec<AugmentedStopTime> = stop_times
        .into_iter()
        .map(|st| {
            let found = by_stop
                .get(&(st.trip_id.as_str(), st.stop_id.as_str(), st.stop_sequence))
                .map(|o| (o.arrival_delay, o.departure_delay));
            let mut row = AugmentedStopTime::unobserved(st);
            if let Some((arrival_delay, departure_delay)) = found {
                observed += 1;
                row.arrival_delay = arrival_delay;
                row.departure_delay = departure_delay;
            }
            row
        })
        .collect();

    info!(rows = augmented.len(), observed, "Delays joined onto schedule");
    augmented
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_count_matches_schedule() {
        let stop_times = vec![
            stop_time("T1", "A", 1),
            stop_time("T1", "B", 2),
            stop_time("T2", "A", 1),
        ];
        let delays = vec![
            obs("R1", "T1", "B", 2, Some(30)),
            obs("R1", "T3", "A", 1, Some(5)),
        ];

        let joined = join_delays(stop_times, &delays);

        assert_eq!(joined.len(), 3);
        assert_eq!(joined[0].departure_delay, None);
        assert_eq!(joined[1].departure_delay, Some(30));
        assert_eq!(joined[2].departure_delay, None);
    }

    #[test]
    fn test_join_without_observations() {
        let joined = join_delays(vec![stop_time("T1", "A", 1)], &[]);
        assert_eq!(joined, vec![AugmentedStopTime::unobserved(stop_time("T1", "A", 1))]);
    }

    #[test]
    fn test_stop_id_must_match() {
        let delays = [obs("R1", "T1", "Z", 1, Some(9))];
        let joined = join_delays(vec![stop_time("T1", "A", 1)], &delays);
        assert_eq!(joined[0].departure_delay, None);
    }

    #[test]
    fn test_duplicate_match_across_routes_keeps_first() {
        let delays = vec![
            obs("R1", "T1", "A", 1, Some(10)),
            obs("R2", "T1", "A", 1, Some(99)),
        ];
        let joined = join_delays(vec![stop_time("T1", "A", 1)], &delays);

        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].departure_delay, Some(10));
    }

    // Helper functions for tests
    fn stop_time(trip_id: &str, stop_id: &str, stop_sequence: u32) -> ScheduledStopTime {
        ScheduledStopTime {
            trip_id: trip_id.to_string(),
            arrival_time: "08:00:00".to_string(),
            departure_time: "08:00:00".to_string(),
            stop_id: stop_id.to_string(),
            stop_sequence,
            shape_dist_traveled: Some(stop_sequence as f64),
        }
    }

    fn obs(
        route_id: &str,
        trip_id: &str,
        stop_id: &str,
        stop_sequence: u32,
        departure_delay: Option<i64>,
    ) -> DelayObservation {
        DelayObservation {
            route_id: route_id.to_string(),
            trip_id: trip_id.to_string(),
            stop_id: stop_id.to_string(),
            stop_sequence,
            arrival_delay: None,
            departure_delay,
        }
    }
}
