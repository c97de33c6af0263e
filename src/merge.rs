//! Combination of delay observations across snapshots.

use itertools::Itertools;
use tracing::info;

use crate::parser::DelayObservation;

/// Combines the observations of many snapshots into one record per
/// `(route_id, trip_id, stop_sequence)`, sorted by that key.
///
/// Exact duplicates and records without any delay are dropped first. Records
/// sharing a key are then folded into the first one in sort order: a later
/// record only fills a delay the kept record lacks, it never overwrites one.
/// The sort is stable, so among equal keys the snapshot order decides which
/// record comes first.
#[tracing::instrument(skip_all, fields(snapshots = delays_list.len()))]
pub fn combine_delays(delays_list: Vec<Vec<DelayObservation>>) -> Vec<DelayObservation> {
    let total: usize = delays_list.iter().map(Vec::len).sum();

    let mut delays: Vec<DelayObservation> = delays_list
        .into_iter()
        .flatten()
        .unique()
        .filter(DelayObservation::has_delay)
        .collect();
    let distinct = delays.len();

    delays.sort_by(|a, b| merge_key(a).cmp(&merge_key(b)));

    let combined: Vec<DelayObservation> = delays
        .into_iter()
        .coalesce(|mut kept, next| {
            if merge_key(&kept) == merge_key(&next) {
                kept.arrival_delay = kept.arrival_delay.or(next.arrival_delay);
                kept.departure_delay = kept.departure_delay.or(next.departure_delay);
                Ok(kept)
            } else {
                Err((kept, next))
            }
        })
        .collect();

    info!(total, distinct, combined = combined.len(), "Delays combined");
    combined
}

fn merge_key(o: &DelayObservation) -> (&str, &str, u32) {
    (o.route_id.as_str(), o.trip_id.as_str(), o.stop_sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_backfill_from_later_record() {
        let a = obs("R1", "T1", 3, Some(5), None);
        let b = obs("R1", "T1", 3, None, Some(7));

        let combined = combine_delays(vec![vec![a], vec![b]]);
        assert_eq!(combined, vec![obs("R1", "T1", 3, Some(5), Some(7))]);
    }

    #[test]
    fn test_first_record_wins_on_conflict() {
        let first = obs("R1", "T1", 3, Some(5), None);
        let second = obs("R1", "T1", 3, Some(60), Some(70));

        let combined = combine_delays(vec![vec![first], vec![second]]);
        assert_eq!(combined, vec![obs("R1", "T1", 3, Some(5), Some(70))]);
    }

    #[test]
    fn test_records_without_delays_are_dropped() {
        let empty = obs("R1", "T1", 1, None, None);
        let combined = combine_delays(vec![vec![empty.clone()], vec![empty]]);
        assert!(combined.is_empty());
    }

    #[test]
    fn test_empty_record_does_not_block_backfill() {
        // The null-only record is removed before folding, so the two real
        // records still merge.
        let combined = combine_delays(vec![
            vec![obs("R1", "T1", 2, None, None)],
            vec![obs("R1", "T1", 2, None, Some(12))],
            vec![obs("R1", "T1", 2, Some(9), None)],
        ]);
        assert_eq!(combined, vec![obs("R1", "T1", 2, Some(9), Some(12))]);
    }

    #[test]
    fn test_output_is_sorted_and_keys_are_unique() {
        let combined = combine_delays(vec![
            vec![
                obs("R2", "T9", 1, Some(1), None),
                obs("R1", "T2", 5, None, Some(2)),
                obs("R1", "T2", 4, Some(3), Some(3)),
            ],
            vec![
                obs("R1", "T2", 4, Some(3), Some(3)),
                obs("R1", "T1", 10, Some(4), None),
                obs("R2", "T9", 1, None, Some(8)),
            ],
        ]);

        let keys: Vec<_> = combined
            .iter()
            .map(|o| (o.route_id.as_str(), o.trip_id.as_str(), o.stop_sequence))
            .collect();
        assert_eq!(
            keys,
            vec![("R1", "T1", 10), ("R1", "T2", 4), ("R1", "T2", 5), ("R2", "T9", 1)]
        );
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), keys.len());
        assert!(combined.iter().all(DelayObservation::has_delay));
        assert_eq!(combined[3].departure_delay, Some(8));
    }

    #[test]
    fn test_sequence_sorts_numerically() {
        let combined = combine_delays(vec![vec![
            obs("R1", "T1", 10, Some(1), None),
            obs("R1", "T1", 9, Some(1), None),
        ]]);
        assert_eq!(combined[0].stop_sequence, 9);
    }

    // Helper functions for tests
    fn obs(
        route_id: &str,
        trip_id: &str,
        stop_sequence: u32,
        arrival_delay: Option<i64>,
        departure_delay: Option<i64>,
    ) -> DelayObservation {
        DelayObservation {
            route_id: route_id.to_string(),
            trip_id: trip_id.to_string(),
            stop_id: format!("S{stop_sequence}"),
            stop_sequence,
            arrival_delay,
            departure_delay,
        }
    }
}
