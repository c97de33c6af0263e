//! Snapshot admission window for a service date.

use chrono::{Days, NaiveDate, NaiveTime};
use tracing::debug;

use crate::schedule::{ScheduledStopTime, max_departure_seconds, seconds_to_timestr};
use crate::timestamp::SnapshotKey;

/// Padding added to the last scheduled departure to tolerate feed skew.
pub const FUZZ_MARGIN_SECS: u32 = 20 * 60;

const SECS_PER_DAY: u32 = 24 * 3600;

/// Inclusive `[start, end]` range of canonical snapshot keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceWindow {
    pub start: SnapshotKey,
    pub end: SnapshotKey,
}

impl ServiceWindow {
    /// Window from midnight of `date` to the last scheduled departure plus
    /// [`FUZZ_MARGIN_SECS`].
    ///
    /// Schedule times past `24:00:00` roll the end onto the next calendar
    /// date with the time of day taken modulo 24 hours. Returns `None` when
    /// no stop time carries a departure.
    pub fn for_date(date: NaiveDate, stop_times: &[ScheduledStopTime]) -> Option<Self> {
        let last_departure = max_departure_seconds(stop_times)?;
        let end_secs = last_departure + FUZZ_MARGIN_SECS;

        let end_date = if end_secs >= SECS_PER_DAY {
            date.checked_add_days(Days::new(1))?
        } else {
            date
        };
        let end_time = NaiveTime::from_num_seconds_from_midnight_opt(end_secs % SECS_PER_DAY, 0)?;

        let window = Self {
            start: SnapshotKey::from_date_time(date, NaiveTime::MIN),
            end: SnapshotKey::from_date_time(end_date, end_time),
        };
        debug!(
            start = %window.start,
            end = %window.end,
            last_departure = %seconds_to_timestr(last_departure),
            "Service window"
        );
        Some(window)
    }

    pub fn contains(&self, key: &SnapshotKey) -> bool {
        &self.start <= key && key <= &self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_within_day() {
        let stop_times = [stop_time("06:00:00"), stop_time("22:10:00")];
        let window = ServiceWindow::for_date(date(), &stop_times).unwrap();
        assert_eq!(window.start.as_str(), "20160615000000");
        assert_eq!(window.end.as_str(), "20160615223000");
    }

    #[test]
    fn test_window_rolls_past_midnight() {
        let window = ServiceWindow::for_date(date(), &[stop_time("23:50:00")]).unwrap();
        assert_eq!(window.end.as_str(), "20160616001000");

        let window = ServiceWindow::for_date(date(), &[stop_time("25:05:30")]).unwrap();
        assert_eq!(window.end.as_str(), "20160616012530");
    }

    #[test]
    fn test_window_rolls_over_month_end() {
        let end_of_month = NaiveDate::from_ymd_opt(2016, 6, 30).unwrap();
        let window = ServiceWindow::for_date(end_of_month, &[stop_time("23:45:00")]).unwrap();
        assert_eq!(window.end.as_str(), "20160701000500");
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let window = ServiceWindow::for_date(date(), &[stop_time("10:00:00")]).unwrap();
        let key = |s: &str| SnapshotKey::from_file_stem(s, "%Y%m%d%H%M%S").unwrap();

        assert!(window.contains(&key("20160615000000")));
        assert!(window.contains(&key("20160615102000")));
        assert!(!window.contains(&key("20160615102001")));
        assert!(!window.contains(&key("20160614235959")));
    }

    #[test]
    fn test_no_departures_means_no_window() {
        assert_eq!(ServiceWindow::for_date(date(), &[]), None);
    }

    // Helper functions for tests
    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 6, 15).unwrap()
    }

    fn stop_time(departure_time: &str) -> ScheduledStopTime {
        ScheduledStopTime {
            trip_id: "T1".to_string(),
            arrival_time: departure_time.to_string(),
            departure_time: departure_time.to_string(),
            stop_id: "S1".to_string(),
            stop_sequence: 1,
            shape_dist_traveled: None,
        }
    }
}
