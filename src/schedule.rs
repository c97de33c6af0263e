//! Static schedule access.
//!
//! The pipeline only needs the stop times of the trips running on one
//! service date. [`ScheduleSource`] is that boundary; [`GtfsDirectory`]
//! implements it over an unzipped GTFS feed.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::error::PipelineError;

const GTFS_DATE_FORMAT: &str = "%Y%m%d";

/// One `stop_times.txt` row of a trip active on the service date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStopTime {
    pub trip_id: String,
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    #[serde(default)]
    pub shape_dist_traveled: Option<f64>,
}

/// Provides the scheduled stop times for a service date.
pub trait ScheduleSource {
    fn stop_times_for_date(&self, date: NaiveDate) -> Result<Vec<ScheduledStopTime>, PipelineError>;
}

/// Parses a `YYYYMMDD` service date.
pub fn parse_service_date(s: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(s, GTFS_DATE_FORMAT)
        .map_err(|_| PipelineError::InvalidDate(s.to_string()))
}

/// Converts a schedule clock string (`H:MM:SS`, hours may exceed 23) into
/// seconds past midnight.
pub fn timestr_to_seconds(s: &str) -> Option<u32> {
    let mut parts = s.trim().split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Inverse of [`timestr_to_seconds`], zero-padded to `HH:MM:SS`.
pub fn seconds_to_timestr(secs: u32) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Latest parseable departure time of the table, in seconds past midnight.
pub fn max_departure_seconds(stop_times: &[ScheduledStopTime]) -> Option<u32> {
    stop_times
        .iter()
        .filter_map(|st| timestr_to_seconds(&st.departure_time))
        .max()
}

#[derive(Debug, Deserialize)]
struct TripRow {
    trip_id: String,
    service_id: String,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    service_id: String,
    monday: u8,
    tuesday: u8,
    wednesday: u8,
    thursday: u8,
    friday: u8,
    saturday: u8,
    sunday: u8,
    #[serde(deserialize_with = "gtfs_date")]
    start_date: NaiveDate,
    #[serde(deserialize_with = "gtfs_date")]
    end_date: NaiveDate,
}

impl CalendarRow {
    fn runs_on(&self, date: NaiveDate) -> bool {
        let flag = match date.weekday() {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        };
        flag == 1 && self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Deserialize)]
struct CalendarDateRow {
    service_id: String,
    #[serde(deserialize_with = "gtfs_date")]
    date: NaiveDate,
    exception_type: u8,
}

fn gtfs_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let s = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(s.trim(), GTFS_DATE_FORMAT).map_err(serde::de::Error::custom)
}

/// An unzipped GTFS feed: `trips.txt`, `stop_times.txt` and at least one of
/// `calendar.txt` / `calendar_dates.txt`.
#[derive(Debug)]
pub struct GtfsDirectory {
    trips: Vec<TripRow>,
    calendar: Vec<CalendarRow>,
    calendar_dates: Vec<CalendarDateRow>,
    stop_times: Vec<ScheduledStopTime>,
}

impl GtfsDirectory {
    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let gtfs = Self {
            trips: read_table(path, "trips.txt")?,
            calendar: read_optional_table(path, "calendar.txt")?,
            calendar_dates: read_optional_table(path, "calendar_dates.txt")?,
            stop_times: read_table(path, "stop_times.txt")?,
        };

        info!(
            trips = gtfs.trips.len(),
            stop_times = gtfs.stop_times.len(),
            calendar = gtfs.calendar.len(),
            calendar_dates = gtfs.calendar_dates.len(),
            "GTFS schedule loaded"
        );
        Ok(gtfs)
    }

    /// Service ids running on `date` after applying calendar exceptions.
    pub fn active_services(&self, date: NaiveDate) -> HashSet<&str> {
        let mut services: HashSet<&str> = self
            .calendar
            .iter()
            .filter(|c| c.runs_on(date))
            .map(|c| c.service_id.as_str())
            .collect();

        for exception in self.calendar_dates.iter().filter(|c| c.date == date) {
            match exception.exception_type {
                1 => {
                    services.insert(exception.service_id.as_str());
                }
                2 => {
                    services.remove(exception.service_id.as_str());
                }
                other => debug!(exception_type = other, "Ignoring unknown calendar exception"),
            }
        }

        services
    }
}

impl ScheduleSource for GtfsDirectory {
    fn stop_times_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ScheduledStopTime>, PipelineError> {
        let services = self.active_services(date);
        let service_by_trip: HashMap<&str, &str> = self
            .trips
            .iter()
            .map(|t| (t.trip_id.as_str(), t.service_id.as_str()))
            .collect();

        let stop_times: Vec<ScheduledStopTime> = self
            .stop_times
            .iter()
            .filter(|st| {
                service_by_trip
                    .get(st.trip_id.as_str())
                    .is_some_and(|service| services.contains(service))
            })
            .cloned()
            .collect();

        debug!(
            %date,
            services = services.len(),
            stop_times = stop_times.len(),
            "Stop times for date"
        );
        Ok(stop_times)
    }
}

fn read_table<T: for<'de> Deserialize<'de>>(
    dir: &Path,
    name: &str,
) -> Result<Vec<T>, PipelineError> {
    let file = File::open(dir.join(name))?;
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.map_err(|source| PipelineError::Schedule {
            table: name.to_string(),
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn read_optional_table<T: for<'de> Deserialize<'de>>(
    dir: &Path,
    name: &str,
) -> Result<Vec<T>, PipelineError> {
    if dir.join(name).exists() {
        read_table(dir, name)
    } else {
        debug!(table = name, "Optional GTFS table absent");
        Ok(Vec::new())
    }
}
