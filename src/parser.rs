//! Delay observation extraction from GTFS Realtime snapshots.
//!
//! Snapshots are stored either as JSON documents of the shape
//! `{"response": {"header": {...}, "entity": [...]}}` or as protobuf-encoded
//! [`FeedMessage`]s. Both yield the same [`Snapshot`].

use std::path::Path;

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::gtfs_rt::FeedMessage;
use crate::gtfs_rt::trip_update::StopTimeUpdate;

/// One partial delay measurement for a stop of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelayObservation {
    pub route_id: String,
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub arrival_delay: Option<i64>,
    pub departure_delay: Option<i64>,
}

impl DelayObservation {
    pub fn has_delay(&self) -> bool {
        self.arrival_delay.is_some() || self.departure_delay.is_some()
    }
}

/// Observations of one feed capture plus its header timestamp (epoch seconds).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub timestamp: Option<i64>,
    pub observations: Vec<DelayObservation>,
}

/// Structural problem inside an otherwise well-formed snapshot.
#[derive(Error, Debug)]
enum ContentError {
    #[error("missing field {0:?}")]
    Missing(&'static str),

    #[error("field {0:?} has an unexpected type")]
    Invalid(&'static str),
}

/// Extracts delay observations from a decoded JSON snapshot.
///
/// A `None`, `null` or empty payload yields an empty snapshot without a
/// timestamp. Entities without a `trip_update` are skipped; any other
/// malformed entity drops the observations of the whole snapshot.
pub fn extract_delays(payload: Option<&Value>) -> Snapshot {
    let Some(feed) = payload.filter(|v| !is_empty(v)) else {
        return Snapshot::default();
    };

    let timestamp = header_timestamp(feed);
    let observations = match json_observations(feed) {
        Ok(observations) => observations,
        Err(e) => {
            warn!(error = %e, ?timestamp, "Malformed snapshot content, dropping its observations");
            Vec::new()
        }
    };

    Snapshot {
        timestamp,
        observations,
    }
}

/// Extracts delay observations from a decoded protobuf feed.
///
/// Every entry of a trip update's `stop_time_update` list yields one
/// observation.
pub fn extract_feed_delays(feed: &FeedMessage) -> Snapshot {
    let timestamp = feed.header.timestamp.and_then(|t| i64::try_from(t).ok());
    let observations = match feed_observations(feed) {
        Ok(observations) => observations,
        Err(e) => {
            warn!(error = %e, ?timestamp, "Malformed feed content, dropping its observations");
            Vec::new()
        }
    };

    Snapshot {
        timestamp,
        observations,
    }
}

/// Decodes raw JSON snapshot bytes. Zero-length input counts as an absent
/// snapshot.
pub fn parse_json(bytes: &[u8]) -> Result<Snapshot, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Snapshot::default());
    }
    let value: Value = serde_json::from_slice(bytes)?;
    Ok(extract_delays(Some(&value)))
}

/// Decodes raw protobuf snapshot bytes.
pub fn parse_protobuf(bytes: &[u8]) -> Result<Snapshot, prost::DecodeError> {
    let feed = FeedMessage::decode(bytes)?;
    Ok(extract_feed_delays(&feed))
}

/// Reads one snapshot file, choosing the decoder by extension (`.pb` is
/// protobuf, anything else JSON).
pub fn read_snapshot(path: &Path) -> Result<Snapshot, PipelineError> {
    let bytes = std::fs::read(path)?;
    let is_protobuf = path.extension().and_then(|e| e.to_str()) == Some("pb");
    debug!(path = %path.display(), bytes = bytes.len(), is_protobuf, "Reading snapshot");

    if is_protobuf {
        parse_protobuf(&bytes).map_err(|source| PipelineError::InvalidProtobufSnapshot {
            path: path.to_path_buf(),
            source,
        })
    } else {
        parse_json(&bytes).map_err(|source| PipelineError::InvalidJsonSnapshot {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Renders a protobuf feed in the JSON snapshot shape.
pub fn feed_to_json(feed: &FeedMessage) -> serde_json::Result<Value> {
    let mut response = Map::new();
    response.insert("response".to_string(), serde_json::to_value(feed)?);
    Ok(Value::Object(response))
}

/// Reads `response.header.timestamp`, which may be a number or numeric string.
pub fn header_timestamp(feed: &Value) -> Option<i64> {
    let t = field(feed, "response")
        .and_then(|r| field(r, "header"))
        .and_then(|h| field(h, "timestamp"))?;
    match t {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

fn json_observations(feed: &Value) -> Result<Vec<DelayObservation>, ContentError> {
    let response = field(feed, "response").ok_or(ContentError::Missing("response"))?;
    let entities = match field(response, "entity") {
        None => return Ok(Vec::new()),
        Some(Value::Array(entities)) => entities,
        Some(_) => return Err(ContentError::Invalid("entity")),
    };

    let mut observations = Vec::new();
    for entity in entities {
        let Some(trip_update) = field(entity, "trip_update") else {
            continue;
        };

        let trip = field(trip_update, "trip").ok_or(ContentError::Missing("trip"))?;
        let route_id = string_field(trip, "route_id")?;
        let trip_id = string_field(trip, "trip_id")?;

        let updates: Vec<&Value> = match field(trip_update, "stop_time_update") {
            Some(Value::Array(updates)) => updates.iter().collect(),
            Some(update @ Value::Object(_)) => vec![update],
            Some(_) => return Err(ContentError::Invalid("stop_time_update")),
            None => return Err(ContentError::Missing("stop_time_update")),
        };

        for update in updates {
            observations.push(DelayObservation {
                route_id: route_id.clone(),
                trip_id: trip_id.clone(),
                stop_id: string_field(update, "stop_id")?,
                stop_sequence: sequence_field(update)?,
                arrival_delay: event_delay(update, "arrival")?,
                departure_delay: event_delay(update, "departure")?,
            });
        }
    }

    Ok(observations)
}

fn feed_observations(feed: &FeedMessage) -> Result<Vec<DelayObservation>, ContentError> {
    let mut observations = Vec::new();
    for entity in &feed.entity {
        let Some(trip_update) = &entity.trip_update else {
            continue;
        };

        let route_id = trip_update
            .trip
            .route_id
            .clone()
            .ok_or(ContentError::Missing("route_id"))?;
        let trip_id = trip_update
            .trip
            .trip_id
            .clone()
            .ok_or(ContentError::Missing("trip_id"))?;

        // An empty list is what a cancelled trip looks like on the wire.
        for update in &trip_update.stop_time_update {
            observations.push(feed_observation(&route_id, &trip_id, update)?);
        }
    }

    Ok(observations)
}

fn feed_observation(
    route_id: &str,
    trip_id: &str,
    update: &StopTimeUpdate,
) -> Result<DelayObservation, ContentError> {
    Ok(DelayObservation {
        route_id: route_id.to_string(),
        trip_id: trip_id.to_string(),
        stop_id: update
            .stop_id
            .clone()
            .ok_or(ContentError::Missing("stop_id"))?,
        stop_sequence: update
            .stop_sequence
            .ok_or(ContentError::Missing("stop_sequence"))?,
        arrival_delay: update.arrival.as_ref().and_then(|e| e.delay).map(i64::from),
        departure_delay: update.departure.as_ref().and_then(|e| e.delay).map(i64::from),
    })
}

/// Looks up `key`, treating an explicit `null` like a missing key.
fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn string_field(value: &Value, key: &'static str) -> Result<String, ContentError> {
    match field(value, key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(ContentError::Invalid(key)),
        None => Err(ContentError::Missing(key)),
    }
}

fn sequence_field(update: &Value) -> Result<u32, ContentError> {
    const KEY: &str = "stop_sequence";
    let parsed = match field(update, KEY).ok_or(ContentError::Missing(KEY))? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(ContentError::Invalid(KEY))
}

/// Reads `<kind>.delay`. A missing event, or an event carrying only an
/// absolute time, is an absent delay.
fn event_delay(update: &Value, kind: &'static str) -> Result<Option<i64>, ContentError> {
    let Some(delay) = field(update, kind).and_then(|event| field(event, "delay")) else {
        return Ok(None);
    };
    match delay {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .map(Some)
            .ok_or(ContentError::Invalid(kind)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ContentError::Invalid(kind)),
        _ => Err(ContentError::Invalid(kind)),
    }
}
