//! Best-effort decoding of `trackVehicles` responses from the location tracking service.

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;

use super::{EtaSnapshot, EtaStatus};
use crate::geo::Coordinate;
use crate::playback::loader::parse_timestamp;

/// Extracts the per-stop ETAs of `vehicle_number` from a `trackVehicles` response.
///
/// Malformed stop records (no coordinate, unparsable `eta`) are skipped rather than failing
/// the whole response. A response without the vehicle yields no snapshots.
pub fn parse_track_vehicles(response: &Value, vehicle_number: &str) -> Vec<EtaSnapshot> {
    let Some(vehicles) = response.as_array() else {
        debug!("trackVehicles response is not an array");
        return Vec::new();
    };
    let Some(stops) = vehicles
        .iter()
        .find(|v| v.get("vehicleNumber").and_then(Value::as_str) == Some(vehicle_number))
        .and_then(|v| v.pointer("/vehicleInfo/upcomingStops"))
        .and_then(Value::as_array)
    else {
        debug!("No upcoming stops for vehicle {} in response", vehicle_number);
        return Vec::new();
    };

    stops.iter().filter_map(parse_upcoming_stop).collect()
}

fn parse_upcoming_stop(record: &Value) -> Option<EtaSnapshot> {
    let lat = record
        .pointer("/stop/coordinate/lat")
        .and_then(Value::as_f64);
    let lon = record
        .pointer("/stop/coordinate/lon")
        .and_then(Value::as_f64);
    let (Some(lat), Some(lon)) = (lat, lon) else {
        debug!("Skipping stop record without a coordinate: {}", record);
        return None;
    };
    let Some(eta) = record.get("eta").and_then(parse_eta) else {
        debug!("Skipping stop record with unparsable eta: {}", record);
        return None;
    };

    let status = match record.get("status").and_then(Value::as_str) {
        Some("Reached") => EtaStatus::Reached,
        _ => EtaStatus::Upcoming,
    };

    Some(EtaSnapshot {
        stop_key: Coordinate { lat, lon }.stop_key(),
        stop_name: record
            .pointer("/stop/name")
            .and_then(Value::as_str)
            .map(str::to_string),
        eta,
        delta_seconds: record.get("delta").and_then(Value::as_f64).unwrap_or(0.0),
        status,
    })
}

/// ETAs arrive as timestamp strings or epoch milliseconds.
fn parse_eta(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        _ => None,
    }
}
