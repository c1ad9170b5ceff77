use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::info;
use serde::Deserialize;

use super::{WaypointPlayer, WaypointSample};
use crate::SimulatorError;
use crate::geo::Coordinate;

pub const REQUIRED_COLUMNS: [&str; 6] = ["Driver ID", "Rid", "Ts", "Lat", "Lon", "Speed"];

pub fn load_waypoints_csv(path: &Path) -> Result<WaypointPlayer, SimulatorError> {
    let file = File::open(path).map_err(|e| SimulatorError::WaypointLoaderError {
        source: csv::Error::from(e),
    })?;
    let player = WaypointPlayer::new(parse_waypoints_csv(file)?)?;
    info!(
        "Loaded {:?}: {} waypoints for ride {}",
        path,
        player.len(),
        player.ride_id()
    );
    Ok(player)
}

/// Parses every row or none: the first malformed row fails the whole batch.
/// Rows come back in file order; [`WaypointPlayer::new`] does the sorting.
pub fn parse_waypoints_csv<R: Read>(reader: R) -> Result<Vec<WaypointSample>, SimulatorError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| SimulatorError::WaypointLoaderError { source: e })?
        .clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if !missing.is_empty() {
        return Err(SimulatorError::InvalidWaypointData {
            row: 1,
            reason: format!(
                "missing columns {}; required columns: {}",
                missing.join(", "),
                REQUIRED_COLUMNS.join(", ")
            ),
        });
    }

    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SimulatorError::InvalidWaypointData {
            row: e
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(samples.len() + 2),
            reason: e.to_string(),
        })?;
        let row = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(samples.len() + 2);
        let raw: RawWaypoint = record
            .deserialize(Some(&headers))
            .map_err(|e| SimulatorError::InvalidWaypointData {
                row,
                reason: e.to_string(),
            })?;
        samples.push(raw.into_sample(row)?);
    }
    Ok(samples)
}

#[derive(Deserialize)]
struct RawWaypoint {
    #[serde(rename = "Driver ID")]
    driver_id: String,
    #[serde(rename = "Rid")]
    ride_id: String,
    #[serde(rename = "Ts")]
    timestamp: String,
    #[serde(rename = "Lat")]
    lat: String,
    #[serde(rename = "Lon")]
    lon: String,
    #[serde(rename = "Speed")]
    speed: String,
}

impl RawWaypoint {
    fn into_sample(self, row: usize) -> Result<WaypointSample, SimulatorError> {
        let invalid = |reason: String| SimulatorError::InvalidWaypointData { row, reason };

        let lat = parse_number("Lat", &self.lat).map_err(invalid)?;
        let lon = parse_number("Lon", &self.lon).map_err(invalid)?;
        let speed_mps = parse_number("Speed", &self.speed).map_err(invalid)?;
        if speed_mps < 0.0 {
            return Err(invalid(format!("negative speed {}", speed_mps)));
        }
        let coordinate = Coordinate::new(lat, lon).map_err(|e| invalid(e.to_string()))?;
        let timestamp = parse_timestamp(&self.timestamp)
            .ok_or_else(|| invalid(format!("unparsable timestamp '{}'", self.timestamp)))?;

        Ok(WaypointSample {
            driver_id: self.driver_id,
            ride_id: self.ride_id,
            timestamp,
            coordinate,
            speed_mps,
        })
    }
}

fn parse_number(column: &str, value: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(number),
        _ => Err(format!("non-numeric {} '{}'", column, value)),
    }
}

/// Accepts RFC 3339, or a naive `YYYY-MM-DD[ T]HH:MM:SS[.fff]` taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
