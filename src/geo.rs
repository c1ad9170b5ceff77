//! Great-circle helpers shared by the route interpolator and the waypoint player.

use serde::{Deserialize, Serialize};
use uom::si::f64::Velocity;
use uom::si::velocity::{kilometer_per_hour, meter_per_second};

use crate::SimulatorError;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting latitudes outside [-90, 90] and longitudes outside
    /// [-180, 180] (NaN included).
    pub fn new(lat: f64, lon: f64) -> Result<Self, SimulatorError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(SimulatorError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Linear interpolation in degree space. Good enough for the short segments of a
    /// bus route, not geodesically exact.
    pub fn lerp(&self, other: &Coordinate, fraction: f64) -> Coordinate {
        Coordinate {
            lat: self.lat + (other.lat - self.lat) * fraction,
            lon: self.lon + (other.lon - self.lon) * fraction,
        }
    }

    /// Identity of a stop at this position, as used by the ETA service.
    pub fn stop_key(&self) -> String {
        format!("{}-{}", self.lat, self.lon)
    }
}

/// Haversine distance between two coordinates in meters.
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing (forward azimuth) from `from` toward `to`, normalized to [0, 360).
///
/// When both points are equal the direction is undefined; this returns 0 (north).
pub fn bearing_degrees(from: &Coordinate, to: &Coordinate) -> f64 {
    if from == to {
        return 0.0;
    }
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative angles
    if bearing >= 360.0 { 0.0 } else { bearing }
}

pub fn kph_to_meters_per_second(kph: f64) -> f64 {
    Velocity::new::<kilometer_per_hour>(kph).get::<meter_per_second>()
}

pub fn meters_per_second_to_kph(mps: f64) -> f64 {
    Velocity::new::<meter_per_second>(mps).get::<kilometer_per_hour>()
}
