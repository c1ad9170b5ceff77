pub mod loader;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::SimulatorError;
use crate::geo::{Coordinate, bearing_degrees, distance_meters};

pub use loader::{load_route_geojson, parse_route_geojson};

/// An ordered, directionally fixed path. Immutable once built.
#[derive(Clone, Debug)]
pub struct Route {
    points: Vec<Coordinate>,
    /// Haversine length of segment `i` (from `points[i]` to `points[i + 1]`).
    segment_lengths: Vec<f64>,
    total_length_m: f64,
}

impl Route {
    pub fn new(points: Vec<Coordinate>) -> Result<Self, SimulatorError> {
        if points.len() < 2 {
            return Err(SimulatorError::InvalidRoute {
                reason: format!("a route needs at least 2 points, got {}", points.len()),
            });
        }
        let segment_lengths: Vec<f64> = points
            .iter()
            .tuple_windows()
            .map(|(a, b)| distance_meters(a, b))
            .collect();
        let total_length_m = segment_lengths.iter().sum();
        Ok(Self {
            points,
            segment_lengths,
            total_length_m,
        })
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn segment_count(&self) -> usize {
        self.segment_lengths.len()
    }

    pub fn total_length_m(&self) -> f64 {
        self.total_length_m
    }
}

/// A named point of interest along the route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub coordinate: Coordinate,
    pub name: String,
    pub code: Option<String>,
    /// 1-based position in the route's stop list
    pub sequence_index: usize,
}

impl Stop {
    pub fn stop_key(&self) -> String {
        self.coordinate.stop_key()
    }
}

/// What happens once the vehicle passes the final vertex.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrapPolicy {
    /// Jump back to the first vertex and keep going; the route is treated as a circuit.
    #[default]
    Loop,
    /// Park on the final vertex.
    Hold,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TraversalState {
    pub distance_covered_m: f64,
    pub segment_index: usize,
    /// Progress through the current segment, in [0, 1]
    pub segment_fraction: f64,
}

/// Interpolated output of a single [`RouteInterpolator::advance`] call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoutePosition {
    pub coordinate: Coordinate,
    pub heading_deg: f64,
}

pub struct RouteInterpolator {
    route: Route,
    state: TraversalState,
    wrap_policy: WrapPolicy,
}

impl RouteInterpolator {
    pub fn new(route: Route, wrap_policy: WrapPolicy) -> Self {
        Self {
            route,
            state: TraversalState::default(),
            wrap_policy,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn state(&self) -> &TraversalState {
        &self.state
    }

    pub fn wrap_policy(&self) -> WrapPolicy {
        self.wrap_policy
    }

    pub fn reset(&mut self) {
        self.state = TraversalState::default();
    }

    /// Moves the vehicle `delta_m` meters further along the route and returns where it is now.
    ///
    /// Negative or non-finite deltas are treated as zero.
    pub fn advance(&mut self, delta_m: f64) -> RoutePosition {
        let delta_m = if delta_m.is_finite() {
            delta_m.max(0.0)
        } else {
            0.0
        };
        let covered = self.state.distance_covered_m + delta_m;

        match self.locate(covered) {
            Some((segment_index, segment_fraction)) => {
                self.state = TraversalState {
                    distance_covered_m: covered,
                    segment_index,
                    segment_fraction,
                };
            }
            None => match self.wrap_policy {
                WrapPolicy::Loop => {
                    log::debug!(
                        "Covered {:.1} m of a {:.1} m route, looping back to the start",
                        covered,
                        self.route.total_length_m
                    );
                    self.state = TraversalState::default();
                }
                WrapPolicy::Hold => {
                    self.state = TraversalState {
                        distance_covered_m: self.route.total_length_m,
                        segment_index: self.route.segment_count() - 1,
                        segment_fraction: 1.0,
                    };
                }
            },
        }

        self.position()
    }

    /// Position and heading for the current traversal state without moving.
    pub fn position(&self) -> RoutePosition {
        let from = &self.route.points[self.state.segment_index];
        let to = &self.route.points[self.state.segment_index + 1];
        RoutePosition {
            coordinate: from.lerp(to, self.state.segment_fraction),
            heading_deg: bearing_degrees(from, to),
        }
    }

    /// Finds the segment whose running total first exceeds `covered`. None once the final
    /// vertex has been reached.
    fn locate(&self, covered: f64) -> Option<(usize, f64)> {
        let mut before = 0.0;
        for (index, length) in self.route.segment_lengths.iter().enumerate() {
            if before + length > covered {
                return Some((index, (covered - before) / length));
            }
            before += length;
        }
        None
    }
}
