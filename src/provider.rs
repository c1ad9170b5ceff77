use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

use crate::SimulatorError;
use crate::config::SimulatorConfig;
use crate::geo::Coordinate;
use crate::playback::{PlaybackFrame, WaypointPlayer};
use crate::route::{Route, RouteInterpolator, WrapPolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulationMode {
    Route,
    Playback,
}

impl SimulationMode {
    /// Recorded samples are further apart in time than synthetic route steps, so playback
    /// ticks on a coarser base interval.
    pub fn base_interval(&self, config: &SimulatorConfig) -> Duration {
        match self {
            SimulationMode::Route => config.route_interval(),
            SimulationMode::Playback => config.playback_interval(),
        }
    }
}

/// What a single tick produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionUpdate {
    pub coordinate: Coordinate,
    /// Absent for the last recorded sample.
    pub heading_deg: Option<f64>,
    pub speed_mps: f64,
    /// Index of the recorded sample, playback only
    pub sample_index: Option<usize>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl From<PlaybackFrame<'_>> for PositionUpdate {
    fn from(frame: PlaybackFrame<'_>) -> Self {
        Self {
            coordinate: frame.sample.coordinate,
            heading_deg: frame.heading_deg,
            speed_mps: frame.sample.speed_mps,
            sample_index: Some(frame.index),
            recorded_at: Some(frame.sample.timestamp),
        }
    }
}

/// Source of vehicle positions, chosen once per session.
pub enum PositionProvider {
    /// Constant-speed travel along a route, `step_m` meters per tick.
    Route {
        interpolator: RouteInterpolator,
        speed_mps: f64,
        step_m: f64,
    },
    Playback(WaypointPlayer),
}

impl PositionProvider {
    pub fn route(route: Route, wrap_policy: WrapPolicy, speed_mps: f64, time_step_s: f64) -> Self {
        debug!(
            "Route provider: {:.0} m route, {:.2} m per tick",
            route.total_length_m(),
            speed_mps * time_step_s
        );
        PositionProvider::Route {
            interpolator: RouteInterpolator::new(route, wrap_policy),
            speed_mps,
            step_m: speed_mps * time_step_s,
        }
    }

    pub fn route_from_config(route: Route, config: &SimulatorConfig) -> Self {
        Self::route(
            route,
            config.wrap_policy,
            config.route_speed_mps(),
            config.route_time_step_s,
        )
    }

    pub fn playback(player: WaypointPlayer) -> Self {
        PositionProvider::Playback(player)
    }

    pub fn mode(&self) -> SimulationMode {
        match self {
            PositionProvider::Route { .. } => SimulationMode::Route,
            PositionProvider::Playback(_) => SimulationMode::Playback,
        }
    }

    /// Position for the next tick. Playback signals [`SimulatorError::PlaybackComplete`]
    /// once every sample has been read.
    pub fn next_position(&mut self) -> Result<PositionUpdate, SimulatorError> {
        match self {
            PositionProvider::Route {
                interpolator,
                speed_mps,
                step_m,
            } => {
                let position = interpolator.advance(*step_m);
                Ok(PositionUpdate {
                    coordinate: position.coordinate,
                    heading_deg: Some(position.heading_deg),
                    speed_mps: *speed_mps,
                    sample_index: None,
                    recorded_at: None,
                })
            }
            PositionProvider::Playback(player) => player.advance().map(PositionUpdate::from),
        }
    }

    /// Jumps to recorded sample `index`. Route mode has nothing to seek to.
    pub fn seek(&mut self, index: usize) -> Result<PositionUpdate, SimulatorError> {
        match self {
            PositionProvider::Route { .. } => Err(SimulatorError::InvalidUserInput {
                field: "index".to_string(),
                reason: "seeking is only available when replaying recorded waypoints"
                    .to_string(),
            }),
            PositionProvider::Playback(player) => player.seek(index).map(PositionUpdate::from),
        }
    }

    /// Back to the start of the route or the first sample.
    pub fn reset(&mut self) {
        match self {
            PositionProvider::Route { interpolator, .. } => interpolator.reset(),
            PositionProvider::Playback(player) => player.reset(),
        }
    }

    pub fn route_interpolator(&self) -> Option<&RouteInterpolator> {
        match self {
            PositionProvider::Route { interpolator, .. } => Some(interpolator),
            PositionProvider::Playback(_) => None,
        }
    }

    pub fn waypoint_player(&self) -> Option<&WaypointPlayer> {
        match self {
            PositionProvider::Route { .. } => None,
            PositionProvider::Playback(player) => Some(player),
        }
    }
}
