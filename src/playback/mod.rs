pub mod loader;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::SimulatorError;
use crate::geo::{Coordinate, bearing_degrees};

pub use loader::{load_waypoints_csv, parse_waypoints_csv};

/// A single recorded position sample of a real trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaypointSample {
    pub driver_id: String,
    pub ride_id: String,
    pub timestamp: DateTime<Utc>,
    pub coordinate: Coordinate,
    pub speed_mps: f64,
}

/// One step of playback: the sample read and the heading toward the following sample.
#[derive(Clone, Copy, Debug)]
pub struct PlaybackFrame<'a> {
    pub index: usize,
    pub sample: &'a WaypointSample,
    /// None for the final sample, which has nothing to point at.
    pub heading_deg: Option<f64>,
}

/// Replays recorded samples one per tick, in timestamp order.
///
/// The sample sequence is immutable after construction; the cursor is the only state.
/// Once the cursor reaches the end every further [`WaypointPlayer::advance`] returns
/// [`SimulatorError::PlaybackComplete`]; playback never wraps.
pub struct WaypointPlayer {
    samples: Vec<WaypointSample>,
    current_index: usize,
}

impl WaypointPlayer {
    /// Sorts the samples ascending by timestamp. The sort is stable, so samples sharing a
    /// timestamp keep their input order.
    pub fn new(samples: Vec<WaypointSample>) -> Result<Self, SimulatorError> {
        if samples.is_empty() {
            return Err(SimulatorError::InvalidWaypointData {
                row: 0,
                reason: "no waypoints found".to_string(),
            });
        }
        let samples = samples
            .into_iter()
            .sorted_by_key(|sample| sample.timestamp)
            .collect();
        Ok(Self {
            samples,
            current_index: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.samples.len()
    }

    pub fn samples(&self) -> &[WaypointSample] {
        &self.samples
    }

    /// Ride id of the earliest sample.
    pub fn ride_id(&self) -> &str {
        &self.samples[0].ride_id
    }

    pub fn sample_at(&self, index: usize) -> Result<&WaypointSample, SimulatorError> {
        self.samples
            .get(index)
            .ok_or(SimulatorError::IndexOutOfRange {
                index,
                len: self.samples.len(),
            })
    }

    /// Bearing from sample `index` toward sample `index + 1`.
    pub fn heading_at(&self, index: usize) -> Option<f64> {
        let from = self.samples.get(index)?;
        let to = self.samples.get(index + 1)?;
        Some(bearing_degrees(&from.coordinate, &to.coordinate))
    }

    /// Returns the sample under the cursor and moves the cursor forward.
    pub fn advance(&mut self) -> Result<PlaybackFrame<'_>, SimulatorError> {
        let index = self.current_index;
        if index >= self.samples.len() {
            return Err(SimulatorError::PlaybackComplete);
        }
        self.current_index += 1;
        Ok(self.frame(index))
    }

    /// Moves the cursor so the next [`WaypointPlayer::advance`] reads sample `index`.
    pub fn seek(&mut self, index: usize) -> Result<PlaybackFrame<'_>, SimulatorError> {
        self.sample_at(index)?;
        self.current_index = index;
        Ok(self.frame(index))
    }

    pub fn reset(&mut self) {
        self.current_index = 0;
    }

    fn frame(&self, index: usize) -> PlaybackFrame<'_> {
        PlaybackFrame {
            index,
            sample: &self.samples[index],
            heading_deg: self.heading_at(index),
        }
    }
}
