//! Boundaries to the location tracking service: where positions go and where ETAs come from.

mod sink;
mod source;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SimulatorError;
use crate::eta::EtaSnapshot;
use crate::geo::Coordinate;

pub use sink::{JsonLinesSink, LoggingSink, write_reports};
pub use source::{RecordedEtaSource, StaticEtaSource};

/// One driver location update, in the shape the location service accepts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    #[serde(rename = "pt")]
    pub coordinate: Coordinate,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "acc")]
    pub accuracy_m: f64,
    #[serde(rename = "v")]
    pub speed_mps: f64,
}

impl PositionReport {
    pub fn new(coordinate: Coordinate, timestamp: DateTime<Utc>, speed_mps: f64) -> Self {
        Self {
            coordinate,
            timestamp,
            accuracy_m: 0.0,
            speed_mps,
        }
    }
}

/// Receives one position report per tick.
///
/// Reports are fire-and-forget: the session logs a failed report and moves on to the next
/// tick without retrying.
#[async_trait]
pub trait PositionSink: Send + Sync {
    async fn report(&self, report: PositionReport) -> Result<(), SimulatorError>;
}

/// Supplies the per-stop ETAs for a route. Queried once per tick.
#[async_trait]
pub trait EtaSource: Send + Sync {
    async fn fetch_etas(&self, route_code: &str) -> Result<Vec<EtaSnapshot>, SimulatorError>;
}
