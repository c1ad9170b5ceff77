// Error types for the ETA simulator

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum SimulatorError {
    // Route and coordinate validation
    #[snafu(display("Invalid route: {reason}"))]
    InvalidRoute { reason: String },
    #[snafu(display("Coordinate out of range: lat {lat}, lon {lon}"))]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[snafu(display("Error reading route file"))]
    RouteLoaderError { source: io::Error },
    #[snafu(display("Route file could not be parsed: {reason}"))]
    RouteParseError { reason: String },

    // Recorded waypoint playback
    #[snafu(display("Invalid waypoint data at row {row}: {reason}"))]
    InvalidWaypointData { row: usize, reason: String },
    #[snafu(display("Error reading waypoint file"))]
    WaypointLoaderError { source: csv::Error },
    #[snafu(display("Index {index} out of range for {len} samples"))]
    IndexOutOfRange { index: usize, len: usize },
    #[snafu(display("Playback complete"))]
    PlaybackComplete,

    // Tick scheduling
    #[snafu(display("Scheduler is already running"))]
    SchedulerAlreadyRunning,

    // External boundaries, never fatal to the tick loop
    #[snafu(display("External report failed: {description}"))]
    ExternalReportFailure { description: String },
    #[snafu(display("ETA source error: {description}"))]
    EtaSourceError { description: String },
    #[snafu(display("Error writing report file"))]
    WriterError { source: io::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error accessing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // User input validation errors
    #[snafu(display("Invalid user input: {field} - {reason}"))]
    InvalidUserInput { field: String, reason: String },
}

impl SimulatorError {
    /// True for the terminal end-of-playback signal, which callers treat as a clean stop.
    pub fn is_playback_complete(&self) -> bool {
        matches!(self, SimulatorError::PlaybackComplete)
    }
}
