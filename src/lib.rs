// Library interface for the ETA simulator
// This allows integration tests and benches to access internal modules

pub mod config;
pub mod errors;
pub mod eta;
pub mod external;
pub mod geo;
pub mod playback;
pub mod provider;
pub mod route;
pub mod scheduler;
pub mod session;

// Re-export commonly used types
pub use config::SimulatorConfig;
pub use errors::SimulatorError;
pub use eta::{EtaChangeTracker, EtaSnapshot, EtaStatus, StopBoard};
pub use geo::Coordinate;
pub use playback::{WaypointPlayer, WaypointSample};
pub use provider::{PositionProvider, PositionUpdate, SimulationMode};
pub use route::{Route, RouteInterpolator, Stop, WrapPolicy};
pub use session::{RunOutcome, SimulationSession};
