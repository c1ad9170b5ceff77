use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::SimulatorError;
use crate::geo::kph_to_meters_per_second;
use crate::route::WrapPolicy;
use crate::scheduler::check_period;

const CONFIG_DIR_NAME: &str = "eta-simulator";
const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_VEHICLE_ID: &str = "WB052366";
pub const DEFAULT_ROUTE_CODE: &str = "EB12-U";
pub const ROUTE_INTERVAL_MS: u64 = 100;
pub const PLAYBACK_INTERVAL_MS: u64 = 2000;
pub const ROUTE_SPEED_KPH: f64 = 120.0;
pub const ROUTE_TIME_STEP_S: f64 = 0.1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub vehicle_id: String,
    pub route_code: String,
    pub driver_id: String,
    pub merchant_id: String,
    /// Base tick interval when following a route
    pub route_interval_ms: u64,
    /// Base tick interval when replaying recorded samples
    pub playback_interval_ms: u64,
    pub route_speed_kph: f64,
    /// Simulated seconds covered by one route tick
    pub route_time_step_s: f64,
    pub speed_multiplier: u32,
    pub wrap_policy: WrapPolicy,
    /// Offset of the wall clock ETAs are compared in
    pub eta_utc_offset_minutes: i32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            vehicle_id: DEFAULT_VEHICLE_ID.to_string(),
            route_code: DEFAULT_ROUTE_CODE.to_string(),
            driver_id: "123".to_string(),
            merchant_id: "dev".to_string(),
            route_interval_ms: ROUTE_INTERVAL_MS,
            playback_interval_ms: PLAYBACK_INTERVAL_MS,
            route_speed_kph: ROUTE_SPEED_KPH,
            route_time_step_s: ROUTE_TIME_STEP_S,
            speed_multiplier: 1,
            wrap_policy: WrapPolicy::Loop,
            eta_utc_offset_minutes: 0,
        }
    }
}

impl SimulatorConfig {
    pub fn config_path() -> Option<PathBuf> {
        Some(
            dirs::config_dir()?
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        )
    }

    /// Reads the per-user config file. `Ok(None)` when there is none yet.
    pub fn from_local_file() -> Result<Option<Self>, SimulatorError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SimulatorError> {
        debug!("Loading config from {}", path.display());
        let file =
            std::fs::File::open(path).map_err(|e| SimulatorError::ConfigIOError { source: e })?;
        let config: Self = serde_json::from_reader(file)
            .map_err(|e| SimulatorError::ConfigSerializeError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), SimulatorError> {
        let config_path = Self::config_path().ok_or(SimulatorError::NoConfigDir)?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SimulatorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SimulatorError::ConfigIOError { source: e })?;
        }
        let file =
            std::fs::File::create(path).map_err(|e| SimulatorError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| SimulatorError::ConfigSerializeError { source: e })
    }

    pub fn validate(&self) -> Result<(), SimulatorError> {
        let invalid = |field: &str, reason: &str| SimulatorError::InvalidUserInput {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if self.route_interval_ms == 0 || self.playback_interval_ms == 0 {
            return Err(invalid("interval_ms", "must be greater than 0"));
        }
        check_period(self.route_interval(), self.speed_multiplier)?;
        check_period(self.playback_interval(), self.speed_multiplier)?;
        if !self.route_speed_kph.is_finite() || self.route_speed_kph < 0.0 {
            return Err(invalid("route_speed_kph", "must be a non-negative number"));
        }
        if !self.route_time_step_s.is_finite() || self.route_time_step_s < 0.0 {
            return Err(invalid("route_time_step_s", "must be a non-negative number"));
        }
        if self.eta_offset().is_none() {
            return Err(invalid("eta_utc_offset_minutes", "must be within +/- 24 hours"));
        }
        Ok(())
    }

    pub fn route_interval(&self) -> Duration {
        Duration::from_millis(self.route_interval_ms)
    }

    pub fn playback_interval(&self) -> Duration {
        Duration::from_millis(self.playback_interval_ms)
    }

    pub fn route_speed_mps(&self) -> f64 {
        kph_to_meters_per_second(self.route_speed_kph)
    }

    /// Meters covered by one route tick.
    pub fn route_step_meters(&self) -> f64 {
        self.route_speed_mps() * self.route_time_step_s
    }

    pub fn eta_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.eta_utc_offset_minutes.checked_mul(60)?)
    }
}
