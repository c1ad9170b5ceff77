use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::EtaSource;
use crate::SimulatorError;
use crate::eta::{EtaSnapshot, parse_track_vehicles};

/// Replays recorded `trackVehicles` responses, one per fetch. Once the recording runs out
/// the last response is served again.
pub struct RecordedEtaSource {
    responses: Vec<Value>,
    vehicle_number: String,
    cursor: AtomicUsize,
}

impl RecordedEtaSource {
    pub fn from_responses(
        responses: Vec<Value>,
        vehicle_number: &str,
    ) -> Result<Self, SimulatorError> {
        if responses.is_empty() {
            return Err(SimulatorError::EtaSourceError {
                description: "no recorded responses".to_string(),
            });
        }
        Ok(Self {
            responses,
            vehicle_number: vehicle_number.to_string(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Loads a JSON lines file holding one `trackVehicles` response per line.
    pub fn from_file(path: &Path, vehicle_number: &str) -> Result<Self, SimulatorError> {
        let responses = serde_jsonlines::json_lines(path)
            .and_then(|lines| lines.collect::<Result<Vec<Value>, std::io::Error>>())
            .map_err(|e| SimulatorError::EtaSourceError {
                description: format!("could not read {}: {}", path.display(), e),
            })?;
        Self::from_responses(responses, vehicle_number)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[async_trait]
impl EtaSource for RecordedEtaSource {
    async fn fetch_etas(&self, route_code: &str) -> Result<Vec<EtaSnapshot>, SimulatorError> {
        let index = self
            .cursor
            .fetch_add(1, Ordering::Relaxed)
            .min(self.responses.len() - 1);
        debug!(
            "Serving recorded ETA response {} of {} for route {}",
            index + 1,
            self.responses.len(),
            route_code
        );
        Ok(parse_track_vehicles(
            &self.responses[index],
            &self.vehicle_number,
        ))
    }
}

/// Never reports any ETA.
#[derive(Default)]
pub struct StaticEtaSource;

#[async_trait]
impl EtaSource for StaticEtaSource {
    async fn fetch_etas(&self, _route_code: &str) -> Result<Vec<EtaSnapshot>, SimulatorError> {
        Ok(Vec::new())
    }
}
