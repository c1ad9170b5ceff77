use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    sync::{
        Mutex,
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

use async_trait::async_trait;
use log::{error, info};
use serde_jsonlines::JsonLinesWriter;

use super::{PositionReport, PositionSink};
use crate::SimulatorError;
use crate::config::SimulatorConfig;
use crate::geo::meters_per_second_to_kph;

/// Logs every report at info level, tagged with the driver and merchant it is sent for.
/// Used when no output file is given.
pub struct LoggingSink {
    driver_id: String,
    merchant_id: String,
}

impl LoggingSink {
    pub fn new(driver_id: impl Into<String>, merchant_id: impl Into<String>) -> Self {
        Self {
            driver_id: driver_id.into(),
            merchant_id: merchant_id.into(),
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::new(config.driver_id.clone(), config.merchant_id.clone())
    }

    pub fn describe(&self, report: &PositionReport) -> String {
        format!(
            "Driver {} ({}) at {:.6}, {:.6} on {} ({:.1} km/h)",
            self.driver_id,
            self.merchant_id,
            report.coordinate.lat,
            report.coordinate.lon,
            report.timestamp.to_rfc3339(),
            meters_per_second_to_kph(report.speed_mps)
        )
    }
}

impl Default for LoggingSink {
    fn default() -> Self {
        Self::from_config(&SimulatorConfig::default())
    }
}

#[async_trait]
impl PositionSink for LoggingSink {
    async fn report(&self, report: PositionReport) -> Result<(), SimulatorError> {
        info!("{}", self.describe(&report));
        Ok(())
    }
}

/// Appends reports to a JSON lines file from a dedicated writer thread.
pub struct JsonLinesSink {
    sender: Mutex<Option<Sender<PositionReport>>>,
    writer: Mutex<Option<JoinHandle<Result<(), SimulatorError>>>>,
}

impl JsonLinesSink {
    /// Creates (truncating) the output file and starts the writer thread.
    pub fn create(path: &Path) -> Result<Self, SimulatorError> {
        let file = File::create(path).map_err(|e| SimulatorError::WriterError { source: e })?;
        let (sender, receiver) = mpsc::channel();
        let writer = thread::spawn(move || write_reports(file, receiver));
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Stops accepting reports and waits for the writer to flush everything queued so far.
    pub fn close(&self) -> Result<(), SimulatorError> {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handle = match self.writer.lock() {
            Ok(mut writer) => writer.take(),
            Err(_) => None,
        };
        match handle {
            Some(handle) => handle.join().map_err(|_| SimulatorError::ExternalReportFailure {
                description: "report writer thread panicked".to_string(),
            })?,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PositionSink for JsonLinesSink {
    async fn report(&self, report: PositionReport) -> Result<(), SimulatorError> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| SimulatorError::ExternalReportFailure {
                description: "report channel poisoned".to_string(),
            })?;
        let Some(sender) = sender.as_ref() else {
            return Err(SimulatorError::ExternalReportFailure {
                description: "report file already closed".to_string(),
            });
        };
        sender
            .send(report)
            .map_err(|e| SimulatorError::ExternalReportFailure {
                description: format!("report writer stopped: {}", e),
            })
    }
}

/// Drains `receiver` into `file`, one JSON object per line, until every sender is dropped.
///
/// A line that fails to write is logged and skipped; the final flush error is returned.
pub fn write_reports(
    file: File,
    receiver: Receiver<PositionReport>,
) -> Result<(), SimulatorError> {
    let mut writer = JsonLinesWriter::new(BufWriter::new(file));
    for report in &receiver {
        if let Err(e) = writer.write(&report) {
            error!("Error while writing position report to output file: {}", e);
        }
    }
    writer
        .flush()
        .map_err(|e| SimulatorError::WriterError { source: e })
}
