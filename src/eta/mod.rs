pub mod board;
pub mod response;

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub use board::{BoardEntry, StopBoard};
pub use response::parse_track_vehicles;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EtaStatus {
    Upcoming,
    Reached,
}

/// One externally computed arrival estimate for a stop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EtaSnapshot {
    /// Stable identity of the stop across snapshots, derived from its coordinate
    pub stop_key: String,
    pub stop_name: Option<String>,
    pub eta: DateTime<Utc>,
    /// Correction the service applies on top of `eta`
    pub delta_seconds: f64,
    pub status: EtaStatus,
}

impl EtaSnapshot {
    /// `eta + delta_seconds`, at millisecond precision.
    pub fn final_eta(&self) -> DateTime<Utc> {
        let delta_ms = if self.delta_seconds.is_finite() {
            (self.delta_seconds * 1000.0).round() as i64
        } else {
            0
        };
        self.eta + Duration::milliseconds(delta_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EtaTransition {
    pub previous_eta: DateTime<Utc>,
    pub new_eta: DateTime<Utc>,
    /// Positive when the vehicle is now expected later, negative when earlier
    pub delta_minutes: i64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EtaHistory {
    pub last_known_eta: Option<DateTime<Utc>>,
    pub significant_change_count: usize,
    pub transitions: Vec<EtaTransition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtaSummary {
    pub total: usize,
    pub delays: usize,
    pub earlier: usize,
}

/// What a single [`EtaChangeTracker::observe`] call saw.
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// Terminal arrival time; never counted as a change.
    Reached {
        stop_key: String,
        arrived_at: DateTime<Utc>,
    },
    Upcoming {
        stop_key: String,
        eta: DateTime<Utc>,
        /// Set when this observation crossed a minute boundary
        change: Option<EtaTransition>,
        significant_change_count: usize,
    },
}

impl Observation {
    pub fn stop_key(&self) -> &str {
        match self {
            Observation::Reached { stop_key, .. } | Observation::Upcoming { stop_key, .. } => {
                stop_key
            }
        }
    }
}

/// Turns the stream of ETA snapshots into a per-stop history of significant revisions.
///
/// ETAs are compared by wall-clock minute-of-day in `offset`, ignoring the date. A revision
/// that crosses midnight therefore reports a delta of roughly -1440 minutes; this is a known
/// limitation and left as is.
///
/// Responses are applied in arrival order. An out-of-order response can log a spurious
/// transition.
pub struct EtaChangeTracker {
    histories: HashMap<String, EtaHistory>,
    offset: FixedOffset,
}

impl Default for EtaChangeTracker {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl EtaChangeTracker {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            histories: HashMap::new(),
            offset,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn observe(&mut self, snapshot: &EtaSnapshot, observed_at: DateTime<Utc>) -> Observation {
        let final_eta = snapshot.final_eta();
        if snapshot.status == EtaStatus::Reached {
            return Observation::Reached {
                stop_key: snapshot.stop_key.clone(),
                arrived_at: final_eta,
            };
        }

        let history = self.histories.entry(snapshot.stop_key.clone()).or_default();
        let Some(previous_eta) = history.last_known_eta else {
            debug!("First ETA for {}: {}", snapshot.stop_key, final_eta);
            history.last_known_eta = Some(final_eta);
            return Observation::Upcoming {
                stop_key: snapshot.stop_key.clone(),
                eta: final_eta,
                change: None,
                significant_change_count: 0,
            };
        };

        let delta_minutes =
            minute_of_day(&final_eta, &self.offset) - minute_of_day(&previous_eta, &self.offset);
        // sub-minute drift keeps the original estimate
        if delta_minutes == 0 {
            return Observation::Upcoming {
                stop_key: snapshot.stop_key.clone(),
                eta: final_eta,
                change: None,
                significant_change_count: history.significant_change_count,
            };
        }

        let transition = EtaTransition {
            previous_eta,
            new_eta: final_eta,
            delta_minutes,
            observed_at,
        };
        info!(
            "ETA for {} moved {:+} min ({} -> {})",
            snapshot
                .stop_name
                .as_deref()
                .unwrap_or(snapshot.stop_key.as_str()),
            delta_minutes,
            format_clock_time(&previous_eta, &self.offset),
            format_clock_time(&final_eta, &self.offset),
        );
        history.transitions.push(transition.clone());
        history.significant_change_count += 1;
        history.last_known_eta = Some(final_eta);

        Observation::Upcoming {
            stop_key: snapshot.stop_key.clone(),
            eta: final_eta,
            change: Some(transition),
            significant_change_count: history.significant_change_count,
        }
    }

    pub fn history(&self, stop_key: &str) -> Option<&EtaHistory> {
        self.histories.get(stop_key)
    }

    pub fn histories(&self) -> &HashMap<String, EtaHistory> {
        &self.histories
    }

    /// Transition counts for a stop; all zero for a stop never seen.
    pub fn summarize(&self, stop_key: &str) -> EtaSummary {
        let Some(history) = self.histories.get(stop_key) else {
            return EtaSummary::default();
        };
        EtaSummary {
            total: history.transitions.len(),
            delays: history
                .transitions
                .iter()
                .filter(|t| t.delta_minutes > 0)
                .count(),
            earlier: history
                .transitions
                .iter()
                .filter(|t| t.delta_minutes < 0)
                .count(),
        }
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

fn minute_of_day(time: &DateTime<Utc>, offset: &FixedOffset) -> i64 {
    let local = time.with_timezone(offset);
    i64::from(local.hour()) * 60 + i64::from(local.minute())
}

/// `h:mm AM/PM` in the given offset, e.g. `9:05 AM`.
pub fn format_clock_time(time: &DateTime<Utc>, offset: &FixedOffset) -> String {
    time.with_timezone(offset).format("%-I:%M %p").to_string()
}
