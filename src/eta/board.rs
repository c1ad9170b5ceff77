use std::fmt;

use chrono::FixedOffset;

use super::{EtaSnapshot, Observation, format_clock_time};

/// One line of the stop board.
#[derive(Clone, Debug, PartialEq)]
pub struct BoardEntry {
    pub stop_key: String,
    pub name: String,
    /// `h:mm AM/PM`
    pub time: String,
    pub reached: bool,
    /// Number of significant ETA changes so far, 0 for reached stops
    pub change_count: usize,
    /// Minutes the ETA moved on this update, if it moved
    pub last_change_minutes: Option<i64>,
}

impl fmt::Display for BoardEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reached {
            return write!(f, "{}: reached at {}", self.name, self.time);
        }
        write!(f, "{}: ETA {}", self.name, self.time)?;
        if let Some(minutes) = self.last_change_minutes {
            let arrow = if minutes > 0 { "later" } else { "earlier" };
            write!(f, " ({} min {})", minutes.abs(), arrow)?;
        }
        if self.change_count > 0 {
            let plural = if self.change_count == 1 { "" } else { "s" };
            write!(f, " [updated {} time{}]", self.change_count, plural)?;
        }
        Ok(())
    }
}

/// Latest ETA response split into reached and upcoming stops, in response order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StopBoard {
    pub reached: Vec<BoardEntry>,
    pub upcoming: Vec<BoardEntry>,
}

impl StopBoard {
    pub fn from_observations<'a>(
        observations: impl IntoIterator<Item = (&'a EtaSnapshot, &'a Observation)>,
        offset: &FixedOffset,
    ) -> Self {
        let mut board = StopBoard::default();
        for (snapshot, observation) in observations {
            let name = snapshot
                .stop_name
                .clone()
                .unwrap_or_else(|| snapshot.stop_key.clone());
            match observation {
                Observation::Reached {
                    stop_key,
                    arrived_at,
                } => board.reached.push(BoardEntry {
                    stop_key: stop_key.clone(),
                    name,
                    time: format_clock_time(arrived_at, offset),
                    reached: true,
                    change_count: 0,
                    last_change_minutes: None,
                }),
                Observation::Upcoming {
                    stop_key,
                    eta,
                    change,
                    significant_change_count,
                } => board.upcoming.push(BoardEntry {
                    stop_key: stop_key.clone(),
                    name,
                    time: format_clock_time(eta, offset),
                    reached: false,
                    change_count: *significant_change_count,
                    last_change_minutes: change.as_ref().map(|c| c.delta_minutes),
                }),
            }
        }
        board
    }

    /// First stop still ahead of the vehicle.
    pub fn next_stop(&self) -> Option<&BoardEntry> {
        self.upcoming.first()
    }

    pub fn is_empty(&self) -> bool {
        self.reached.is_empty() && self.upcoming.is_empty()
    }
}
