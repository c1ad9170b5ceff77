use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::SimulatorError;

/// A timer fire. Ticks carry the generation of the timer that produced them so that ticks
/// queued before a stop or reschedule can be told apart from live ones.
#[derive(Clone, Copy, Debug)]
pub struct Tick {
    pub generation: u64,
    pub fired_at: Instant,
}

/// Repeating timer firing every `base_interval / speed_multiplier`.
///
/// Ticks are delivered on a channel and handled by a single consumer, so two ticks never
/// run at the same time. Must be started from within a tokio runtime.
pub struct TickScheduler {
    base_interval: Duration,
    speed_multiplier: u32,
    generation: u64,
    task: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Tick>,
}

impl TickScheduler {
    pub fn new(base_interval: Duration) -> (Self, mpsc::UnboundedReceiver<Tick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                base_interval,
                speed_multiplier: 1,
                generation: 0,
                task: None,
                tx,
            },
            rx,
        )
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn speed_multiplier(&self) -> u32 {
        self.speed_multiplier
    }

    pub fn interval(&self) -> Duration {
        self.base_interval / self.speed_multiplier
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// False for ticks from a cancelled timer, or any tick while stopped.
    pub fn is_current(&self, tick: &Tick) -> bool {
        self.is_running() && tick.generation == self.generation
    }

    pub fn start(&mut self) -> Result<(), SimulatorError> {
        if self.is_running() {
            warn!("Tick scheduler already running, ignoring start");
            return Err(SimulatorError::SchedulerAlreadyRunning);
        }
        check_period(self.base_interval, self.speed_multiplier)?;
        self.spawn();
        Ok(())
    }

    /// Cancels the timer. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.generation += 1;
            debug!("Tick scheduler stopped");
        }
    }

    /// Changes the rate. A running timer is cancelled and rescheduled, so the new interval
    /// applies from the next tick on.
    pub fn set_speed_multiplier(&mut self, multiplier: u32) -> Result<(), SimulatorError> {
        check_period(self.base_interval, multiplier)?;
        self.speed_multiplier = multiplier;
        if self.is_running() {
            self.stop();
            self.spawn();
        }
        Ok(())
    }

    fn spawn(&mut self) {
        let period = self.interval();
        let generation = self.generation;
        let tx = self.tx.clone();
        debug!(
            "Tick scheduler starting: every {:?} (generation {})",
            period, generation
        );
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let fired_at = ticker.tick().await;
                if tx
                    .send(Tick {
                        generation,
                        fired_at,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }));
    }
}

/// Rejects multipliers that are zero or that shrink the tick period to nothing.
pub fn check_period(base_interval: Duration, multiplier: u32) -> Result<(), SimulatorError> {
    let invalid = |reason: String| SimulatorError::InvalidUserInput {
        field: "speed_multiplier".to_string(),
        reason,
    };
    if multiplier == 0 {
        return Err(invalid("must be at least 1".to_string()));
    }
    if (base_interval / multiplier).is_zero() {
        return Err(invalid(format!(
            "{}x leaves no time between ticks of a {:?} interval",
            multiplier, base_interval
        )));
    }
    Ok(())
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
