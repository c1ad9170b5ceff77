use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::SimulatorError;
use crate::config::SimulatorConfig;
use crate::eta::{BoardEntry, EtaChangeTracker, EtaSnapshot, EtaSummary, StopBoard};
use crate::external::{EtaSource, PositionReport, PositionSink};
use crate::provider::{PositionProvider, PositionUpdate, SimulationMode};
use crate::route::Stop;
use crate::scheduler::{Tick, TickScheduler};

/// Why [`SimulationSession::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    PlaybackComplete,
    TickLimit,
    Interrupted,
}

/// ETA change summary of one stop, for presentation at the end of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct StopSummary {
    pub stop_key: String,
    pub name: String,
    pub last_known_eta: Option<DateTime<Utc>>,
    pub summary: EtaSummary,
}

struct EtaResponse {
    observed_at: DateTime<Utc>,
    result: Result<Vec<EtaSnapshot>, SimulatorError>,
}

/// One simulated vehicle: its position source, tick timer, boundaries and ETA history.
///
/// All state is mutated from the task that owns the session. Position reports and ETA
/// fetches run as spawned tasks; ETA responses come back through [`SimulationSession::run`]
/// (or [`SimulationSession::settle`]) and are applied in the order they complete.
pub struct SimulationSession {
    config: SimulatorConfig,
    provider: PositionProvider,
    tracker: EtaChangeTracker,
    scheduler: TickScheduler,
    ticks: mpsc::UnboundedReceiver<Tick>,
    sink: Arc<dyn PositionSink>,
    eta_source: Arc<dyn EtaSource>,
    eta_requests: JoinSet<EtaResponse>,
    reports: JoinSet<()>,
    stops: Vec<Stop>,
    stop_names: HashMap<String, String>,
    board: StopBoard,
    last_position: Option<PositionUpdate>,
    tick_count: u64,
}

impl SimulationSession {
    pub fn new(
        config: SimulatorConfig,
        provider: PositionProvider,
        sink: Arc<dyn PositionSink>,
        eta_source: Arc<dyn EtaSource>,
    ) -> Result<Self, SimulatorError> {
        config.validate()?;
        let offset = config
            .eta_offset()
            .ok_or_else(|| SimulatorError::InvalidUserInput {
                field: "eta_utc_offset_minutes".to_string(),
                reason: "must be within +/- 24 hours".to_string(),
            })?;
        let (mut scheduler, ticks) = TickScheduler::new(provider.mode().base_interval(&config));
        scheduler.set_speed_multiplier(config.speed_multiplier)?;

        Ok(Self {
            config,
            provider,
            tracker: EtaChangeTracker::new(offset),
            scheduler,
            ticks,
            sink,
            eta_source,
            eta_requests: JoinSet::new(),
            reports: JoinSet::new(),
            stops: Vec::new(),
            stop_names: HashMap::new(),
            board: StopBoard::default(),
            last_position: None,
            tick_count: 0,
        })
    }

    /// Stops loaded alongside the route, used to name and order the summaries.
    pub fn with_stops(mut self, stops: Vec<Stop>) -> Self {
        self.stop_names = stops
            .iter()
            .map(|stop| (stop.stop_key(), stop.name.clone()))
            .collect();
        self.stops = stops;
        self
    }

    pub fn mode(&self) -> SimulationMode {
        self.provider.mode()
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn provider(&self) -> &PositionProvider {
        &self.provider
    }

    pub fn tracker(&self) -> &EtaChangeTracker {
        &self.tracker
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn board(&self) -> &StopBoard {
        &self.board
    }

    /// First upcoming stop of the latest ETA response.
    pub fn next_stop(&self) -> Option<&BoardEntry> {
        self.board.next_stop()
    }

    pub fn last_position(&self) -> Option<&PositionUpdate> {
        self.last_position.as_ref()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn interval(&self) -> Duration {
        self.scheduler.interval()
    }

    pub fn start(&mut self) -> Result<(), SimulatorError> {
        self.scheduler.start()?;
        info!(
            "Simulation started: {:?} mode, ticking every {:?}",
            self.mode(),
            self.interval()
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.scheduler.is_running() {
            info!("Simulation stopped after {} ticks", self.tick_count);
        }
        self.scheduler.stop();
    }

    /// Stops ticking, rewinds the position source and forgets every ETA seen so far.
    /// ETA requests still in flight are cancelled.
    pub fn reset(&mut self) {
        self.scheduler.stop();
        self.provider.reset();
        self.tracker.clear();
        self.eta_requests.abort_all();
        self.eta_requests.detach_all();
        self.board = StopBoard::default();
        self.last_position = None;
        self.tick_count = 0;
        info!("Simulation reset");
    }

    pub fn set_speed_multiplier(&mut self, multiplier: u32) -> Result<(), SimulatorError> {
        self.scheduler.set_speed_multiplier(multiplier)?;
        self.config.speed_multiplier = multiplier;
        debug!("Speed multiplier set to {}x", multiplier);
        Ok(())
    }

    /// Advances the position source by one step, reports the position and requests fresh
    /// ETAs. Neither external call is awaited.
    ///
    /// At the end of a recording the scheduler is stopped and
    /// [`SimulatorError::PlaybackComplete`] is returned.
    pub fn tick(&mut self) -> Result<PositionUpdate, SimulatorError> {
        let update = match self.provider.next_position() {
            Ok(update) => update,
            Err(e) => {
                if e.is_playback_complete() {
                    info!("Playback complete after {} ticks", self.tick_count);
                    self.scheduler.stop();
                }
                return Err(e);
            }
        };
        self.tick_count += 1;
        debug!(
            "Tick {}: {:.6}, {:.6} heading {:?} at {:.2} m/s",
            self.tick_count,
            update.coordinate.lat,
            update.coordinate.lon,
            update.heading_deg,
            update.speed_mps
        );

        self.report(&update);
        self.request_etas();
        self.last_position = Some(update.clone());
        Ok(update)
    }

    /// Scrubs a recording to sample `index` and reports that sample straight away. The next
    /// tick continues from there.
    pub fn seek(&mut self, index: usize) -> Result<PositionUpdate, SimulatorError> {
        let update = self.provider.seek(index)?;
        debug!("Seeked to sample {}", index);
        self.report(&update);
        self.last_position = Some(update.clone());
        Ok(update)
    }

    /// Feeds one ETA response through the change tracker and rebuilds the stop board.
    pub fn observe_snapshots(
        &mut self,
        snapshots: &[EtaSnapshot],
        observed_at: DateTime<Utc>,
    ) -> &StopBoard {
        for snapshot in snapshots {
            if let Some(name) = &snapshot.stop_name {
                self.stop_names
                    .entry(snapshot.stop_key.clone())
                    .or_insert_with(|| name.clone());
            }
        }
        let observations = snapshots
            .iter()
            .map(|snapshot| self.tracker.observe(snapshot, observed_at))
            .collect::<Vec<_>>();
        self.board = StopBoard::from_observations(
            snapshots.iter().zip(observations.iter()),
            &self.tracker.offset(),
        );
        if let Some(next) = self.board.next_stop() {
            debug!("Next stop: {}", next);
        }
        &self.board
    }

    /// Per-stop change summaries. Known route stops come first in route order, stops only
    /// seen in ETA responses follow by name.
    pub fn stop_summaries(&self) -> Vec<StopSummary> {
        let sequence: HashMap<String, usize> = self
            .stops
            .iter()
            .map(|stop| (stop.stop_key(), stop.sequence_index))
            .collect();
        self.tracker
            .histories()
            .iter()
            .map(|(stop_key, history)| StopSummary {
                stop_key: stop_key.clone(),
                name: self
                    .stop_names
                    .get(stop_key)
                    .cloned()
                    .unwrap_or_else(|| stop_key.clone()),
                last_known_eta: history.last_known_eta,
                summary: self.tracker.summarize(stop_key),
            })
            .sorted_by(|a, b| {
                let a_seq = sequence.get(&a.stop_key).copied().unwrap_or(usize::MAX);
                let b_seq = sequence.get(&b.stop_key).copied().unwrap_or(usize::MAX);
                a_seq.cmp(&b_seq).then_with(|| a.name.cmp(&b.name))
            })
            .collect()
    }

    /// Waits for every outstanding report and ETA request, applying the responses.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.eta_requests.join_next().await {
            if let Ok(response) = joined {
                self.apply_eta_response(response);
            }
        }
        while self.reports.join_next().await.is_some() {}
    }

    /// Ticks until the recording ends or `max_ticks` have run.
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<RunOutcome, SimulatorError> {
        self.run_until(max_ticks, std::future::pending()).await
    }

    /// Like [`SimulationSession::run`], also returning once `shutdown` completes. The
    /// scheduler is stopped whenever this returns.
    pub async fn run_until(
        &mut self,
        max_ticks: Option<u64>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunOutcome, SimulatorError> {
        if !self.is_running() {
            self.start()?;
        }
        let mut ticks_run = 0u64;
        tokio::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(RunOutcome::Interrupted),
                Some(tick) = self.ticks.recv() => {
                    if !self.scheduler.is_current(&tick) {
                        continue;
                    }
                    match self.tick() {
                        Ok(_) => {
                            ticks_run += 1;
                            if max_ticks.is_some_and(|max| ticks_run >= max) {
                                break Ok(RunOutcome::TickLimit);
                            }
                        }
                        Err(e) if e.is_playback_complete() => {
                            break Ok(RunOutcome::PlaybackComplete);
                        }
                        Err(e) => break Err(e),
                    }
                }
                Some(joined) = self.eta_requests.join_next() => {
                    if let Ok(response) = joined {
                        self.apply_eta_response(response);
                    }
                }
                Some(_) = self.reports.join_next() => {}
            }
        };
        self.stop();
        outcome
    }

    fn report(&mut self, update: &PositionUpdate) {
        let report = PositionReport::new(update.coordinate, Utc::now(), update.speed_mps);
        let sink = Arc::clone(&self.sink);
        self.reports.spawn(async move {
            if let Err(e) = sink.report(report).await {
                warn!("Position report failed: {}", e);
            }
        });
    }

    fn request_etas(&mut self) {
        let source = Arc::clone(&self.eta_source);
        let route_code = self.config.route_code.clone();
        self.eta_requests.spawn(async move {
            let result = source.fetch_etas(&route_code).await;
            EtaResponse {
                observed_at: Utc::now(),
                result,
            }
        });
    }

    fn apply_eta_response(&mut self, response: EtaResponse) {
        match response.result {
            Ok(snapshots) => {
                self.observe_snapshots(&snapshots, response.observed_at);
            }
            Err(e) => warn!("ETA request failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eta::EtaStatus;
    use crate::external::StaticEtaSource;
    use crate::geo::Coordinate;
    use crate::playback::WaypointPlayer;
    use crate::playback::tests::sample;
    use crate::route::{Route, WrapPolicy};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<PositionReport>>,
    }

    #[async_trait]
    impl PositionSink for RecordingSink {
        async fn report(&self, report: PositionReport) -> Result<(), SimulatorError> {
            self.reports.lock().unwrap().push(report);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl PositionSink for FailingSink {
        async fn report(&self, _report: PositionReport) -> Result<(), SimulatorError> {
            Err(SimulatorError::ExternalReportFailure {
                description: "offline".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FailingEtaSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EtaSource for FailingEtaSource {
        async fn fetch_etas(&self, _route_code: &str) -> Result<Vec<EtaSnapshot>, SimulatorError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(SimulatorError::EtaSourceError {
                description: "service unavailable".to_string(),
            })
        }
    }

    /// Serves one scripted response per call, then nothing.
    struct ScriptedEtaSource {
        responses: Mutex<Vec<Vec<EtaSnapshot>>>,
    }

    impl ScriptedEtaSource {
        fn new(mut responses: Vec<Vec<EtaSnapshot>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl EtaSource for ScriptedEtaSource {
        async fn fetch_etas(&self, _route_code: &str) -> Result<Vec<EtaSnapshot>, SimulatorError> {
            Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
        }
    }

    fn snapshot(minute: u32) -> EtaSnapshot {
        EtaSnapshot {
            stop_key: "22.58-88.33".to_string(),
            stop_name: Some("Esplanade".to_string()),
            eta: Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap(),
            delta_seconds: 0.0,
            status: EtaStatus::Upcoming,
        }
    }

    fn route_session(
        sink: Arc<dyn PositionSink>,
        source: Arc<dyn EtaSource>,
    ) -> SimulationSession {
        let route = Route::new(vec![
            Coordinate { lat: 0.0, lon: 0.0 },
            Coordinate { lat: 0.0, lon: 1.0 },
        ])
        .unwrap();
        let config = SimulatorConfig::default();
        let provider = PositionProvider::route(route, WrapPolicy::Loop, 100.0, 1.0);
        SimulationSession::new(config, provider, sink, source).unwrap()
    }

    fn playback_session(sink: Arc<dyn PositionSink>) -> SimulationSession {
        let player = WaypointPlayer::new(vec![
            sample(4, 22.52, 88.30),
            sample(0, 22.50, 88.30),
            sample(2, 22.51, 88.30),
        ])
        .unwrap();
        SimulationSession::new(
            SimulatorConfig::default(),
            PositionProvider::playback(player),
            sink,
            Arc::new(StaticEtaSource),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_tick_reports_position_and_tracks_etas() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(ScriptedEtaSource::new(vec![
            vec![snapshot(0)],
            vec![snapshot(5)],
            vec![snapshot(5)],
        ]));
        let mut session = route_session(sink.clone(), source);

        for _ in 0..3 {
            session.tick().unwrap();
            session.settle().await;
        }

        assert_eq!(sink.reports.lock().unwrap().len(), 3);
        let history = session.tracker().history("22.58-88.33").unwrap();
        assert_eq!(history.significant_change_count, 1);
        assert_eq!(history.transitions[0].delta_minutes, 5);
        assert_eq!(session.next_stop().unwrap().name, "Esplanade");
        assert_eq!(session.tick_count(), 3);
    }

    #[tokio::test]
    async fn test_reset_clears_history_and_traversal() {
        let source = Arc::new(ScriptedEtaSource::new(vec![
            vec![snapshot(0)],
            vec![snapshot(5)],
            vec![snapshot(9)],
        ]));
        let mut session = route_session(Arc::new(RecordingSink::default()), source);
        session.tick().unwrap();
        session.tick().unwrap();
        session.settle().await;
        assert!(!session.tracker().is_empty());

        session.reset();
        assert!(session.tracker().is_empty());
        assert!(session.board().is_empty());
        assert_eq!(session.tick_count(), 0);
        let state = session.provider().route_interpolator().unwrap().state();
        assert_eq!(state.distance_covered_m, 0.0);
        assert_eq!(state.segment_index, 0);

        // first observation after reset records no transition
        session.tick().unwrap();
        session.settle().await;
        let history = session.tracker().history("22.58-88.33").unwrap();
        assert_eq!(history.significant_change_count, 0);
        assert!(history.transitions.is_empty());
    }

    #[tokio::test]
    async fn test_report_failures_do_not_stop_ticking() {
        let mut session = route_session(Arc::new(FailingSink), Arc::new(StaticEtaSource));
        session.tick().unwrap();
        session.settle().await;
        session.tick().unwrap();
        session.settle().await;
        assert_eq!(session.tick_count(), 2);
    }

    #[tokio::test]
    async fn test_seek_reports_immediately_in_playback() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = playback_session(sink.clone());

        let update = session.seek(2).unwrap();
        assert_eq!(update.sample_index, Some(2));
        assert_eq!(update.heading_deg, None);
        session.settle().await;
        assert_eq!(sink.reports.lock().unwrap().len(), 1);

        assert!(matches!(
            session.seek(3),
            Err(SimulatorError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[tokio::test]
    async fn test_seek_fails_in_route_mode() {
        let mut session = route_session(
            Arc::new(RecordingSink::default()),
            Arc::new(StaticEtaSource),
        );
        assert!(matches!(
            session.seek(0),
            Err(SimulatorError::InvalidUserInput { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_cleanly_at_end_of_playback() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = playback_session(sink.clone());

        let outcome = session.run(None).await.unwrap();
        assert_eq!(outcome, RunOutcome::PlaybackComplete);
        assert!(!session.is_running());
        assert_eq!(session.tick_count(), 3);

        session.settle().await;
        let reports = sink.reports.lock().unwrap();
        let lats: Vec<f64> = reports.iter().map(|r| r.coordinate.lat).collect();
        assert_eq!(lats, vec![22.50, 22.51, 22.52]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_honours_tick_limit() {
        let mut session = route_session(
            Arc::new(RecordingSink::default()),
            Arc::new(StaticEtaSource),
        );
        let outcome = session.run(Some(5)).await.unwrap();
        assert_eq!(outcome, RunOutcome::TickLimit);
        assert_eq!(session.tick_count(), 5);
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let mut session = route_session(
            Arc::new(RecordingSink::default()),
            Arc::new(StaticEtaSource),
        );
        let shutdown = tokio::time::sleep(Duration::from_millis(350));
        let outcome = session.run_until(None, shutdown).await.unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(session.tick_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eta_failures_are_swallowed_and_ticking_continues() {
        let source = Arc::new(FailingEtaSource::default());
        let mut session = route_session(Arc::new(RecordingSink::default()), source.clone());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        session.observe_snapshots(&[snapshot(0)], now);
        let board_before = session.board().clone();
        let history_before = session.tracker().history("22.58-88.33").cloned();

        let outcome = session.run(Some(4)).await.unwrap();
        session.settle().await;

        assert_eq!(outcome, RunOutcome::TickLimit);
        assert_eq!(session.tick_count(), 4);
        assert_eq!(source.calls.load(Ordering::Relaxed), 4);
        assert_eq!(session.board(), &board_before);
        assert_eq!(
            session.tracker().history("22.58-88.33").cloned(),
            history_before
        );
        assert_eq!(session.tracker().histories().len(), 1);
    }

    #[tokio::test]
    async fn test_multiplier_leaving_no_interval_is_rejected() {
        let mut session = route_session(
            Arc::new(RecordingSink::default()),
            Arc::new(StaticEtaSource),
        );
        assert!(matches!(
            session.set_speed_multiplier(200_000_000),
            Err(SimulatorError::InvalidUserInput { .. })
        ));
        assert_eq!(session.interval(), Duration::from_millis(100));
        assert_eq!(session.config().speed_multiplier, 1);

        let config = SimulatorConfig {
            speed_multiplier: 200_000_000,
            ..Default::default()
        };
        let route = Route::new(vec![
            Coordinate { lat: 0.0, lon: 0.0 },
            Coordinate { lat: 0.0, lon: 1.0 },
        ])
        .unwrap();
        let provider = PositionProvider::route_from_config(route, &config);
        let result = SimulationSession::new(
            config,
            provider,
            Arc::new(RecordingSink::default()),
            Arc::new(StaticEtaSource),
        );
        assert!(matches!(
            result,
            Err(SimulatorError::InvalidUserInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_speed_multiplier_changes_interval() {
        let mut session = route_session(
            Arc::new(RecordingSink::default()),
            Arc::new(StaticEtaSource),
        );
        assert_eq!(session.interval(), Duration::from_millis(100));
        session.set_speed_multiplier(4).unwrap();
        assert_eq!(session.interval(), Duration::from_millis(25));
        assert_eq!(session.config().speed_multiplier, 4);
        assert!(session.set_speed_multiplier(0).is_err());
    }

    #[tokio::test]
    async fn test_summaries_named_from_snapshots() {
        let mut session = route_session(
            Arc::new(RecordingSink::default()),
            Arc::new(StaticEtaSource),
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        session.observe_snapshots(&[snapshot(0)], now);
        session.observe_snapshots(&[snapshot(3)], now);
        session.observe_snapshots(&[snapshot(1)], now);

        let summaries = session.stop_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "Esplanade");
        assert_eq!(
            summaries[0].summary,
            EtaSummary {
                total: 2,
                delays: 1,
                earlier: 1
            }
        );
    }
}
