// Integration tests running whole sessions against the files in sample_data/
//
// 1. Load a route (GeoJSON) or a recorded trip (CSV)
// 2. Replay recorded trackVehicles responses as the ETA source
// 3. Run the session on a paused tokio clock
// 4. Check reported positions, ETA histories and the stop board

use std::path::PathBuf;
use std::sync::Arc;

use eta_simulator::external::{JsonLinesSink, PositionReport, RecordedEtaSource};
use eta_simulator::playback::load_waypoints_csv;
use eta_simulator::route::load_route_geojson;
use eta_simulator::{PositionProvider, RunOutcome, SimulationSession, SimulatorConfig};

fn sample_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("sample_data")
        .join(name)
}

fn recorded_etas() -> Arc<RecordedEtaSource> {
    Arc::new(
        RecordedEtaSource::from_file(&sample_file("track_vehicles.jsonl"), "WB052366")
            .expect("Failed to load recorded ETA responses"),
    )
}

#[tokio::test(start_paused = true)]
async fn test_playback_session_replays_trip_and_tracks_etas() {
    let output_dir = tempfile::tempdir().unwrap();
    let output = output_dir.path().join("positions.jsonl");
    let sink = Arc::new(JsonLinesSink::create(&output).unwrap());

    let player = load_waypoints_csv(&sample_file("trip.csv")).expect("Failed to load trip");
    assert_eq!(player.ride_id(), "ride-42");
    let mut session = SimulationSession::new(
        SimulatorConfig::default(),
        PositionProvider::playback(player),
        sink.clone(),
        recorded_etas(),
    )
    .unwrap();

    let outcome = session.run(None).await.unwrap();
    session.settle().await;
    sink.close().unwrap();

    assert_eq!(outcome, RunOutcome::PlaybackComplete);
    assert_eq!(session.tick_count(), 5);

    // reports come out in timestamp order, not file order
    let reports = serde_jsonlines::json_lines(&output)
        .unwrap()
        .collect::<Result<Vec<PositionReport>, _>>()
        .unwrap();
    let lats: Vec<f64> = reports.iter().map(|r| r.coordinate.lat).collect();
    assert_eq!(lats, vec![22.5666, 22.5689, 22.5712, 22.5735, 22.5741]);
    assert!(reports.iter().all(|r| r.accuracy_m == 0.0));
    assert_eq!(reports[1].speed_mps, 8.5);

    // Howrah is only ever reported as reached, so it has no history
    let tracker = session.tracker();
    assert!(tracker.history("22.5666-88.31397").is_none());

    let burrabazar = tracker.history("22.5735-88.3412").unwrap();
    assert_eq!(burrabazar.significant_change_count, 1);
    assert_eq!(burrabazar.transitions[0].delta_minutes, 2);

    let esplanade = tracker.summarize("22.5726-88.3639");
    assert_eq!(
        (esplanade.total, esplanade.delays, esplanade.earlier),
        (2, 1, 1)
    );

    let board = session.board();
    assert_eq!(board.reached.len(), 2);
    assert_eq!(
        board.next_stop().unwrap().to_string(),
        "Esplanade: ETA 10:13 AM [updated 2 times]"
    );
}

#[tokio::test(start_paused = true)]
async fn test_route_session_follows_geojson_route() {
    let (route, stops) = load_route_geojson(&sample_file("route.geojson")).unwrap();
    assert_eq!(stops.len(), 3);
    assert_eq!(stops[2].name, "Esplanade");

    let config = SimulatorConfig {
        speed_multiplier: 10,
        ..Default::default()
    };
    let provider = PositionProvider::route_from_config(route, &config);
    let mut session = SimulationSession::new(
        config,
        provider,
        Arc::new(eta_simulator::external::LoggingSink::default()),
        recorded_etas(),
    )
    .unwrap()
    .with_stops(stops);
    assert_eq!(session.interval(), std::time::Duration::from_millis(10));

    let outcome = session.run(Some(30)).await.unwrap();
    session.settle().await;
    assert_eq!(outcome, RunOutcome::TickLimit);

    // 30 ticks at 120 km/h, 0.1 s each
    let covered = session
        .provider()
        .route_interpolator()
        .unwrap()
        .state()
        .distance_covered_m;
    assert!((covered - 100.0).abs() < 1e-6, "covered {}", covered);

    let position = session.last_position().unwrap();
    let heading = position.heading_deg.unwrap();
    assert!(heading > 45.0 && heading < 90.0);

    let summaries = session.stop_summaries();
    let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Burrabazar", "Esplanade"]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_then_rerun_starts_from_scratch() {
    let player = load_waypoints_csv(&sample_file("trip.csv")).unwrap();
    let mut session = SimulationSession::new(
        SimulatorConfig::default(),
        PositionProvider::playback(player),
        Arc::new(eta_simulator::external::LoggingSink::default()),
        recorded_etas(),
    )
    .unwrap();

    session.run(Some(3)).await.unwrap();
    session.settle().await;
    assert!(!session.tracker().is_empty());

    session.reset();
    assert!(session.tracker().is_empty());
    assert!(session.last_position().is_none());

    let first = session.tick().unwrap();
    assert_eq!(first.sample_index, Some(0));
    assert_eq!(first.coordinate.lat, 22.5666);
}
