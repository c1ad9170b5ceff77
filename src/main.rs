use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use eta_simulator::{
    PositionProvider, RunOutcome, SimulationSession, SimulatorConfig, SimulatorError, Stop,
    WrapPolicy,
    eta::format_clock_time,
    external::{
        EtaSource, JsonLinesSink, LoggingSink, PositionSink, RecordedEtaSource, StaticEtaSource,
    },
    playback::load_waypoints_csv,
    route::load_route_geojson,
};
use log::{LevelFilter, error, info};
use tokio::sync::Notify;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log every tick and ETA response
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the per-user one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a vehicle along the route in a GeoJSON file
    Route {
        #[arg(short, long)]
        geojson: PathBuf,

        /// Stop at the end of the route instead of looping back to the start
        #[arg(long)]
        hold: bool,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Replay a recorded trip from a CSV file
    Playback {
        #[arg(long)]
        csv: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Write the effective configuration to the per-user config file
    InitConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON lines file of recorded trackVehicles responses
    #[arg(short, long)]
    etas: Option<PathBuf>,

    /// JSON lines file to write position reports to
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    speed_multiplier: Option<u32>,

    /// Stop after this many ticks
    #[arg(short, long)]
    ticks: Option<u64>,

    #[arg(long)]
    vehicle_id: Option<String>,

    #[arg(long)]
    route_code: Option<String>,
}

impl RunArgs {
    fn apply(&self, config: &mut SimulatorConfig) {
        if let Some(multiplier) = self.speed_multiplier {
            config.speed_multiplier = multiplier;
        }
        if let Some(vehicle_id) = &self.vehicle_id {
            config.vehicle_id = vehicle_id.clone();
        }
        if let Some(route_code) = &self.route_code {
            config.route_code = route_code.clone();
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SimulatorConfig, SimulatorError> {
    match path {
        Some(path) => SimulatorConfig::from_file(path),
        None => Ok(SimulatorConfig::from_local_file()?.unwrap_or_default()),
    }
}

fn simulate(
    config: SimulatorConfig,
    provider: PositionProvider,
    stops: Vec<Stop>,
    run: &RunArgs,
) -> Result<(), SimulatorError> {
    let json_sink = match &run.output {
        Some(path) => Some(Arc::new(JsonLinesSink::create(path)?)),
        None => None,
    };
    let sink: Arc<dyn PositionSink> = match &json_sink {
        Some(json_sink) => json_sink.clone(),
        None => Arc::new(LoggingSink::from_config(&config)),
    };
    let eta_source: Arc<dyn EtaSource> = match &run.etas {
        Some(path) => Arc::new(RecordedEtaSource::from_file(path, &config.vehicle_id)?),
        None => Arc::new(StaticEtaSource),
    };

    let shutdown = Arc::new(Notify::new());
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        handler_shutdown.notify_one();
    })
    .expect("Could not set Ctrl-C handler");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Could not start async runtime");

    let mut session =
        SimulationSession::new(config, provider, sink, eta_source)?.with_stops(stops);
    let outcome = runtime.block_on(async {
        let outcome = session
            .run_until(run.ticks, async move { shutdown.notified().await })
            .await;
        session.settle().await;
        outcome
    })?;
    match outcome {
        RunOutcome::PlaybackComplete => info!("Reached the end of the recording"),
        RunOutcome::TickLimit => info!("Tick limit reached"),
        RunOutcome::Interrupted => info!("Interrupted"),
    }

    if let Some(json_sink) = json_sink {
        json_sink.close()?;
    }
    print_summaries(&session);
    Ok(())
}

fn print_summaries(session: &SimulationSession) {
    println!("{} ticks", session.tick_count());
    if let Some(next) = session.next_stop() {
        println!("Next stop: {}", next);
    }
    let offset = session.tracker().offset();
    let summaries = session.stop_summaries();
    if summaries.is_empty() {
        println!("No ETAs received");
        return;
    }
    for stop in summaries {
        let eta = stop
            .last_known_eta
            .map(|eta| format_clock_time(&eta, &offset))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}: ETA {}, {} changes ({} later, {} earlier)",
            stop.name, eta, stop.summary.total, stop.summary.delays, stop.summary.earlier
        );
    }
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    colog::default_builder().filter_level(level).init();

    let mut config = load_config(cli.config.as_ref()).expect("Error while loading config file");
    let result = match &cli.command {
        Commands::Route { geojson, hold, run } => {
            run.apply(&mut config);
            if *hold {
                config.wrap_policy = WrapPolicy::Hold;
            }
            load_route_geojson(geojson).and_then(|(route, stops)| {
                let provider = PositionProvider::route_from_config(route, &config);
                simulate(config, provider, stops, run)
            })
        }
        Commands::Playback { csv, run } => {
            run.apply(&mut config);
            load_waypoints_csv(csv).and_then(|player| {
                info!(
                    "Replaying ride {} ({} samples)",
                    player.ride_id(),
                    player.len()
                );
                simulate(config, PositionProvider::playback(player), Vec::new(), run)
            })
        }
        Commands::InitConfig => config.save().inspect(|_| {
            if let Some(path) = SimulatorConfig::config_path() {
                println!("Config written to {}", path.display());
            }
        }),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
