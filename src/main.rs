mod alarm;
mod api;
mod clock;
mod effects;
mod engine;
mod error;
mod logging;
mod report;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use crate::alarm::store::{AlarmCollection, JsonFilePersistence};
use crate::api::{ApiContext, ApiServer, ApiServerConfig, ApiSignal, ScreenState};
use crate::clock::{Clock, SystemClock};
use crate::effects::console::{ConsoleSound, ConsoleVibration, LogNotifications};
use crate::effects::{EffectBackends, EffectDispatcher, EffectWorker};
use crate::engine::AlarmEngine;

#[derive(Parser, Debug)]
#[command(
    name = "wakeclock",
    version,
    about = "Headless alarm clock with a local control API"
)]
struct Cli {
    #[arg(long, default_value = "alarms.json")]
    alarms: PathBuf,

    /// Print the alarm report and exit.
    #[arg(long)]
    list: bool,

    #[arg(long, default_value = "127.0.0.1")]
    api_bind: String,

    #[arg(long, default_value_t = 8099)]
    api_port: u16,

    #[arg(long)]
    no_api: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Exit after this many seconds instead of running until killed.
    #[arg(long)]
    run_for_secs: Option<u64>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    if cli.run_for_secs == Some(0) {
        bail!("--run-for-secs must be greater than zero");
    }
    logging::init(&cli.log_level)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let collection = AlarmCollection::open(
        Box::new(JsonFilePersistence::new(cli.alarms.clone())),
        Arc::clone(&clock),
    )
    .with_context(|| format!("failed to load {}", cli.alarms.display()))?;
    let collection = Arc::new(collection);

    if cli.list {
        let settings = collection.settings()?;
        let alarms = collection.list()?;
        print!("{}", report::render_report(&alarms, &settings, &clock.now())?);
        return Ok(());
    }

    let screen = Arc::new(Mutex::new(ScreenState::default()));
    let effects = EffectWorker::spawn(EffectDispatcher::new(EffectBackends {
        sound: Box::new(ConsoleSound::new()),
        vibration: Box::new(ConsoleVibration::default()),
        notifications: Box::new(LogNotifications::default()),
        signal: Box::new(ApiSignal::new(Arc::clone(&screen))),
    }))?;

    let mut engine = AlarmEngine::new(collection.clone(), Arc::clone(&clock), effects.sender());
    engine.start()?;

    let api_server = if cli.no_api {
        None
    } else {
        let server = ApiServer::start(
            ApiServerConfig {
                bind_addr: cli.api_bind.clone(),
                port: cli.api_port,
            },
            ApiContext {
                collection: Arc::clone(&collection),
                engine: engine.handle(),
                screen,
                clock: Arc::clone(&clock),
            },
        )
        .with_context(|| {
            format!(
                "failed to start local API at {}:{}",
                cli.api_bind, cli.api_port
            )
        })?;
        Some(server)
    };

    info!(alarms = %cli.alarms.display(), "alarm clock running");
    match cli.run_for_secs {
        Some(secs) => thread::sleep(Duration::from_secs(secs)),
        None => loop {
            thread::park();
        },
    }

    drop(api_server);
    engine.stop();
    drop(effects);
    info!("shutdown complete");
    Ok(())
}
