pub mod channels;      // Per-device broadcast channels
pub mod codec;         // Register word <-> value conversion
pub mod config;        // Configuration management
pub mod connection;    // Modbus link ownership, pacing and health
pub mod data_cache;    // Latest decoded signals with staleness
pub mod derived;       // Values computed from several signals
pub mod dispatch;      // Battery dispatch modes and their upkeep
pub mod error;         // Error types
pub mod inverter;      // Per-device facade
pub mod modbus;        // Modbus TCP framing and transport
pub mod options;       // Command line options parsing
pub mod prelude;       // Common imports and types
pub mod recovery;      // Stuck link detection
pub mod register;      // Register map
pub mod scheduler;     // Adaptive polling
pub mod stats;         // Per-device counters

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::options::Options;
use crate::prelude::*;
use std::time::Duration;

pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("logging already initialised: {}", e);
    }
}

/// Main application entry point
pub async fn app() -> Result<()> {
    let options = Options::new();

    let config = Config::new(options.config_file.clone())?;
    init_logging(config.loglevel());

    info!("neovolt-bridge {} starting with config file: {}", CARGO_PKG_VERSION, options.config_file);
    config.log_summary();

    if options.probe {
        return probe(&config).await;
    }

    let inverters: Vec<Inverter> = config.enabled_devices().map(Inverter::new).collect();
    for inverter in &inverters {
        inverter.start();
    }
    info!("{} inverters started", inverters.len());

    let (shutdown_tx, _) = broadcast::channel(1);
    let status_handle = config
        .status_interval()
        .map(|interval| tokio::spawn(status_reporter(inverters.clone(), interval, shutdown_tx.subscribe())));

    wait_for_shutdown(options.runtime).await;

    info!("Shutdown signal received, stopping inverters...");
    let _ = shutdown_tx.send(());
    if let Some(handle) = status_handle {
        if let Err(e) = handle.await {
            error!("Error waiting for status task: {}", e);
        }
    }

    futures::future::join_all(inverters.iter().map(|inverter| inverter.stop())).await;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(runtime: Option<u64>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match runtime {
        Some(secs) => tokio::select! {
            _ = ctrl_c => {}
            _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Runtime limit of {}s reached", secs),
        },
        None => ctrl_c.await,
    }
}

/// Reads the SOC of each enabled device once. Fails if any device did not answer.
async fn probe(config: &Config) -> Result<()> {
    let mut failed = Vec::new();

    for device in config.enabled_devices() {
        let inverter = Inverter::new(device);
        match inverter.probe().await {
            Ok(soc) => info!("{}: {}:{} battery soc {}%", device.name(), device.host(), device.port(), soc),
            Err(e) => {
                error!("{}: {}:{} probe failed: {}", device.name(), device.host(), device.port(), e);
                failed.push(device.name().to_owned());
            }
        }
        inverter.stop().await;
    }

    if !failed.is_empty() {
        bail!("probe failed for {}", failed.join(", "));
    }
    Ok(())
}

async fn status_reporter(inverters: Vec<Inverter>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    // first tick is immediate, nothing to report yet
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for inverter in &inverters {
                    info!("{}", inverter.status_line());
                    debug!("{}", inverter.status_json());
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
