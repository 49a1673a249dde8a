use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use aadt_harvest::features::station_input;
use aadt_harvest::{BatchHarvester, ChromiumDriver, HarvestConfig, StationId, StopSignal};
use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Harvest historical AADT counts for TCDS stations, resumably.
#[derive(Parser, Debug)]
#[command(about, version)]
#[command(group(ArgGroup::new("input").required(true).args(["id", "file"])))]
struct Args {
    /// A single station ID.
    #[arg(long)]
    id: Option<String>,

    /// Newline-delimited file of station IDs.
    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long, default_value_t = 50)]
    batch_size: usize,

    /// Config file (defaults to ./aadt-harvest.json or AADT_HARVEST_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where results, batch files and the progress ledger go.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Also write historical_aadt_<key>.csv per result set.
    #[arg(long)]
    csv: bool,

    /// Show the browser window.
    #[arg(long)]
    headful: bool,

    /// Move a malformed progress ledger aside instead of aborting.
    #[arg(long)]
    reset_corrupt_ledger: bool,
}

fn init_tracing(log_file: Option<&PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chromiumoxide=warn"));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn spawn_interrupt_handler(stop: StopSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️  Interrupt received: finishing the current batch, then stopping (Ctrl-C again to quit now)");
            stop.trigger();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️  Second interrupt: exiting; the ledger reflects the last finished batch");
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let batch_size = args.batch_size;

    let mut config = HarvestConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    if args.csv {
        config.output.csv_export = true;
    }
    if args.headful {
        config.browser.headless = false;
    }
    if args.reset_corrupt_ledger {
        config.ledger.reset_on_corrupt = true;
    }

    init_tracing(config.logging.file.as_ref())?;

    let station_ids: Vec<StationId> = match (args.id, args.file) {
        (Some(id), _) => vec![StationId::new(id.trim())],
        (None, Some(path)) => station_input::load_station_ids(&path)?,
        (None, None) => unreachable!("clap enforces one input"),
    };

    info!(
        "Output in {} (csv export {})",
        config.output.dir.display(),
        if config.output.csv_export { "on" } else { "off" }
    );

    let stop = StopSignal::new();
    spawn_interrupt_handler(stop.clone());

    let driver = ChromiumDriver::new(config.browser.clone(), config.site.clone())?;
    let result = async {
        let mut harvester = BatchHarvester::open(&driver, &config, stop)?;
        harvester.run(&station_ids, batch_size).await
    }
    .await;
    driver.shutdown().await;

    let summary = result?;
    if summary.interrupted {
        warn!("Run stopped early; re-run the same command to resume");
    }
    Ok(())
}
