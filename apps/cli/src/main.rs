mod console;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use mmcdump_core::{
    Dispatcher, DumperConfig, FtdiBridge, RunError, RunMode, RunOutcome, RunRequest, StopFlag,
    ThreadSleeper, parse_cluster,
};
use tracing::{error, info};

use console::{ConsoleObserver, stamp};

/// Exit status of every failed run.
const FAILURE_EXIT_CODE: i32 = -1;

/// Shown with every usage message, including argument errors.
const USAGE: &str = "mmcdump [OPTIONS] <MODE> <DEST_DUMP_FILE_PATH> <INITIAL_SECTOR>

Modes:
  0 - enter dumpable mode
  1 - dump mmc card
  2 - standalone initialization";

#[derive(Parser, Debug)]
#[command(author, version, about = "Raw MMC card dumper over an FTDI bridge", long_about = None)]
#[command(override_usage = USAGE)]
struct Args {
    /// 0 = enter dumpable mode, 1 = dump mmc card, 2 = standalone initialization
    mode: RunMode,

    /// Image file the card is dumped into
    dest_dump_file_path: PathBuf,

    /// First cluster to dump, in hex (0x prefix optional)
    #[arg(value_parser = parse_cluster)]
    initial_sector: u32,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Product string of the bridge
    #[arg(long)]
    device_id: Option<String>,

    /// Stop retrying after this many failed acquire attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay between acquire attempts in milliseconds
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Stop the dump before this cluster (hex)
    #[arg(long, value_parser = parse_cluster)]
    end_cluster: Option<u32>,

    /// Fail the run when standalone card initialization fails
    #[arg(long)]
    strict_init: bool,

    /// Use the low frequency clock after this many failures without progress
    #[arg(long)]
    low_freq_after: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn load_config(&self) -> Result<DumperConfig> {
        let mut config = match &self.config {
            Some(path) => DumperConfig::load_from_file(path)?,
            None => DumperConfig::default(),
        };

        if let Some(id) = &self.device_id {
            config.device_id = id.clone();
        }
        if let Some(max) = self.max_attempts {
            config.acquire.max_attempts = Some(max);
        }
        if let Some(ms) = self.backoff_ms {
            config.acquire.backoff_ms = ms;
        }
        if self.end_cluster.is_some() {
            config.end_cluster = self.end_cluster;
        }
        if self.strict_init {
            config.strict_init = true;
        }
        if self.low_freq_after.is_some() {
            config.escalate_low_freq_after = self.low_freq_after;
        }

        config.validate()?;
        Ok(config)
    }

    fn request(&self) -> RunRequest {
        RunRequest {
            mode: self.mode,
            output: self.dest_dump_file_path.clone(),
            start_cluster: self.initial_sector,
        }
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            process::exit(FAILURE_EXIT_CODE);
        }
    };

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("Failed to set up logging: {e}");
    }

    match run(&args) {
        Ok(outcome) => report(&outcome),
        Err(e) => {
            error!("Error: {:#}", e);
            if let Some(run_err) = e.downcast_ref::<RunError>() {
                diagnose(run_err);
            }
            process::exit(FAILURE_EXIT_CODE);
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run(args: &Args) -> Result<RunOutcome> {
    let config = args.load_config()?;
    info!(mode = %args.mode, device_id = %config.device_id, "Starting mmcdump");

    let mut bridge = FtdiBridge::new(config.bridge.clone(), config.card.clone());
    let observer = ConsoleObserver::new();
    let outcome = Dispatcher::new(
        &mut bridge,
        &config,
        &ThreadSleeper,
        &observer,
        StopFlag::new(),
    )
    .run(&args.request())?;
    Ok(outcome)
}

fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::DumpableModeEntered => info!("Dumpable mode entered"),
        RunOutcome::Dumped(report) => info!(
            clusters = report.end_cluster.saturating_sub(report.start_cluster),
            port_cycles = report.port_cycles,
            "Dump complete"
        ),
        RunOutcome::Initialized(Ok(card)) => {
            info!(addressing = %card.addressing, "Card initialization complete")
        }
        RunOutcome::Initialized(Err(e)) => error!("Card initialization failed: {}", e),
    }
}

/// Operator-facing lines for failures that leave the bridge in an unknown
/// state.
fn diagnose(err: &RunError) {
    match err {
        RunError::CycleFailure(e) => {
            stamp(&format!("Could not power-cycle the bridge: {e}"));
            stamp("Unplug and replug the bridge, then resume from the last cluster");
        }
        RunError::CloseFailure(e) => {
            stamp(&format!("Could not close the bridge: {e}"));
        }
        _ => {}
    }
}
