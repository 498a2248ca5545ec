//! CLI entry point for smu_sweep
//!
//! ```bash
//! smu_sweep iv --name diode_01
//! smu_sweep pv --config bench.toml --csv
//! smu_sweep iv --simulate --no-plot
//! smu_sweep show-config
//! smu_sweep list-resources
//! ```
//!
//! Ctrl-C stops a running sweep at the next point; the instruments are still
//! returned to 0 V with output off. A second Ctrl-C exits at once, and Ctrl-C at
//! the filename prompt abandons the save.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use smu_sweep::config::{Settings, DEFAULT_CONFIG_PATH};
use smu_sweep::experiment::{CancelToken, LogProgress};
use smu_sweep::instrument::{Instrument, LoadModel, SimulatedSourceMeter};
use smu_sweep::logging;
use smu_sweep::measurement::SweepResult;
use smu_sweep::session::{list_resources, open_instrument, MeasurementSession};
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Exit status after an interrupt, as a shell reports SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "smu_sweep")]
#[command(about = "Voltage sweeps on Keithley source-measure units", long_about = None)]
struct Cli {
    /// Configuration file [default: config/sweep.toml, skipped when missing]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Base name of the output files (prompted for when omitted)
    #[arg(long)]
    name: Option<String>,

    /// Use simulated instruments instead of VISA
    #[arg(long)]
    simulate: bool,

    /// Skip the plot
    #[arg(long)]
    no_plot: bool,

    /// Also export CSV
    #[arg(long)]
    csv: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Single-instrument I-V sweep
    Iv(RunArgs),
    /// Dual-instrument P-V sweep
    Pv(RunArgs),
    /// Print the effective configuration
    ShowConfig,
    /// List the VISA resources this machine can see
    ListResources {
        /// VISA search expression
        #[arg(long, default_value = "?*INSTR")]
        filter: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Settings::load()
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_PATH))?,
    };
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", settings.to_toml_string()?);
            Ok(())
        }
        Commands::ListResources { filter } => {
            let found = list_resources(&filter).await?;
            if found.is_empty() {
                warn!("No VISA resources match '{}'", filter);
            }
            for resource in found {
                println!("{}", resource);
            }
            Ok(())
        }
        Commands::Iv(args) => {
            args.apply(&mut settings);
            let session = MeasurementSession::new(settings);
            let result = run_iv(&session, args.simulate).await?;
            save(&session, &result, args.name).await
        }
        Commands::Pv(args) => {
            args.apply(&mut settings);
            let session = MeasurementSession::new(settings);
            let result = run_pv(&session, args.simulate).await?;
            save(&session, &result, args.name).await
        }
    }
}

impl RunArgs {
    fn apply(&self, settings: &mut Settings) {
        if self.no_plot {
            settings.storage.plot = false;
        }
        if self.csv {
            settings.storage.write_csv = true;
        }
    }
}

/// Ctrl-C handling for the duration of a sweep
///
/// The first interrupt trips the cancel token; a second one exits the process
/// without waiting for the sweep to wind down. Dropping the watch stops it.
struct InterruptWatch {
    token: CancelToken,
    task: JoinHandle<()>,
}

impl InterruptWatch {
    fn start() -> Self {
        let token = CancelToken::new();
        let trigger = token.clone();
        let task = tokio::spawn(async move {
            if watch_interrupts(trigger, tokio::signal::ctrl_c).await {
                error!("Second interrupt, exiting. Check the instruments: outputs may still be on");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        });
        Self { token, task }
    }

    fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for InterruptWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Cancel `token` on the first interrupt. Returns `true` once a second one
/// arrives, `false` if the signal source fails.
async fn watch_interrupts<F, Fut>(token: CancelToken, mut interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(e) = interrupt().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        return false;
    }
    warn!("Interrupt received, stopping after the current point (Ctrl-C again to exit now)");
    token.cancel();

    interrupt().await.is_ok()
}

async fn run_iv(session: &MeasurementSession, simulate: bool) -> Result<SweepResult> {
    let settings = session.settings();
    let mut instr: Box<dyn Instrument> = if simulate {
        Box::new(
            SimulatedSourceMeter::new(&settings.instruments.primary.resource)
                .with_load(LoadModel::Diode {
                    saturation_current: 1e-12,
                    ideality: 1.5,
                })
                .with_noise(0.01, 42),
        )
    } else {
        open_instrument(&settings.instruments.primary).await?
    };

    let watch = InterruptWatch::start();
    let outcome = session
        .run_iv(&mut *instr, &mut LogProgress, Some(watch.token()))
        .await;
    drop(watch);

    info!("Closing {}", instr.resource_address());
    drop(instr);
    report(outcome)
}

async fn run_pv(session: &MeasurementSession, simulate: bool) -> Result<SweepResult> {
    let settings = session.settings();
    let (mut primary, mut secondary): (Box<dyn Instrument>, Box<dyn Instrument>) = if simulate {
        let (p, s) = SimulatedSourceMeter::coupled_pair(
            &settings.instruments.primary.resource,
            &settings.instruments.secondary.resource,
            LoadModel::Resistor { ohms: 50.0 },
            0.8,
        );
        (Box::new(p.with_noise(0.01, 42)), Box::new(s))
    } else {
        let primary = open_instrument(&settings.instruments.primary).await?;
        let secondary = open_instrument(&settings.instruments.secondary).await?;
        (primary, secondary)
    };

    let watch = InterruptWatch::start();
    let outcome = session
        .run_pv(&mut *primary, &mut *secondary, &mut LogProgress, Some(watch.token()))
        .await;
    drop(watch);

    info!(
        "Closing {} and {}",
        primary.resource_address(),
        secondary.resource_address()
    );
    drop(primary);
    drop(secondary);
    report(outcome)
}

fn report(outcome: smu_sweep::AppResult<SweepResult>) -> Result<SweepResult> {
    outcome.map_err(|e| {
        if e.shutdown_incomplete() {
            error!("Check the instruments: outputs may still be on");
        }
        e.into()
    })
}

async fn save(session: &MeasurementSession, result: &SweepResult, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => prompt("Enter filename: ").await?,
    };
    let output = session.persist(result, &name)?;

    info!("Data: {}", output.data_file.display());
    if let Some(csv) = &output.csv_file {
        info!("CSV: {}", csv.display());
    }
    if let Some(plot) = &output.plot_file {
        info!("Plot: {}", plot.display());
    }
    Ok(())
}

async fn prompt(message: &str) -> Result<String> {
    let mut stdout = io::stdout();
    stdout.write_all(message.as_bytes())?;
    stdout.flush()?;

    // A plain thread, so a pending read never holds up runtime shutdown
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line).map(|n| (n > 0).then_some(line));
        let _ = tx.send(read);
    });
    let line = async move { rx.await.context("stdin reader stopped")?.map_err(anyhow::Error::from) };

    read_or_interrupt(line, tokio::signal::ctrl_c()).await
}

/// First of a line of input or an interrupt
async fn read_or_interrupt<L, I>(line: L, interrupt: I) -> Result<String>
where
    L: Future<Output = Result<Option<String>>>,
    I: Future<Output = io::Result<()>>,
{
    tokio::pin!(line);
    let interrupted = tokio::select! {
        read = &mut line => return name_from(read?),
        signal = interrupt => signal,
    };
    match interrupted {
        Ok(()) => bail!("Interrupted at the filename prompt, nothing saved"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            name_from(line.await?)
        }
    }
}

fn name_from(line: Option<String>) -> Result<String> {
    let line = line.context("No file name given on stdin")?;
    Ok(line.trim().to_string())
}
