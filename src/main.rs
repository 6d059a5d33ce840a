//! Command-line entry point for funcgen.
//!
//! ```bash
//! funcgen identify
//! funcgen set --frequency 500 --amplitude 0.5 --output on
//! funcgen expand protocols/growth.csv
//! funcgen run protocols/growth.csv
//! funcgen --device null grow --t1 1 --t2 1 --t3 1
//! funcgen template my-protocol.csv
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use funcgen::config::{DeviceKind, Settings};
use funcgen::display::{self, DisplaySink};
use funcgen::hardware::{open_device, FunctionGenerator};
use funcgen::protocol::{
    expand, load_protocol, save_protocol, three_stage_growth, GrowthParams, ProtocolQueue,
    ProtocolRunner, RunnerHandle, RunnerState, Stage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "funcgen")]
#[command(about = "Function generator control and timed electroformation protocols", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/funcgen.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Instrument: agilent33220a, tti-tga1230 or null
    #[arg(long, global = true)]
    device: Option<DeviceKind>,

    /// host:port for LAN instruments, serial port path for RS-232
    #[arg(long, global = true)]
    resource: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instrument identification string
    Identify,

    /// Apply settings directly (no protocol)
    Set(SetArgs),

    /// Validate a protocol table and print its set-points
    Expand {
        /// Protocol table (CSV)
        table: PathBuf,
    },

    /// Run a protocol table
    Run {
        /// Protocol table (CSV)
        table: PathBuf,
    },

    /// Run the three-stage vesicle growth protocol
    Grow(GrowArgs),

    /// Write the growth protocol as a table to start editing from
    Template {
        /// Output file (CSV)
        out: PathBuf,

        #[command(flatten)]
        growth: GrowArgs,
    },
}

#[derive(Args)]
struct SetArgs {
    /// Frequency, Hz
    #[arg(long)]
    frequency: Option<f64>,

    /// Amplitude, Vpp
    #[arg(long)]
    amplitude: Option<f64>,

    /// DC offset, V
    #[arg(long, allow_hyphen_values = true)]
    offset: Option<f64>,

    /// Waveform, in the instrument's own naming (e.g. SIN, SQUARE)
    #[arg(long)]
    mode: Option<String>,

    #[arg(long, value_enum)]
    output: Option<Switch>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Args)]
struct GrowArgs {
    /// Initial amplitude, Vpp
    #[arg(long, default_value_t = GrowthParams::default().u1)]
    u1: f64,
    /// Final amplitude, Vpp
    #[arg(long, default_value_t = GrowthParams::default().u2)]
    u2: f64,
    /// Growth frequency, Hz
    #[arg(long, default_value_t = GrowthParams::default().f1)]
    f1: f64,
    /// Detachment frequency, Hz
    #[arg(long, default_value_t = GrowthParams::default().f2)]
    f2: f64,
    /// Growing stage, minutes
    #[arg(long, default_value_t = GrowthParams::default().t1)]
    t1: f64,
    /// Resting stage, minutes
    #[arg(long, default_value_t = GrowthParams::default().t2)]
    t2: f64,
    /// Detaching stage, minutes
    #[arg(long, default_value_t = GrowthParams::default().t3)]
    t3: f64,
    /// Update interval, seconds
    #[arg(long, default_value_t = GrowthParams::default().dt)]
    dt: f64,
}

impl From<&GrowArgs> for GrowthParams {
    fn from(args: &GrowArgs) -> Self {
        GrowthParams {
            u1: args.u1,
            u2: args.u2,
            f1: args.f1,
            f2: args.f2,
            t1: args.t1,
            t2: args.t2,
            t3: args.t3,
            dt: args.dt,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(kind) = cli.device {
        settings.device.kind = kind;
    }
    if let Some(resource) = cli.resource {
        settings.device.resource = resource;
    }
    settings.validate()?;
    funcgen::logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Identify => identify(&settings).await,
        Commands::Set(args) => set(&settings, args).await,
        Commands::Expand { table } => {
            let queue = expand(&load_protocol(&table)?)?;
            print_schedule(&queue);
            Ok(())
        }
        Commands::Run { table } => run_protocol(&settings, load_protocol(&table)?).await,
        Commands::Grow(args) => {
            let stages = three_stage_growth(&GrowthParams::from(&args))?;
            run_protocol(&settings, stages).await
        }
        Commands::Template { out, growth } => {
            let stages = three_stage_growth(&GrowthParams::from(&growth))?;
            save_protocol(&out, &stages)?;
            println!("Wrote {} stages to {}", stages.len(), out.display());
            Ok(())
        }
    }
}

async fn identify(settings: &Settings) -> Result<()> {
    let device = open_device(&settings.device, &settings.timeouts).await?;
    let id = device.identify().await;
    release(&device).await;
    println!("{}", id?);
    Ok(())
}

async fn set(settings: &Settings, args: SetArgs) -> Result<()> {
    let device = open_device(&settings.device, &settings.timeouts).await?;
    let result = apply_manual(device.as_ref(), &args).await;
    release(&device).await;
    result
}

async fn apply_manual(device: &dyn FunctionGenerator, args: &SetArgs) -> Result<()> {
    if let Some(mode) = args.mode.as_deref() {
        if !device.supports_mode(mode) {
            anyhow::bail!(
                "Unsupported waveform '{}'; choose one of {}",
                mode,
                device.modes().join(", ")
            );
        }
    }

    match (args.frequency, args.mode.as_deref()) {
        (Some(frequency), mode) => {
            device
                .apply(frequency, args.amplitude, args.offset, mode)
                .await?;
        }
        (None, mode) => {
            if let Some(amplitude) = args.amplitude {
                device.set_amplitude(amplitude).await?;
            }
            if let Some(offset) = args.offset {
                device.set_offset(offset).await?;
            }
            if mode.is_some() {
                let frequency = device.frequency().await?;
                device.apply(frequency, None, None, mode).await?;
            }
        }
    }

    if let Some(output) = args.output {
        device.set_output(matches!(output, Switch::On)).await?;
    }

    let (frequency, amplitude, offset, output) = (
        device.frequency().await?,
        device.amplitude().await?,
        device.offset().await?,
        device.output().await?,
    );
    println!(
        "{} | offset {:.3} V | {:.3} Vrms | output {}",
        display::values_line(Some(amplitude), Some(frequency)),
        offset,
        display::vrms(amplitude),
        if output { "on" } else { "off" }
    );
    Ok(())
}

fn print_schedule(queue: &ProtocolQueue) {
    println!("{}", display::summary(queue));
    for (index, point) in queue.iter().enumerate() {
        println!(
            "{:>5}  {:<12} {:>8.3} Vpp {:>12.3} Hz  hold {:>6.1} s  stage left {}",
            index,
            point.stage,
            point.amplitude,
            point.frequency,
            point.tick_duration.as_secs_f64(),
            display::format_clock(point.time_remaining)
        );
    }
}

async fn run_protocol(settings: &Settings, stages: Vec<Stage>) -> Result<()> {
    let queue = expand(&stages)?;
    println!("{}", display::summary(&queue));

    let device = open_device(&settings.device, &settings.timeouts).await?;
    let mut runner = ProtocolRunner::new();
    let events = runner.subscribe();

    let panel = settings.run.device_display.then(|| Arc::clone(&device));
    let sink = tokio::spawn(DisplaySink::new(panel, std::io::stdout()).run(events));

    if let Err(err) = runner
        .start(queue, Arc::clone(&device), settings.run.run_options())
        .await
    {
        release(&device).await;
        return Err(err.into());
    }

    let handle = RunnerHandle::spawn(runner, settings.run.finished_refresh());
    println!("Commands: p = pause, r = resume, s = stop. Ctrl-C stops the run.");
    control(&handle).await;

    let outcome = handle.join().await;
    if let Err(err) = sink.await {
        tracing::warn!(error = %err, "Display task ended abnormally");
    }
    release(&device).await;
    outcome?;
    Ok(())
}

/// Forward keyboard commands and Ctrl-C to the runner until its task ends.
async fn control(handle: &RunnerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    while !handle.is_done() {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    tracing::error!(error = %err, "Cannot listen for Ctrl-C");
                    return;
                }
                let result = match handle.status().await.map(|s| s.state) {
                    Some(RunnerState::Finished) => handle.acknowledge().await,
                    Some(_) => handle.stop().await,
                    None => return,
                };
                report(result);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        let result = match line.trim() {
                            "p" | "pause" => handle.pause().await,
                            "r" | "resume" => handle.resume().await,
                            "s" | "stop" => handle.stop().await,
                            "" => Ok(()),
                            other => {
                                println!("Unknown command '{}'", other);
                                Ok(())
                            }
                        };
                        report(result);
                    }
                    Ok(None) => stdin_open = false,
                    Err(err) => {
                        tracing::debug!(error = %err, "stdin closed");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
        }
    }
}

fn report(result: funcgen::error::FuncGenResult<()>) {
    if let Err(err) = result {
        println!("{}", err);
    }
}

/// Return the instrument to local control and release the bus.
async fn release(device: &Arc<dyn FunctionGenerator>) {
    if let Err(err) = device.disconnect().await {
        tracing::warn!(error = %format!("{:#}", err), "Failed to return device to local control");
    }
    if let Err(err) = device.close().await {
        tracing::warn!(error = %format!("{:#}", err), "Failed to close device");
    }
}
