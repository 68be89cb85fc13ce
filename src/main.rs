use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Result};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, trace};
use tracing_subscriber::EnvFilter;
use ws281x_led_status::schedule::parse_time;
use ws281x_led_status::settings::DriverSettings;
use ws281x_led_status::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Render to memory instead of the configured driver
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum Switch {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Cycle through every configured effect
    Demo {
        /// Duration of each demo step in seconds
        #[arg(short, long, default_value_t = 5)]
        duration: u64,
    },
    /// Show the effect of a printer state
    Effect {
        /// startup, idle, disconnected, failed, success, paused, printing or torch
        mode: Mode,
        /// Seconds to run, until Ctrl-C when omitted
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Show a progress value
    Progress {
        /// print, heatup or cooling
        mode: ProgressMode,
        /// Percentage, clamped to 0-100
        #[arg(allow_negative_numbers = true)]
        value: i32,
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Apply an M150 color command, e.g. "M150 R255 U128 B0 P200"
    M150 {
        command: String,
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Show idle, then switch the lights
    Lights {
        #[arg(value_enum)]
        switch: Switch,
        /// Seconds to wait before switching
        #[arg(short, long, default_value_t = 3)]
        wait: u64,
    },
    /// Check an active times window
    ActiveTimes {
        /// Window start, HH:MM
        start: String,
        /// Window end, HH:MM
        end: String,
        /// Time to check, now when omitted
        #[arg(long)]
        at: Option<String>,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if cli.dry_run {
        settings.strip.driver = DriverSettings::Memory;
    }

    let default_filter = if settings.features.debug_logging {
        "ws281x_led_status=debug"
    } else {
        "ws281x_led_status=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .compact()
        .init();
    debug!("Parsed command line arguments");

    match cli.command.unwrap_or(Commands::Demo { duration: 5 }) {
        Commands::ActiveTimes { start, end, at } => {
            let times = ActiveTimes::parse(&start, &end)?;
            let now = match at {
                Some(at) => parse_time(&at)?,
                None => chrono::Local::now().time(),
            };
            let active = times.check_times(now);
            if !times.is_valid() {
                info!("Window {} ends before it starts, always active", times);
            }
            println!("{}", if active { "active" } else { "inactive" });
        }
        Commands::Demo { duration } => {
            let (task, handle) = start_runner(&settings, EffectState::Blank).await?;
            run_demo(&handle, duration).await?;
            stop_runner(task, &handle).await?;
        }
        Commands::Effect { mode, duration } => {
            let (task, handle) = start_runner(&settings, EffectState::Blank).await?;
            handle.send(StateMessage::standard(mode))?;
            hold(duration).await?;
            stop_runner(task, &handle).await?;
        }
        Commands::Progress {
            mode,
            value,
            duration,
        } => {
            let (task, handle) = start_runner(&settings, EffectState::Blank).await?;
            handle.send(StateMessage::progress(mode, value))?;
            hold(duration).await?;
            stop_runner(task, &handle).await?;
        }
        Commands::M150 { command, duration } => {
            let (task, handle) = start_runner(&settings, EffectState::Blank).await?;
            handle.send(StateMessage::raw(command))?;
            hold(duration).await?;
            stop_runner(task, &handle).await?;
        }
        Commands::Lights { switch, wait } => {
            let lights_on = matches!(switch, Switch::Off);
            let (task, handle) = start_runner_with(
                &settings,
                EffectState::Standard { mode: Mode::Idle },
                lights_on,
            )
            .await?;
            sleep(wait).await;
            handle.send(StateMessage::lights(!lights_on))?;
            hold(None).await?;
            stop_runner(task, &handle).await?;
        }
    }

    Ok(())
}

async fn start_runner(
    settings: &Settings,
    previous: EffectState,
) -> Result<(JoinHandle<()>, RunnerHandle)> {
    start_runner_with(settings, previous, true).await
}

/// Open the configured strip and spawn a runner on it
#[instrument(skip(settings))]
async fn start_runner_with(
    settings: &Settings,
    previous: EffectState,
    lights_on: bool,
) -> Result<(JoinHandle<()>, RunnerHandle)> {
    let strip = match strip::connect(&settings.strip).await {
        Ok(strip) => strip,
        Err(e) => {
            error!("Failed to open strip: {}", e);
            return Err(e.into());
        }
    };
    let (runner, handle) = EffectRunner::new(settings.clone(), strip, previous, lights_on)?;
    Ok((tokio::spawn(runner.run()), handle))
}

async fn stop_runner(task: JoinHandle<()>, handle: &RunnerHandle) -> Result<()> {
    handle.kill()?;
    task.await.map_err(|e| eyre!("runner task failed: {e}"))?;
    Ok(())
}

/// Wait for the given seconds, or for Ctrl-C
async fn hold(duration: Option<u64>) -> Result<()> {
    match duration {
        Some(seconds) => sleep(seconds).await,
        None => {
            info!("Running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }
    Ok(())
}

/// Sleep for specified number of seconds
#[instrument]
async fn sleep(seconds: u64) {
    trace!("Sleeping for {}s", seconds);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    trace!("Sleep completed");
}

/// Show every mode and a sweep of progress values
#[instrument(skip(handle))]
async fn run_demo(handle: &RunnerHandle, duration: u64) -> Result<()> {
    info!("Running LED strip demo with {}s intervals", duration);

    for mode in Mode::ALL {
        info!("Showing {}", mode);
        handle.send(StateMessage::standard(mode))?;
        sleep(duration).await;
    }

    for mode in ProgressMode::ALL {
        info!("Showing {}", mode);
        for value in (0..=100).step_by(10) {
            handle.send(StateMessage::progress(mode, value))?;
            tokio::time::sleep(Duration::from_millis(duration * 100)).await;
        }
    }

    info!("M150 passthrough: purple at half brightness");
    handle.send(StateMessage::raw("M150 R128 B255 P128"))?;
    sleep(duration).await;

    info!("Turning lights off");
    handle.send(StateMessage::lights(false))?;
    sleep(duration).await;

    info!("Turning lights on");
    handle.send(StateMessage::lights(true))?;
    sleep(duration).await;

    info!("Demo completed!");
    Ok(())
}
