//! Line-based daemon: reads one JSON printer event per line on stdin and
//! answers `OK`, `OK suppressed` or `ERR <reason>` on stdout.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::time::{self, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use ws281x_led_status::{
    strip, EffectRunner, EffectState, Error, Mode, Outcome, PrinterEvent, Settings, StatusTracker,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (JSON), defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let default_filter = if settings.features.debug_logging {
        "ws281x_led_status=debug"
    } else {
        "ws281x_led_status=info"
    };
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let strip = match strip::connect(&settings.strip).await {
        Ok(strip) => strip,
        Err(e) => {
            error!("Could not open the strip: {}", e);
            println!("ERR {e}");
            std::process::exit(1);
        }
    };
    let (runner, handle) = match EffectRunner::new(
        settings.clone(),
        strip,
        EffectState::Standard {
            mode: Mode::Startup,
        },
        true,
    ) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Could not start the effect runner: {}", e);
            println!("ERR {e}");
            std::process::exit(1);
        }
    };
    let runner_task = tokio::spawn(runner.run());
    let mut tracker = StatusTracker::new(settings, handle.clone(), true);

    // Inform about successful initialization
    println!("OK");

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        let deadline = tracker.next_deadline();
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = sleep_until(deadline) => {
                if let Err(e) = tracker.on_timer(Instant::now()) {
                    error!("Timer handling failed: {}", e);
                }
                continue;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: PrinterEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                println!("ERR Invalid event: {e}");
                continue;
            }
        };
        match tracker.handle(event) {
            Ok(Outcome::Handled) => println!("OK"),
            Ok(Outcome::Suppressed) => println!("OK suppressed"),
            Err(e) => {
                println!("ERR {e}");
                if matches!(e, Error::RunnerClosed) {
                    break;
                }
            }
        }
    }

    if handle.kill().is_err() {
        warn!("Runner already gone");
    }
    if let Err(e) = runner_task.await {
        error!("Runner task failed: {}", e);
    }
    info!("Shut down");
    Ok(())
}

/// Sleep until the deadline, or forever without one
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
