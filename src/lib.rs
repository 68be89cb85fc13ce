/*!
 # WS281x LED Status

 An effect runner that drives an addressable LED strip to reflect the state of
 a 3D printer: connection state, print progress, heating and cooling progress,
 torch mode and scheduled "active hours".

 ## Features

 * Single owner of the strip, one effect rendering at a time
 * Standard animations (wipe, pulse, rainbow, bounce, ...)
 * Progress bars for printing, heating and cooling
 * M150 raw color passthrough
 * Brightness fades when the lights are switched on or off
 * Strip segments (including a sacrificial first pixel)
 * Daily active times
 * Local SPI strips and WLED devices over UDP

 ## Example

 ```rust,no_run
 use ws281x_led_status::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let settings = Settings::default();
     let strip = MemoryStrip::new(settings.strip.count);

     let (runner, handle) = EffectRunner::new(
         settings,
         Box::new(strip),
         EffectState::Standard { mode: Mode::Startup },
         true,
     )?;
     let task = tokio::spawn(runner.run());

     handle.send(StateMessage::Progress {
         mode: ProgressMode::Print,
         value: 45,
     })?;
     handle.kill()?;
     task.await.ok();
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the LED status runner
#[derive(Error, Debug)]
pub enum Error {
    /// The strip driver could not be started (wrong device, permissions, ...)
    #[error("Strip failed to start: {0}")]
    StripFailed(String),

    /// A segment specification does not fit the strip
    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    /// A color string could not be parsed
    #[error("Invalid color: {0}")]
    InvalidColor(String),

    /// A time of day could not be parsed
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    /// The runner is no longer accepting messages
    #[error("Effect runner has shut down")]
    RunnerClosed,

    /// General error
    #[error("Error: {0}")]
    General(String),

    /// I/O error from a strip driver or settings file
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Settings or message (de)serialization error
    #[error(transparent)]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod brightness;
pub mod color;
pub mod effects;
pub mod message;
pub mod runner;
pub mod schedule;
pub mod segments;
pub mod settings;
pub mod strip;
pub mod tracker;

// Re-export key types
pub use brightness::BrightnessManager;
pub use color::{blend, hex_to_rgb, wheel, ColorCorrection, Rgb, Rgbw};
pub use effects::{Effect, EffectControl, EffectKind, ProgressEffectKind};
pub use message::{CustomEffect, EffectState, Mode, ProgressMode, RawOverride, StateMessage};
pub use runner::{EffectRunner, RunnerHandle, RunnerState};
pub use schedule::{ActiveTimer, ActiveTimes};
pub use segments::{Segment, SegmentManager, SegmentSpec};
pub use settings::Settings;
pub use strip::{MemoryStrip, SharedStrip, SpiStrip, Strip, StripType, WledStrip};
pub use tracker::{Outcome, PrinterEvent, StatusTracker, Temperature};
