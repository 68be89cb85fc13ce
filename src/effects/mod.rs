/*!
 # Effects

 Every visual the runner can put on a strip is an [`Effect`]. Standard effects
 animate until cancelled through their [`EffectControl`]; progress effects and
 solid fills render once and return.
*/

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time;

use crate::brightness::BrightnessManager;
use crate::color::Rgbw;
use crate::strip::Strip;
use crate::Result;

pub mod progress;
pub mod standard;

/// Cancellation sentinel, never carries data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stop;

/// Sending half of the effect control channel, held by the runner
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: mpsc::UnboundedSender<Stop>,
}

impl StopSignal {
    /// Ask the effect to stop at its next frame boundary
    pub fn stop(&self) -> bool {
        self.tx.send(Stop).is_ok()
    }
}

/// Receiving half of the effect control channel, polled by effects
#[derive(Debug)]
pub struct EffectControl {
    rx: mpsc::UnboundedReceiver<Stop>,
    stopped: bool,
}

impl EffectControl {
    /// Create a connected signal/control pair
    pub fn channel() -> (StopSignal, EffectControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            StopSignal { tx },
            EffectControl { rx, stopped: false },
        )
    }

    /// Whether a stop has been requested
    ///
    /// A closed channel counts as a stop.
    pub fn is_stopped(&mut self) -> bool {
        if !self.stopped {
            match self.rx.try_recv() {
                Ok(Stop) | Err(TryRecvError::Disconnected) => self.stopped = true,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.stopped
    }

    /// Sleep between two frames
    ///
    /// Returns `false` as soon as a stop is requested, before or during the
    /// sleep. Effects must return when this returns `false`.
    pub async fn sleep(&mut self, ms: u64) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = time::sleep(Duration::from_millis(ms)) => true,
            _ = self.rx.recv() => {
                self.stopped = true;
                false
            }
        }
    }

    /// Discard stale stop requests so the control can be handed to a new effect
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.stopped = false;
    }
}

/// The named standard animations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    #[serde(rename = "Solid Color")]
    SolidColor,
    #[serde(rename = "Color Wipe")]
    ColorWipe,
    #[serde(rename = "Color Wipe 2")]
    ColorWipe2,
    Pulse,
    Bounce,
    #[serde(rename = "Bounce Solo")]
    BounceSolo,
    Rainbow,
    #[serde(rename = "Rainbow Cycle")]
    RainbowCycle,
    Random,
    Blink,
    Crossover,
    #[serde(rename = "Bouncy Balls")]
    BouncyBalls,
}

impl EffectKind {
    pub const ALL: [EffectKind; 12] = [
        EffectKind::SolidColor,
        EffectKind::ColorWipe,
        EffectKind::ColorWipe2,
        EffectKind::Pulse,
        EffectKind::Bounce,
        EffectKind::BounceSolo,
        EffectKind::Rainbow,
        EffectKind::RainbowCycle,
        EffectKind::Random,
        EffectKind::Blink,
        EffectKind::Crossover,
        EffectKind::BouncyBalls,
    ];

    /// Display name, as used in settings
    pub const fn name(self) -> &'static str {
        match self {
            EffectKind::SolidColor => "Solid Color",
            EffectKind::ColorWipe => "Color Wipe",
            EffectKind::ColorWipe2 => "Color Wipe 2",
            EffectKind::Pulse => "Pulse",
            EffectKind::Bounce => "Bounce",
            EffectKind::BounceSolo => "Bounce Solo",
            EffectKind::Rainbow => "Rainbow",
            EffectKind::RainbowCycle => "Rainbow Cycle",
            EffectKind::Random => "Random",
            EffectKind::Blink => "Blink",
            EffectKind::Crossover => "Crossover",
            EffectKind::BouncyBalls => "Bouncy Balls",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The ways a 0-100 value can be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProgressEffectKind {
    #[default]
    #[serde(rename = "Progress Bar")]
    ProgressBar,
    Gradient,
    #[serde(rename = "Single Pixel")]
    SinglePixel,
}

impl ProgressEffectKind {
    pub const fn name(self) -> &'static str {
        match self {
            ProgressEffectKind::ProgressBar => "Progress Bar",
            ProgressEffectKind::Gradient => "Gradient",
            ProgressEffectKind::SinglePixel => "Single Pixel",
        }
    }
}

impl fmt::Display for ProgressEffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One fully parameterised effect, ready to render
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// A named animation in one color
    Standard {
        kind: EffectKind,
        color: Rgbw,
        delay: u64,
    },
    /// A 0-100 value drawn against a base color
    Progress {
        kind: ProgressEffectKind,
        value: u8,
        progress_color: Rgbw,
        base_color: Rgbw,
        reverse: bool,
    },
    /// A single solid frame, optionally at a fixed brightness
    Solid {
        color: Rgbw,
        brightness: Option<u8>,
    },
}

impl Effect {
    /// All pixels off
    pub const fn blank() -> Self {
        Effect::Solid {
            color: Rgbw::BLACK,
            brightness: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Effect::Standard { kind, .. } => kind.name(),
            Effect::Progress { kind, .. } => kind.name(),
            Effect::Solid { color, .. } if *color == Rgbw::BLACK => "Blank",
            Effect::Solid { .. } => "Solid",
        }
    }

    /// Render to `strip` until finished or stopped
    pub async fn render(
        &self,
        strip: &mut dyn Strip,
        control: &mut EffectControl,
        brightness: &BrightnessManager,
    ) -> Result<()> {
        match *self {
            Effect::Standard { kind, color, delay } => {
                standard::run(kind, strip, control, color, delay, brightness).await
            }
            Effect::Progress {
                kind,
                value,
                progress_color,
                base_color,
                reverse,
            } => {
                brightness.reset();
                progress::render(kind, strip, value, progress_color, base_color, reverse)
            }
            Effect::Solid {
                color,
                brightness: level,
            } => {
                match level {
                    Some(level) => brightness.set(level, false),
                    None => brightness.reset(),
                }
                crate::strip::fill(strip, color);
                strip.show()
            }
        }
    }
}
