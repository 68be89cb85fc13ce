/*!
 # Runner messages

 [`StateMessage`] is everything the runner can be told. [`EffectState`] is
 what the runner remembers as "previous state" and what survives a restart.
*/

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::effects::EffectKind;

/// The named printer states with a standard effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Startup,
    Idle,
    Disconnected,
    Failed,
    Success,
    Paused,
    Printing,
    Torch,
}

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Startup,
        Mode::Idle,
        Mode::Disconnected,
        Mode::Failed,
        Mode::Success,
        Mode::Paused,
        Mode::Printing,
        Mode::Torch,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Mode::Startup => "startup",
            Mode::Idle => "idle",
            Mode::Disconnected => "disconnected",
            Mode::Failed => "failed",
            Mode::Success => "success",
            Mode::Paused => "paused",
            Mode::Printing => "printing",
            Mode::Torch => "torch",
        }
    }

    /// Transient modes are shown but never remembered
    pub const fn is_transient(self) -> bool {
        matches!(self, Mode::Torch)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Mode::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| crate::Error::General(format!("unknown mode {s}")))
    }
}

/// The states drawn as progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProgressMode {
    #[serde(rename = "progress_print")]
    Print,
    #[serde(rename = "progress_heatup")]
    Heatup,
    #[serde(rename = "progress_cooling")]
    Cooling,
}

impl ProgressMode {
    pub const ALL: [ProgressMode; 3] = [
        ProgressMode::Print,
        ProgressMode::Heatup,
        ProgressMode::Cooling,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ProgressMode::Print => "progress_print",
            ProgressMode::Heatup => "progress_heatup",
            ProgressMode::Cooling => "progress_cooling",
        }
    }

    /// Heating and cooling interrupt the display temporarily
    pub const fn is_transient(self) -> bool {
        matches!(self, ProgressMode::Heatup | ProgressMode::Cooling)
    }
}

impl fmt::Display for ProgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        ProgressMode::ALL
            .into_iter()
            .find(|m| m.name() == s || m.name().trim_start_matches("progress_") == s)
            .ok_or_else(|| crate::Error::General(format!("unknown progress mode {s}")))
    }
}

/// An effect picked by a custom trigger rather than by a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEffect {
    pub effect: EffectKind,
    pub color: Rgb,
    /// Milliseconds between frames
    pub delay: u64,
}

/// One instruction for the effect runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateMessage {
    /// Switch the lights on or off
    Lights { on: bool },
    /// Show the effect configured for a mode
    Standard { mode: Mode },
    /// Show a progress value, clamped to 0-100
    Progress { mode: ProgressMode, value: i32 },
    /// `M150` style raw color command
    RawCommand { command: String },
    /// Show an explicit effect
    Custom(CustomEffect),
    /// Blank the strip and stop the runner
    Kill,
}

impl StateMessage {
    pub fn lights(on: bool) -> Self {
        StateMessage::Lights { on }
    }

    pub fn standard(mode: Mode) -> Self {
        StateMessage::Standard { mode }
    }

    pub fn progress(mode: ProgressMode, value: i32) -> Self {
        StateMessage::Progress { mode, value }
    }

    pub fn raw(command: impl Into<String>) -> Self {
        StateMessage::RawCommand {
            command: command.into(),
        }
    }
}

/// The remembered "what should be showing"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectState {
    /// Nothing, the strip stays dark
    #[default]
    Blank,
    Standard {
        mode: Mode,
    },
    Progress {
        mode: ProgressMode,
        value: u8,
    },
    /// A raw override is showing, restored from the last parsed values
    RawOverride,
    Custom(CustomEffect),
}

impl EffectState {
    /// Message that puts this state back on the strip
    pub fn message(&self) -> Option<StateMessage> {
        match *self {
            EffectState::Blank => None,
            EffectState::Standard { mode } => Some(StateMessage::standard(mode)),
            EffectState::Progress { mode, value } => {
                Some(StateMessage::progress(mode, i32::from(value)))
            }
            EffectState::RawOverride => Some(StateMessage::raw("M150")),
            EffectState::Custom(effect) => Some(StateMessage::Custom(effect)),
        }
    }
}

/// Parsed `M150` parameters
///
/// Red, green and blue take priority over white: when any of them is given,
/// `W` is ignored. A lone `W` sets the white level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawOverride {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white: u8,
    /// `P` parameter, `None` means the configured maximum
    pub brightness: Option<u8>,
}

struct Params {
    red: Regex,
    green: Regex,
    blue: Regex,
    white: Regex,
    brightness: Regex,
}

static PARAMS: LazyLock<Params> = LazyLock::new(|| {
    let param = |letters: &str| {
        Regex::new(&format!(r"(?:^|[^A-Za-z])[{letters}](\d{{1,3}})"))
            .expect("M150 parameter pattern is valid")
    };
    Params {
        red: param("Rr"),
        green: param("GgUu"),
        blue: param("Bb"),
        white: param("Ww"),
        brightness: param("Pp"),
    }
});

fn capture(regex: &Regex, command: &str) -> Option<u8> {
    regex
        .captures(command)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .map(|v| v.min(255) as u8)
}

impl RawOverride {
    /// Parse an `M150` command
    ///
    /// Returns `None` when the command carries no recognised parameter, in
    /// which case the previous override should be reused.
    pub fn parse(command: &str) -> Option<Self> {
        let params = &*PARAMS;
        let args = command
            .trim()
            .strip_prefix("M150")
            .or_else(|| command.trim().strip_prefix("m150"))
            .unwrap_or(command);

        let red = capture(&params.red, args);
        let green = capture(&params.green, args);
        let blue = capture(&params.blue, args);
        let white = capture(&params.white, args);
        let brightness = capture(&params.brightness, args);

        if red.is_none()
            && green.is_none()
            && blue.is_none()
            && white.is_none()
            && brightness.is_none()
        {
            return None;
        }

        let mut parsed = RawOverride {
            red: red.unwrap_or(0),
            green: green.unwrap_or(0),
            blue: blue.unwrap_or(0),
            white: 0,
            brightness,
        };
        if red.is_none() && green.is_none() && blue.is_none() {
            parsed.white = white.unwrap_or(0);
        }
        Some(parsed)
    }

    pub fn rgb(&self) -> Rgb {
        Rgb::new(self.red, self.green, self.blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rgb() {
        let parsed = RawOverride::parse("M150 R10 G20 B30").unwrap();
        assert_eq!(parsed.rgb(), Rgb::new(10, 20, 30));
        assert_eq!(parsed.brightness, None);
        assert_eq!(parsed.white, 0);
    }

    #[test]
    fn test_parse_clamps_and_aliases() {
        let parsed = RawOverride::parse("M150 r300 U5 P128").unwrap();
        assert_eq!(parsed.rgb(), Rgb::new(255, 5, 0));
        assert_eq!(parsed.brightness, Some(128));
    }

    #[test]
    fn test_rgb_beats_white() {
        let parsed = RawOverride::parse("M150 R10 W200").unwrap();
        assert_eq!(parsed.rgb(), Rgb::new(10, 0, 0));
        assert_eq!(parsed.white, 0);

        let white = RawOverride::parse("M150 W200").unwrap();
        assert_eq!(white.white, 200);
        assert_eq!(white.rgb(), Rgb::BLACK);
    }

    #[test]
    fn test_every_parameter_letter() {
        let parsed = RawOverride::parse("m150 r1 g2 b3 p4").unwrap();
        assert_eq!(parsed.rgb(), Rgb::new(1, 2, 3));
        assert_eq!(parsed.brightness, Some(4));
        let white = RawOverride::parse("M150 w7").unwrap();
        assert_eq!(white.white, 7);
    }

    #[test]
    fn test_bare_command() {
        assert_eq!(RawOverride::parse("M150"), None);
        assert_eq!(RawOverride::parse("  M150 "), None);
        assert_eq!(RawOverride::parse("M150 X5"), None);
    }

    #[test]
    fn test_letters_inside_words_ignored() {
        // `AB12` must not read as B12
        assert_eq!(RawOverride::parse("M150 AB12"), None);
    }

    #[test]
    fn test_state_message_json() {
        let msg: StateMessage =
            serde_json::from_str(r#"{"type":"progress","mode":"progress_print","value":45}"#)
                .unwrap();
        assert_eq!(msg, StateMessage::progress(ProgressMode::Print, 45));

        let msg: StateMessage = serde_json::from_str(
            r##"{"type":"custom","effect":"Blink","color":"#ff0000","delay":100}"##,
        )
        .unwrap();
        assert_eq!(
            msg,
            StateMessage::Custom(CustomEffect {
                effect: EffectKind::Blink,
                color: Rgb::new(255, 0, 0),
                delay: 100,
            })
        );
    }

    #[test]
    fn test_state_restore_message() {
        assert_eq!(EffectState::Blank.message(), None);
        assert_eq!(
            EffectState::RawOverride.message(),
            Some(StateMessage::raw("M150"))
        );
        assert_eq!("cooling".parse::<ProgressMode>().unwrap(), ProgressMode::Cooling);
        assert_eq!("idle".parse::<Mode>().unwrap(), Mode::Idle);
    }
}
