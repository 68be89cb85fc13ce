/*!
 # Settings

 The full configuration tree, loaded once at startup. Every field has a
 default, so a partial JSON file is enough.
*/

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

use crate::color::{percent_of_255, ColorCorrection, Rgb};
use crate::effects::{EffectKind, ProgressEffectKind};
use crate::message::{CustomEffect, Mode, ProgressMode};
use crate::schedule::ActiveTimes;
use crate::segments::SegmentSpec;
use crate::strip::StripType;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub strip: StripSettings,
    pub effects: EffectsSettings,
    pub features: FeaturesSettings,
    pub triggers: TriggersSettings,
}

impl Settings {
    /// Load settings from a JSON file
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let settings = Self::from_json(&text)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Configured brightness on the 0-255 scale
    pub fn max_brightness(&self) -> u8 {
        percent_of_255(self.strip.brightness)
    }

    pub fn color_correction(&self) -> ColorCorrection {
        ColorCorrection {
            red: self.strip.adjustment.red,
            green: self.strip.adjustment.green,
            blue: self.strip.adjustment.blue,
            white_override: self.strip.white_override,
            white_brightness: self.strip.white_brightness,
        }
    }

    /// Segment specs in id order, the default segment first
    pub fn segment_specs(&self) -> Vec<SegmentSpec> {
        let start = usize::from(self.features.sacrifice_pixel);
        let mut specs = vec![SegmentSpec::new(start, self.strip.count)];
        specs.extend(self.features.segments.iter().copied());
        specs
    }

    /// Active times window, `None` when the feature is disabled
    pub fn active_times(&self) -> Result<Option<ActiveTimes>> {
        let times = &self.features.active_times;
        if !times.enabled {
            return Ok(None);
        }
        ActiveTimes::parse(&times.start, &times.end).map(Some)
    }

    /// Fade duration in ms, `None` when fading is disabled
    pub fn fade_time(&self) -> Option<u64> {
        let fade = &self.features.transitions.fade;
        fade.enabled.then_some(fade.time)
    }

    /// Human readable dump of the whole tree, for debug logs
    pub fn describe(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unprintable: {e}>"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripSettings {
    /// Number of pixels
    pub count: usize,
    /// Draw progress from the far end
    pub reverse: bool,
    /// Maximum brightness, percent
    pub brightness: u8,
    pub adjustment: Adjustment,
    pub white_override: bool,
    /// White channel level for the override, percent
    pub white_brightness: u8,
    #[serde(rename = "type")]
    pub strip_type: StripType,
    pub driver: DriverSettings,
}

impl Default for StripSettings {
    fn default() -> Self {
        Self {
            count: 24,
            reverse: false,
            brightness: 50,
            adjustment: Adjustment::default(),
            white_override: false,
            white_brightness: 50,
            strip_type: StripType::default(),
            driver: DriverSettings::default(),
        }
    }
}

/// Per-channel color correction, percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adjustment {
    #[serde(rename = "R")]
    pub red: u8,
    #[serde(rename = "G")]
    pub green: u8,
    #[serde(rename = "B")]
    pub blue: u8,
}

impl Default for Adjustment {
    fn default() -> Self {
        Self {
            red: 100,
            green: 100,
            blue: 100,
        }
    }
}

/// Which strip driver to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DriverSettings {
    /// WS281x/SK6812 on a spidev bus
    Spi {
        #[serde(default = "default_spi_device")]
        device: PathBuf,
    },
    /// WLED over its UDP realtime protocol
    Wled {
        host: String,
        #[serde(default = "default_wled_port")]
        port: u16,
    },
    /// No hardware
    Memory,
}

impl Default for DriverSettings {
    fn default() -> Self {
        DriverSettings::Spi {
            device: default_spi_device(),
        }
    }
}

fn default_spi_device() -> PathBuf {
    PathBuf::from("/dev/spidev0.0")
}

fn default_wled_port() -> u16 {
    crate::strip::wled::DEFAULT_PORT
}

/// Accept `75` as well as `"75"`
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// A standard effect slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub enabled: bool,
    pub effect: EffectKind,
    pub color: Rgb,
    /// Milliseconds between frames
    #[serde(deserialize_with = "number_or_string")]
    pub delay: u64,
}

impl EffectSettings {
    const fn new(enabled: bool, effect: EffectKind, color: Rgb, delay: u64) -> Self {
        Self {
            enabled,
            effect,
            color,
            delay,
        }
    }
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self::new(true, EffectKind::SolidColor, Rgb::WHITE, 75)
    }
}

/// A progress slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    pub enabled: bool,
    pub effect: ProgressEffectKind,
    /// Color of the completed part
    pub color: Rgb,
    /// Color of the rest
    pub base: Rgb,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            effect: ProgressEffectKind::ProgressBar,
            color: Rgb::new(0, 255, 0),
            base: Rgb::BLACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessSettings {
    #[serde(flatten)]
    pub effect: EffectSettings,
    /// Seconds before returning to idle, 0 to stay
    #[serde(deserialize_with = "number_or_string")]
    pub return_to_idle: u64,
}

impl Default for SuccessSettings {
    fn default() -> Self {
        Self {
            effect: EffectSettings::new(true, EffectKind::Rainbow, Rgb::BLACK, 25),
            return_to_idle: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleSettings {
    #[serde(flatten)]
    pub effect: EffectSettings,
    /// Seconds of idle before the lights switch off, 0 to never
    #[serde(deserialize_with = "number_or_string")]
    pub timeout: u64,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            effect: EffectSettings::new(true, EffectKind::ColorWipe2, Rgb::new(0, 255, 0), 75),
            timeout: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorchSettings {
    #[serde(flatten)]
    pub effect: EffectSettings,
    /// `true`: on/off commands, `false`: switch off after `timer`
    pub toggle: bool,
    /// Seconds the torch stays on in timer mode
    #[serde(deserialize_with = "number_or_string")]
    pub timer: u64,
}

impl Default for TorchSettings {
    fn default() -> Self {
        Self {
            effect: EffectSettings::new(true, EffectKind::SolidColor, Rgb::WHITE, 1),
            toggle: false,
            timer: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatupSettings {
    #[serde(flatten)]
    pub progress: ProgressSettings,
    pub tool_enabled: bool,
    pub bed_enabled: bool,
    /// Tool index shown, as in `T0`
    pub tool_key: u32,
}

impl Default for HeatupSettings {
    fn default() -> Self {
        Self {
            progress: ProgressSettings {
                color: Rgb::new(255, 0, 0),
                base: Rgb::new(0, 0, 255),
                ..ProgressSettings::default()
            },
            tool_enabled: true,
            bed_enabled: true,
            tool_key: 0,
        }
    }
}

/// Heater followed while cooling down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Heater {
    #[default]
    Tool,
    Bed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingSettings {
    #[serde(flatten)]
    pub progress: ProgressSettings,
    pub bed_or_tool: Heater,
    /// Tracking stops below this temperature
    pub threshold: f64,
}

impl Default for CoolingSettings {
    fn default() -> Self {
        Self {
            progress: ProgressSettings {
                color: Rgb::new(255, 0, 0),
                base: Rgb::new(0, 0, 255),
                ..ProgressSettings::default()
            },
            bed_or_tool: Heater::Tool,
            threshold: 40.0,
        }
    }
}

/// One slot per mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsSettings {
    pub startup: EffectSettings,
    pub idle: IdleSettings,
    pub disconnected: EffectSettings,
    pub failed: EffectSettings,
    pub success: SuccessSettings,
    pub paused: EffectSettings,
    pub printing: EffectSettings,
    pub torch: TorchSettings,
    pub progress_print: ProgressSettings,
    pub progress_heatup: HeatupSettings,
    pub progress_cooling: CoolingSettings,
}

impl Default for EffectsSettings {
    fn default() -> Self {
        let green = Rgb::new(0, 255, 0);
        Self {
            startup: EffectSettings::new(true, EffectKind::ColorWipe, green, 75),
            idle: IdleSettings::default(),
            disconnected: EffectSettings::new(true, EffectKind::RainbowCycle, Rgb::BLACK, 25),
            failed: EffectSettings::new(true, EffectKind::Pulse, Rgb::new(255, 0, 0), 10),
            success: SuccessSettings::default(),
            paused: EffectSettings::new(true, EffectKind::Bounce, Rgb::new(0, 0, 255), 40),
            printing: EffectSettings::new(false, EffectKind::SolidColor, Rgb::WHITE, 1),
            torch: TorchSettings::default(),
            progress_print: ProgressSettings::default(),
            progress_heatup: HeatupSettings::default(),
            progress_cooling: CoolingSettings::default(),
        }
    }
}

impl EffectsSettings {
    pub fn standard(&self, mode: Mode) -> &EffectSettings {
        match mode {
            Mode::Startup => &self.startup,
            Mode::Idle => &self.idle.effect,
            Mode::Disconnected => &self.disconnected,
            Mode::Failed => &self.failed,
            Mode::Success => &self.success.effect,
            Mode::Paused => &self.paused,
            Mode::Printing => &self.printing,
            Mode::Torch => &self.torch.effect,
        }
    }

    pub fn progress(&self, mode: ProgressMode) -> &ProgressSettings {
        match mode {
            ProgressMode::Print => &self.progress_print,
            ProgressMode::Heatup => &self.progress_heatup.progress,
            ProgressMode::Cooling => &self.progress_cooling.progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesSettings {
    /// Skip the first pixel, used as a level shifter on some builds
    pub sacrifice_pixel: bool,
    /// Extra segments, ids 2 and up
    pub segments: Vec<SegmentSpec>,
    pub active_times: ActiveTimesSettings,
    pub transitions: TransitionSettings,
    /// Heating progress baseline temperature
    pub progress_temp_start: f64,
    pub intercept_m150: bool,
    pub at_command_reaction: bool,
    pub debug_logging: bool,
}

impl Default for FeaturesSettings {
    fn default() -> Self {
        Self {
            sacrifice_pixel: false,
            segments: Vec::new(),
            active_times: ActiveTimesSettings::default(),
            transitions: TransitionSettings::default(),
            progress_temp_start: 0.0,
            intercept_m150: true,
            at_command_reaction: true,
            debug_logging: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveTimesSettings {
    pub enabled: bool,
    /// `HH:MM`
    pub start: String,
    /// `HH:MM`
    pub end: String,
}

impl Default for ActiveTimesSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "09:00".to_string(),
            end: "21:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    pub fade: FadeSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FadeSettings {
    pub enabled: bool,
    /// Fade duration in ms
    #[serde(deserialize_with = "number_or_string")]
    pub time: u64,
}

impl Default for FadeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            time: 1000,
        }
    }
}

/// How a gcode trigger is matched against the printer traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GcodeMatch {
    /// The G/M code only, e.g. `G28`
    #[default]
    Gcode,
    /// The whole line
    Exact,
    /// A regex matched at the start of the line
    Regex,
}

impl fmt::Display for GcodeMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GcodeMatch::Gcode => "gcode",
            GcodeMatch::Exact => "exact",
            GcodeMatch::Regex => "regex",
        };
        f.write_str(name)
    }
}

/// A custom trigger and the effect it shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSettings {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub match_type: GcodeMatch,
    pub effect: EffectKind,
    pub color: Rgb,
    #[serde(deserialize_with = "number_or_string")]
    pub delay: u64,
}

impl TriggerSettings {
    pub fn custom_effect(&self) -> CustomEffect {
        CustomEffect {
            effect: self.effect,
            color: self.color,
            delay: self.delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggersSettings {
    pub atcommand: Vec<TriggerSettings>,
    pub event: Vec<TriggerSettings>,
    pub gcode: Vec<TriggerSettings>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.strip.count, 24);
        assert_eq!(settings.max_brightness(), 128);
        assert_eq!(settings.fade_time(), Some(1000));
        assert!(settings.active_times().unwrap().is_none());
        assert!(!settings.effects.standard(Mode::Printing).enabled);
        assert_eq!(settings.effects.standard(Mode::Idle).effect, EffectKind::ColorWipe2);
        assert_eq!(settings.segment_specs(), vec![SegmentSpec::new(0, 24)]);
    }

    #[test]
    fn test_partial_json() {
        let settings = Settings::from_json(
            r##"{
                "strip": {"count": 10, "brightness": 100, "driver": {"type": "memory"}},
                "effects": {
                    "idle": {"effect": "Blink", "color": "#0000ff", "delay": "250", "timeout": "600"},
                    "torch": {"toggle": true, "timer": "30"}
                },
                "features": {"sacrifice_pixel": true, "segments": [{"start": 0, "end": 5}]}
            }"##,
        )
        .unwrap();

        assert_eq!(settings.max_brightness(), 255);
        assert_eq!(settings.strip.driver, DriverSettings::Memory);
        let idle = settings.effects.standard(Mode::Idle);
        assert_eq!(idle.effect, EffectKind::Blink);
        assert_eq!(idle.color, Rgb::new(0, 0, 255));
        assert_eq!(idle.delay, 250);
        assert!(idle.enabled);
        assert_eq!(settings.effects.idle.timeout, 600);
        assert!(settings.effects.torch.toggle);
        assert_eq!(settings.effects.torch.timer, 30);
        assert_eq!(
            settings.segment_specs(),
            vec![SegmentSpec::new(1, 10), SegmentSpec::new(0, 5)]
        );
    }

    #[test]
    fn test_invalid_color_is_config_error() {
        let result = Settings::from_json(r#"{"effects": {"idle": {"color": "green"}}}"#);
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_triggers() {
        let settings = Settings::from_json(
            r##"{"triggers": {"gcode": [
                {"match": "G28", "effect": "Rainbow", "color": "#ffffff", "delay": 20},
                {"match": "^M117", "match_type": "regex", "effect": "Blink", "color": "#ff0000", "delay": 500}
            ]}}"##,
        )
        .unwrap();
        let gcode = &settings.triggers.gcode;
        assert_eq!(gcode[0].match_type, GcodeMatch::Gcode);
        assert_eq!(gcode[1].match_type, GcodeMatch::Regex);
        assert_eq!(gcode[1].custom_effect().delay, 500);
    }
}
