/*!
 # Printer status tracking

 [`StatusTracker`] turns what the printer reports (events, progress, gcode
 traffic, temperatures, `@` commands) into [`StateMessage`]s for a runner.
 It also owns the torch and heating/cooling bookkeeping, which the runner
 knows nothing about.
*/

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::message::{CustomEffect, Mode, ProgressMode, StateMessage};
use crate::runner::RunnerHandle;
use crate::settings::{GcodeMatch, Heater, Settings, TriggerSettings};
use crate::Result;

/// Blocking temperature gcodes and the heater they wait for
const BLOCKING_TEMP_GCODES: [(&str, Heater); 2] = [("M109", Heater::Tool), ("M190", Heater::Bed)];

/// One heater reading, degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub actual: f64,
    #[serde(default)]
    pub target: f64,
}

/// Something the printer reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PrinterEvent {
    Connected,
    Disconnected,
    PrintStarted,
    PrintDone,
    PrintFailed,
    PrintPaused,
    PrintResumed,
    /// Print progress, percent
    Progress { progress: i32 },
    /// A gcode line about to be sent, with its G/M code
    Gcode { gcode: String, command: String },
    /// Heater readings keyed `T0`, `T1`, ..., `B`
    Temperatures {
        temperatures: BTreeMap<String, Temperature>,
    },
    /// An `@` host command, e.g. `@WS LIGHTSON`
    AtCommand {
        command: String,
        #[serde(default)]
        params: String,
    },
    Lights { on: bool },
    Torch { on: bool },
    /// Any other event, only used by custom triggers
    Other { name: String },
}

impl PrinterEvent {
    /// Event name as matched by custom event triggers
    pub fn name(&self) -> &str {
        match self {
            PrinterEvent::Connected => "Connected",
            PrinterEvent::Disconnected => "Disconnected",
            PrinterEvent::PrintStarted => "PrintStarted",
            PrinterEvent::PrintDone => "PrintDone",
            PrinterEvent::PrintFailed => "PrintFailed",
            PrinterEvent::PrintPaused => "PrintPaused",
            PrinterEvent::PrintResumed => "PrintResumed",
            PrinterEvent::Progress { .. } => "PrintProgress",
            PrinterEvent::Gcode { .. } => "Gcode",
            PrinterEvent::Temperatures { .. } => "Temperatures",
            PrinterEvent::AtCommand { .. } => "AtCommand",
            PrinterEvent::Lights { .. } => "Lights",
            PrinterEvent::Torch { .. } => "Torch",
            PrinterEvent::Other { name } => name,
        }
    }
}

/// What happened to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// The command was consumed and should not reach the printer
    Suppressed,
}

/// Custom triggers, compiled once
#[derive(Debug, Default)]
struct Triggers {
    at_command: Vec<(String, CustomEffect)>,
    event: Vec<(String, CustomEffect)>,
    gcode: Vec<(String, CustomEffect)>,
    exact: Vec<(String, CustomEffect)>,
    regex: Vec<(Regex, CustomEffect)>,
}

impl Triggers {
    fn new(settings: &Settings) -> Self {
        let mut triggers = Triggers::default();
        let entry = |t: &TriggerSettings| (t.pattern.clone(), t.custom_effect());

        triggers.at_command = settings
            .triggers
            .atcommand
            .iter()
            .map(|t| (t.pattern.to_uppercase(), t.custom_effect()))
            .collect();
        triggers.event = settings.triggers.event.iter().map(entry).collect();

        for trigger in &settings.triggers.gcode {
            match trigger.match_type {
                GcodeMatch::Gcode => triggers.gcode.push(entry(trigger)),
                GcodeMatch::Exact => triggers.exact.push(entry(trigger)),
                GcodeMatch::Regex => match Regex::new(&format!("^(?:{})", trigger.pattern)) {
                    Ok(regex) => triggers.regex.push((regex, trigger.custom_effect())),
                    Err(e) => warn!("Ignoring gcode trigger {:?}: {}", trigger.pattern, e),
                },
            }
        }
        triggers
    }

    /// Effects for a gcode line, at most one per match type
    fn on_gcode(&self, gcode: &str, command: &str) -> Vec<CustomEffect> {
        let by_gcode = self.gcode.iter().find(|(m, _)| m == gcode).map(|(_, e)| *e);
        let by_line = self.exact.iter().find(|(m, _)| m == command).map(|(_, e)| *e);
        let by_regex = self
            .regex
            .iter()
            .find(|(r, _)| r.is_match(command))
            .map(|(_, e)| *e);
        [by_gcode, by_line, by_regex].into_iter().flatten().collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LastTargets {
    tool: Option<f64>,
    bed: Option<f64>,
}

/// Printer-side state machine feeding a runner
#[derive(Debug)]
pub struct StatusTracker {
    settings: Settings,
    handle: RunnerHandle,
    triggers: Triggers,

    lights_on: bool,
    printing: bool,
    current_progress: i32,
    current: Option<StateMessage>,
    previous_event: Option<Mode>,

    heating: Option<Heater>,
    cooling: bool,
    last_targets: LastTargets,

    torch_on: bool,
    torch_until: Option<Instant>,
    parked: Option<StateMessage>,
    return_to_idle_at: Option<Instant>,
    idle_off_at: Option<Instant>,
    /// Lights were switched off by the idle timeout
    idle_timed_out: bool,
}

impl StatusTracker {
    pub fn new(settings: Settings, handle: RunnerHandle, lights_on: bool) -> Self {
        Self {
            triggers: Triggers::new(&settings),
            settings,
            handle,
            lights_on,
            printing: false,
            current_progress: 0,
            current: None,
            previous_event: None,
            heating: None,
            cooling: false,
            last_targets: LastTargets::default(),
            torch_on: false,
            torch_until: None,
            parked: None,
            return_to_idle_at: None,
            idle_off_at: None,
            idle_timed_out: false,
        }
    }

    pub fn lights_on(&self) -> bool {
        self.lights_on
    }

    pub fn torch_on(&self) -> bool {
        self.torch_on
    }

    pub fn is_heating(&self) -> bool {
        self.heating.is_some()
    }

    pub fn is_cooling(&self) -> bool {
        self.cooling
    }

    /// Last standard or progress message sent
    pub fn current(&self) -> Option<&StateMessage> {
        self.current.as_ref()
    }

    /// When [`StatusTracker::on_timer`] next has something to do
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.torch_until, self.return_to_idle_at, self.idle_off_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire expired timers: torch timeout, return to idle and idle timeout
    pub fn on_timer(&mut self, now: Instant) -> Result<()> {
        if self.torch_until.is_some_and(|t| t <= now) {
            self.torch_until = None;
            debug!("Torch timer expired");
            self.deactivate_torch()?;
        }
        if self.return_to_idle_at.is_some_and(|t| t <= now) {
            self.return_to_idle_at = None;
            debug!("Returning to idle after success");
            self.update(StateMessage::standard(Mode::Idle))?;
        }
        if self.idle_off_at.is_some_and(|t| t <= now) {
            self.idle_off_at = None;
            info!("Idle timeout, switching lights off");
            self.idle_timed_out = true;
            self.switch_lights(false)?;
        }
        Ok(())
    }

    /// Process one printer event
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub fn handle(&mut self, event: PrinterEvent) -> Result<Outcome> {
        let name = event.name().to_string();
        let outcome = match event {
            PrinterEvent::Connected => {
                self.event_mode(Mode::Idle)?;
                Outcome::Handled
            }
            PrinterEvent::Disconnected => {
                self.printing = false;
                self.event_mode(Mode::Disconnected)?;
                Outcome::Handled
            }
            PrinterEvent::PrintStarted => {
                self.cooling = false;
                self.printing = true;
                self.current_progress = 0;
                self.print_progress(0)?;
                Outcome::Handled
            }
            PrinterEvent::PrintDone => {
                self.printing = false;
                self.cooling = true;
                self.event_mode(Mode::Success)?;
                Outcome::Handled
            }
            PrinterEvent::PrintFailed => {
                self.printing = false;
                self.event_mode(Mode::Failed)?;
                Outcome::Handled
            }
            PrinterEvent::PrintPaused => {
                self.event_mode(Mode::Paused)?;
                Outcome::Handled
            }
            PrinterEvent::PrintResumed => {
                self.printing = true;
                self.update(StateMessage::progress(
                    ProgressMode::Print,
                    self.current_progress,
                ))?;
                Outcome::Handled
            }
            PrinterEvent::Progress { progress } => {
                self.print_progress(progress)?;
                Outcome::Handled
            }
            PrinterEvent::Gcode { gcode, command } => self.gcode(&gcode, &command)?,
            PrinterEvent::Temperatures { temperatures } => {
                self.temperatures(&temperatures)?;
                Outcome::Handled
            }
            PrinterEvent::AtCommand { command, params } => {
                self.at_command(&command, &params)?;
                Outcome::Handled
            }
            PrinterEvent::Lights { on } => {
                self.switch_lights(on)?;
                Outcome::Handled
            }
            PrinterEvent::Torch { on: true } => {
                self.activate_torch()?;
                Outcome::Handled
            }
            PrinterEvent::Torch { on: false } => {
                self.deactivate_torch()?;
                Outcome::Handled
            }
            PrinterEvent::Other { .. } => Outcome::Handled,
        };

        let effects: Vec<CustomEffect> = self
            .triggers
            .event
            .iter()
            .filter(|(m, _)| *m == name)
            .map(|(_, e)| *e)
            .collect();
        for effect in effects {
            self.handle.send(StateMessage::Custom(effect))?;
        }
        Ok(outcome)
    }

    /// Show the effect for a printer event and remember it for later restores
    fn event_mode(&mut self, mode: Mode) -> Result<()> {
        self.update(StateMessage::standard(mode))?;
        self.previous_event = Some(mode);
        Ok(())
    }

    fn print_progress(&mut self, progress: i32) -> Result<()> {
        let effects = &self.settings.effects;
        let success_showing = self.current == Some(StateMessage::standard(Mode::Success));
        if (progress == 100 && success_showing)
            || (self.heating.is_some() && effects.progress(ProgressMode::Heatup).enabled)
            || (self.cooling && effects.progress(ProgressMode::Cooling).enabled)
        {
            // Success usually arrives before the final 100%
            return Ok(());
        }

        if effects.standard(Mode::Printing).enabled {
            self.update(StateMessage::standard(Mode::Printing))?;
        } else {
            self.update(StateMessage::progress(ProgressMode::Print, progress))?;
        }
        self.current_progress = progress;
        Ok(())
    }

    /// Route a standard or progress message, parking it while the torch is on
    fn update(&mut self, msg: StateMessage) -> Result<()> {
        let is_torch = msg == StateMessage::standard(Mode::Torch);
        if self.torch_on && !is_torch {
            debug!(?msg, "Torch on, parking effect");
            self.parked = Some(msg);
            return Ok(());
        }

        let enabled = match &msg {
            StateMessage::Standard { mode } => self.settings.effects.standard(*mode).enabled,
            StateMessage::Progress { mode, .. } => self.settings.effects.progress(*mode).enabled,
            _ => true,
        };
        if !enabled {
            return Ok(());
        }

        // New effects take priority over a pending return to idle or idle timeout
        self.return_to_idle_at = None;
        self.idle_off_at = None;
        let timeout = self.settings.effects.idle.timeout;
        if msg == StateMessage::standard(Mode::Idle) && timeout > 0 {
            self.idle_off_at = Some(Instant::now() + Duration::from_secs(timeout));
        } else if self.idle_timed_out {
            self.idle_timed_out = false;
            self.switch_lights(true)?;
        }
        if msg == StateMessage::standard(Mode::Success) {
            let seconds = self.settings.effects.success.return_to_idle;
            if seconds > 0 {
                self.return_to_idle_at = Some(Instant::now() + Duration::from_secs(seconds));
            }
        }

        debug!(?msg, "Updating effect");
        self.handle.send(msg.clone())?;
        if !is_torch {
            self.current = Some(msg);
        }
        Ok(())
    }

    /// Put back the effect of the last printer event, once
    fn restore_previous_event(&mut self) -> Result<()> {
        match self.previous_event.take() {
            Some(mode) => self.update(StateMessage::standard(mode)),
            None => Ok(()),
        }
    }

    fn gcode(&mut self, gcode: &str, command: &str) -> Result<Outcome> {
        if let Some((_, heater)) = BLOCKING_TEMP_GCODES.iter().find(|(g, _)| *g == gcode) {
            let heatup = &self.settings.effects.progress_heatup;
            let enabled = match heater {
                Heater::Tool => heatup.tool_enabled,
                Heater::Bed => heatup.bed_enabled,
            };
            if enabled {
                debug!(?heater, "Tracking heating");
                self.heating = Some(*heater);
            }
        } else if gcode == "M150" && self.settings.features.intercept_m150 {
            self.handle.send(StateMessage::raw(command))?;
            return Ok(Outcome::Suppressed);
        } else if self.heating.take().is_some() {
            debug!("Heating finished");
            if self.printing {
                self.print_progress(self.current_progress)?;
            } else {
                self.restore_previous_event()?;
            }
        }

        for effect in self.triggers.on_gcode(gcode, command) {
            self.handle.send(StateMessage::Custom(effect))?;
        }
        Ok(Outcome::Handled)
    }

    fn heater_key(&self, heater: Heater) -> String {
        match heater {
            Heater::Tool => format!("T{}", self.settings.effects.progress_heatup.tool_key),
            Heater::Bed => "B".to_string(),
        }
    }

    fn temperatures(&mut self, readings: &BTreeMap<String, Temperature>) -> Result<()> {
        // Targets are dropped to zero at the end of a print, cooling needs the last one
        let tool = readings.get(&self.heater_key(Heater::Tool));
        let bed = readings.get(&self.heater_key(Heater::Bed));
        if let Some(t) = tool.filter(|t| t.target > 0.0) {
            self.last_targets.tool = Some(t.target);
        }
        if let Some(b) = bed.filter(|b| b.target > 0.0) {
            self.last_targets.bed = Some(b.target);
        }

        if self.heating.is_none() && !self.cooling {
            return Ok(());
        }
        let baseline = self.settings.features.progress_temp_start;

        if let Some(heater) = self.heating {
            let Some(reading) = readings.get(&self.heater_key(heater)) else {
                error!(
                    "Heater {} not found, can't show heating progress",
                    self.heater_key(heater)
                );
                self.heating = None;
                return self.restore_previous_event();
            };
            if reading.actual > reading.target {
                self.heating = None;
                return self.restore_previous_event();
            }
            let value = heating_progress(reading.actual, reading.target, baseline);
            return self.update(StateMessage::progress(ProgressMode::Heatup, value));
        }

        let cooling = &self.settings.effects.progress_cooling;
        let (heater, threshold) = (cooling.bed_or_tool, cooling.threshold);
        let Some(reading) = readings.get(&self.heater_key(heater)) else {
            error!(
                "Heater {} not found, can't show cooling progress",
                self.heater_key(heater)
            );
            self.cooling = false;
            return self.restore_previous_event();
        };
        if reading.actual < threshold {
            debug!("Cooled below {}, stopping cooling progress", threshold);
            self.cooling = false;
            return self.restore_previous_event();
        }

        let target = match heater {
            Heater::Tool => self.last_targets.tool,
            Heater::Bed => self.last_targets.bed,
        }
        .unwrap_or(0.0);
        let value = heating_progress(reading.actual, target, baseline);
        self.update(StateMessage::progress(ProgressMode::Cooling, value))
    }

    fn at_command(&mut self, command: &str, params: &str) -> Result<()> {
        if !self.settings.features.at_command_reaction {
            return Ok(());
        }
        let command = command.trim().to_uppercase();
        let toggle = self.settings.effects.torch.toggle;

        if command == "WS" {
            let params = params.trim().to_uppercase();
            match params.as_str() {
                "LIGHTSON" => self.switch_lights(true)?,
                "LIGHTSOFF" => self.switch_lights(false)?,
                "LIGHTSTOGGLE" => self.switch_lights(!self.lights_on)?,
                "TORCH" | "TORCH_ON" => self.activate_torch()?,
                "TORCH_OFF" if toggle => self.deactivate_torch()?,
                other => {
                    if let Some(name) = other.strip_prefix("CUSTOM") {
                        self.custom_at_command(name.trim())?;
                    } else {
                        debug!("Unknown @WS command {:?}", other);
                    }
                }
            }
        } else if command.starts_with("WS_") {
            match command.as_str() {
                "WS_LIGHTSON" => self.switch_lights(true)?,
                "WS_LIGHTSOFF" => self.switch_lights(false)?,
                "WS_TORCH" | "WS_TORCH_ON" => self.activate_torch()?,
                "WS_TORCH_OFF" if toggle => self.deactivate_torch()?,
                _ => return Ok(()),
            }
            warn!(
                "Deprecated @ command {} used, use `@WS {}` instead",
                command,
                command.trim_start_matches("WS_")
            );
        }
        Ok(())
    }

    fn custom_at_command(&mut self, name: &str) -> Result<()> {
        let effects: Vec<CustomEffect> = self
            .triggers
            .at_command
            .iter()
            .filter(|(m, _)| m == name)
            .map(|(_, e)| *e)
            .collect();
        for effect in effects {
            self.handle.send(StateMessage::Custom(effect))?;
        }
        Ok(())
    }

    pub fn switch_lights(&mut self, on: bool) -> Result<()> {
        self.lights_on = on;
        self.handle.send(StateMessage::lights(on))?;
        info!("Switched lights, on: {}", on);
        Ok(())
    }

    pub fn activate_torch(&mut self) -> Result<()> {
        self.torch_until = None;
        let torch = self.settings.effects.torch;

        if !self.torch_on {
            self.parked = self.current.clone();
        }
        if torch.toggle {
            debug!("Torch toggling on");
        } else {
            debug!("Torch timer started for {} secs", torch.timer);
            self.torch_until = Some(Instant::now() + Duration::from_secs(torch.timer));
        }

        self.update(StateMessage::standard(Mode::Torch))?;
        self.torch_on = true;
        Ok(())
    }

    pub fn deactivate_torch(&mut self) -> Result<()> {
        debug!("Deactivating torch mode");
        self.torch_until = None;
        if self.torch_on {
            self.torch_on = false;
            if let Some(msg) = self.parked.take() {
                self.update(msg)?;
            }
        }
        Ok(())
    }
}

/// Percentage of the way from `baseline` to `target`
///
/// Readings below the baseline count as the baseline. A target at or below
/// the baseline cannot be tracked and yields 0.
pub fn heating_progress(current: f64, target: f64, baseline: f64) -> i32 {
    let current = (current - baseline).max(0.0);
    let target = (target - baseline).max(0.0);
    if target == 0.0 {
        warn!("Tried to calculate heating progress but target was zero");
        return 0;
    }
    (current / target * 100.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heating_progress() {
        assert_eq!(heating_progress(100.0, 200.0, 0.0), 50);
        assert_eq!(heating_progress(0.0, 200.0, 0.0), 0);
        assert_eq!(heating_progress(110.0, 210.0, 10.0), 50);
        // Below the baseline
        assert_eq!(heating_progress(5.0, 210.0, 10.0), 0);
        // Zero target is not a division fault
        assert_eq!(heating_progress(25.0, 0.0, 0.0), 0);
        assert_eq!(heating_progress(25.0, 10.0, 20.0), 0);
    }

    #[test]
    fn test_event_json() {
        let event: PrinterEvent = serde_json::from_str(
            r#"{"event":"temperatures","temperatures":{"T0":{"actual":20.5,"target":210}}}"#,
        )
        .unwrap();
        let PrinterEvent::Temperatures { temperatures } = event else {
            panic!("wrong variant");
        };
        assert_eq!(temperatures["T0"].target, 210.0);

        let event: PrinterEvent =
            serde_json::from_str(r#"{"event":"at_command","command":"WS","params":"TORCH"}"#)
                .unwrap();
        assert_eq!(event.name(), "AtCommand");
    }
}
