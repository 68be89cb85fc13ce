/*!
 # Effect runner

 The runner owns the strip. It receives [`StateMessage`]s in order, decides
 what should be showing, and supervises the one effect task allowed to draw.

 Starting an effect always stops the previous one first: a stop is signalled
 on the control channel, the runner waits for the task to return, drains any
 stale signal and only then spawns the new effect.
*/

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::brightness::{BrightnessManager, FadeDirection};
use crate::color::{ColorCorrection, Rgb, Rgbw};
use crate::effects::{Effect, EffectControl, StopSignal};
use crate::message::{CustomEffect, EffectState, Mode, ProgressMode, RawOverride, StateMessage};
use crate::schedule::ActiveTimer;
use crate::segments::{Segment, SegmentManager};
use crate::settings::Settings;
use crate::strip::{share, SharedStrip, Strip};
use crate::{Error, Result};

/// How long a stopping effect may take before it is aborted
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What is driving the strip right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Blank,
    Standard(Mode),
    Progress(ProgressMode, u8),
    RawOverride(Rgbw),
    Custom(CustomEffect),
    Terminated,
}

enum Next {
    Message(Option<StateMessage>),
    /// The fade out finished, `true` when its task failed
    TurnOff(bool),
}

/// Cloneable sender into a runner
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    tx: UnboundedSender<StateMessage>,
}

impl RunnerHandle {
    /// A handle whose messages are read by the caller instead of a runner
    pub fn detached() -> (Self, UnboundedReceiver<StateMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for the runner
    pub fn send(&self, msg: StateMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::RunnerClosed)
    }

    /// Ask the runner to blank the strip and exit
    pub fn kill(&self) -> Result<()> {
        self.send(StateMessage::Kill)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct EffectRunner {
    settings: Settings,
    correction: ColorCorrection,
    strip: SharedStrip,
    segments: SegmentManager,
    target: Segment,
    brightness: Arc<BrightnessManager>,
    active_timer: ActiveTimer,

    inbound: UnboundedReceiver<StateMessage>,
    weak_sender: WeakUnboundedSender<StateMessage>,

    signal: StopSignal,
    control: Option<EffectControl>,
    task: Option<JoinHandle<EffectControl>>,
    stop_timeout: Duration,
    fades: Vec<JoinHandle<()>>,
    /// Fade-out that blanks the strip once it completes
    pending_off: Option<JoinHandle<()>>,

    lights_on: bool,
    previous: EffectState,
    previous_override: Option<RawOverride>,
    state: RunnerState,
}

impl std::fmt::Debug for EffectRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRunner")
            .field("state", &self.state)
            .field("previous", &self.previous)
            .field("lights_on", &self.lights_on)
            .field("segments", &self.segments)
            .field("brightness", &self.brightness)
            .field("active_timer", &self.active_timer)
            .finish()
    }
}

impl EffectRunner {
    /// Start the strip and build a runner around it
    ///
    /// Fails when the strip does not start or the segment layout does not
    /// fit; neither is worth retrying.
    #[instrument(skip(settings, strip))]
    pub fn new(
        settings: Settings,
        mut strip: Box<dyn Strip>,
        previous: EffectState,
        lights_on: bool,
    ) -> Result<(Self, RunnerHandle)> {
        info!("Starting up LED strip");
        strip.begin().map_err(|e| {
            error!("Strip failed to start: {}", e);
            match e {
                Error::StripFailed(_) => e,
                other => Error::StripFailed(other.to_string()),
            }
        })?;
        info!("Strip startup complete");

        let strip = share(strip);
        let segments = SegmentManager::new(&strip, &settings.segment_specs()).map_err(|e| {
            error!("Segment configuration error: {}", e);
            e
        })?;
        let target = segments
            .get(1)
            .cloned()
            .ok_or_else(|| Error::InvalidSegment("no default segment".to_string()))?;

        let brightness = Arc::new(BrightnessManager::new(
            strip.clone(),
            settings.max_brightness(),
            settings.features.transitions.fade.time,
        ));
        let active_timer = ActiveTimer::new(settings.active_times()?);

        let (tx, inbound) = mpsc::unbounded_channel();
        let (signal, control) = EffectControl::channel();

        let runner = Self {
            correction: settings.color_correction(),
            settings,
            strip,
            segments,
            target,
            brightness,
            active_timer,
            inbound,
            weak_sender: tx.downgrade(),
            signal,
            control: Some(control),
            task: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            fades: Vec::new(),
            pending_off: None,
            lights_on,
            previous,
            previous_override: None,
            state: RunnerState::Blank,
        };
        Ok((runner, RunnerHandle { tx }))
    }

    /// Replace the active times timer, e.g. with one on a custom clock
    pub fn with_active_timer(mut self, timer: ActiveTimer) -> Self {
        self.active_timer = timer;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// The state restored after transient overrides
    pub fn previous_state(&self) -> EffectState {
        self.previous
    }

    pub fn lights_on(&self) -> bool {
        self.lights_on
    }

    pub fn segments(&self) -> &SegmentManager {
        &self.segments
    }

    pub fn brightness(&self) -> &Arc<BrightnessManager> {
        &self.brightness
    }

    /// Start up and process messages until killed
    pub async fn run(mut self) {
        self.startup().await;
        while self.step().await.is_continue() {}
    }

    /// Start the active times timer and restore the previous state
    #[instrument(skip(self))]
    pub async fn startup(&mut self) {
        let weak = self.weak_sender.clone();
        self.active_timer.start(move |on| {
            if let Some(tx) = weak.upgrade() {
                if tx.send(StateMessage::lights(on)).is_err() {
                    debug!("Runner gone, dropping active times switch");
                }
            }
        });

        if self.settings.features.debug_logging {
            debug!("Current settings:\n{}", self.settings.describe());
        } else {
            info!("Debug logging not enabled, enable it in the features settings when reporting issues");
        }

        if self.previous != EffectState::Blank {
            debug!(previous = ?self.previous, "Returning to previous state");
            self.restore_previous().await;
        }
        info!("Startup complete");
    }

    /// Wait for the next message (or the pending turn-off) and process it
    pub async fn step(&mut self) -> ControlFlow<()> {
        let next = match self.pending_off.as_mut() {
            Some(fade) => tokio::select! {
                msg = self.inbound.recv() => Next::Message(msg),
                result = fade => Next::TurnOff(result.is_err()),
            },
            None => Next::Message(self.inbound.recv().await),
        };

        match next {
            Next::TurnOff(failed) => {
                self.pending_off = None;
                if failed {
                    warn!("Fade out did not complete, turning off anyway");
                }
                self.lights_off().await;
                ControlFlow::Continue(())
            }
            Next::Message(Some(msg)) => self.handle(msg).await,
            Next::Message(None) => {
                warn!("All runner handles dropped, shutting down");
                self.kill().await;
                ControlFlow::Break(())
            }
        }
    }

    /// Process one message
    pub async fn handle(&mut self, msg: StateMessage) -> ControlFlow<()> {
        debug!(?msg, "New message");
        match msg {
            StateMessage::Kill => {
                self.kill().await;
                return ControlFlow::Break(());
            }
            StateMessage::Lights { on } => self.switch_lights(on).await,
            StateMessage::Standard { mode } => self.standard(mode).await,
            StateMessage::Progress { mode, value } => self.progress(mode, value).await,
            StateMessage::RawCommand { command } => self.raw_override(&command).await,
            StateMessage::Custom(effect) => self.custom(effect).await,
        }
        ControlFlow::Continue(())
    }

    fn rendering_allowed(&self) -> bool {
        self.lights_on && self.active_timer.is_active()
    }

    async fn restore_previous(&mut self) {
        match self.previous {
            EffectState::Blank => self.blank().await,
            EffectState::Standard { mode } => self.standard(mode).await,
            EffectState::Progress { mode, value } => self.progress(mode, i32::from(value)).await,
            EffectState::RawOverride => self.raw_override("M150").await,
            EffectState::Custom(effect) => self.custom(effect).await,
        }
    }

    async fn switch_lights(&mut self, on: bool) {
        // A pending turn-off already counts as off
        let currently_on = self.lights_on && self.pending_off.is_none();
        if on == currently_on {
            return;
        }

        info!("Switching lights {}", if on { "on" } else { "off" });
        if on {
            self.turn_lights_on().await;
        } else {
            self.turn_lights_off().await;
        }
    }

    async fn turn_lights_on(&mut self) {
        if !self.active_timer.is_active() {
            debug!("Lights on blocked by active times");
            self.restore_previous().await;
            return;
        }

        // The fade out is never cut short, the fade in queues behind it
        if let Some(fade) = self.pending_off.take() {
            self.fades.push(fade);
        }
        self.lights_on = true;

        if self.settings.fade_time().is_some() {
            self.brightness.set(0, false);
            self.start_fade(FadeDirection::In);
        }
        self.restore_previous().await;
    }

    async fn turn_lights_off(&mut self) {
        if self.settings.fade_time().is_some() {
            self.fades.retain(|fade| !fade.is_finished());
            self.pending_off = Some(self.brightness.spawn_fade(FadeDirection::Out));
        } else {
            self.lights_off().await;
        }
    }

    async fn lights_off(&mut self) {
        self.blank().await;
        self.lights_on = false;
    }

    fn start_fade(&mut self, direction: FadeDirection) {
        self.fades.retain(|fade| !fade.is_finished());
        self.fades.push(self.brightness.spawn_fade(direction));
    }

    async fn standard(&mut self, mode: Mode) {
        let settings = *self.settings.effects.standard(mode);
        if !settings.enabled {
            debug!("Effect for {} is disabled, ignoring", mode);
            return;
        }
        debug!("Changing effect to {}", mode);

        if !mode.is_transient() {
            self.previous = EffectState::Standard { mode };
        }
        let effect = Effect::Standard {
            kind: settings.effect,
            color: self.correction.apply(settings.color),
            delay: settings.delay,
        };
        self.show(effect, RunnerState::Standard(mode)).await;
    }

    async fn progress(&mut self, mode: ProgressMode, value: i32) {
        let settings = *self.settings.effects.progress(mode);
        if !settings.enabled {
            debug!("Effect for {} is disabled, ignoring", mode);
            return;
        }
        let value = value.clamp(0, 100) as u8;
        debug!("Changing effect to {}, {}%", mode, value);

        if !mode.is_transient() {
            self.previous = EffectState::Progress { mode, value };
        }
        let effect = Effect::Progress {
            kind: settings.effect,
            value,
            progress_color: self.correction.apply(settings.color),
            base_color: self.correction.apply(settings.base),
            reverse: self.settings.strip.reverse,
        };
        self.show(effect, RunnerState::Progress(mode, value)).await;
    }

    async fn raw_override(&mut self, command: &str) {
        match RawOverride::parse(command) {
            Some(parsed) => {
                debug!(
                    "Parsed new M150: R{} G{} B{} W{} (brightness: {:?})",
                    parsed.red, parsed.green, parsed.blue, parsed.white, parsed.brightness
                );
                self.previous_override = Some(parsed);
            }
            None => debug!("No parameters in {:?}, reusing the last M150", command),
        }
        let parsed = *self.previous_override.get_or_insert_with(RawOverride::default);
        self.previous = EffectState::RawOverride;

        let color = if parsed.white > 0 && self.correction.white_override {
            Rgbw::new(0, 0, 0, parsed.white)
        } else if parsed.white > 0 {
            self.correction
                .apply(Rgb::new(parsed.white, parsed.white, parsed.white))
        } else {
            self.correction.apply(parsed.rgb())
        };
        let effect = Effect::Solid {
            color,
            brightness: Some(parsed.brightness.unwrap_or(self.brightness.max_brightness())),
        };
        self.show(effect, RunnerState::RawOverride(color)).await;
    }

    async fn custom(&mut self, custom: CustomEffect) {
        debug!(?custom, "Changing to custom effect");
        self.previous = EffectState::Custom(custom);
        let effect = Effect::Standard {
            kind: custom.effect,
            color: self.correction.apply(custom.color),
            delay: custom.delay,
        };
        self.show(effect, RunnerState::Custom(custom)).await;
    }

    /// Render an effect, or blank the strip when the lights should be off
    async fn show(&mut self, effect: Effect, state: RunnerState) {
        if self.rendering_allowed() {
            let target = self.target.clone();
            self.run_effect(effect, target).await;
            self.state = state;
        } else {
            self.blank().await;
        }
    }

    async fn blank(&mut self) {
        debug!("Blanking LEDs");
        let target = self.target.clone();
        self.run_effect(Effect::blank(), target).await;
        self.state = RunnerState::Blank;
    }

    async fn run_effect(&mut self, effect: Effect, mut target: Segment) {
        self.stop_effect().await;

        let mut control = match self.control.take() {
            Some(control) => control,
            None => self.reset_control(),
        };
        let brightness = self.brightness.clone();
        let span = info_span!("effect", name = effect.name());

        self.task = Some(tokio::spawn(
            async move {
                if let Err(e) = effect.render(&mut target, &mut control, &brightness).await {
                    error!(?effect, "Error running effect: {}", e);
                }
                control
            }
            .instrument(span),
        ));
    }

    /// Stop the running effect and wait for it to exit
    async fn stop_effect(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        if !task.is_finished() {
            self.signal.stop();
        }

        match time::timeout(self.stop_timeout, &mut task).await {
            Ok(Ok(mut control)) => {
                control.drain();
                self.control = Some(control);
            }
            Ok(Err(e)) => {
                error!("Effect task failed: {}", e);
                let control = self.reset_control();
                self.control = Some(control);
            }
            Err(_) => {
                error!(
                    "Effect did not stop within {:?}, aborting it",
                    self.stop_timeout
                );
                task.abort();
                // Abort only lands at the next await point
                if time::timeout(self.stop_timeout, &mut task).await.is_err() {
                    warn!("Aborted effect is still running");
                }
                let control = self.reset_control();
                self.control = Some(control);
            }
        }
    }

    /// Replace the control channel, returning the new receiving half
    fn reset_control(&mut self) -> EffectControl {
        let (signal, control) = EffectControl::channel();
        self.signal = signal;
        control
    }

    /// Blank the whole strip and stop everything
    #[instrument(skip(self))]
    async fn kill(&mut self) {
        debug!("Kill message received, shutting down");
        for fade in self.fades.drain(..) {
            fade.abort();
        }
        if let Some(fade) = self.pending_off.take() {
            fade.abort();
        }
        self.stop_effect().await;

        match Segment::whole(self.strip.clone()) {
            Ok(whole) => {
                self.run_effect(Effect::blank(), whole).await;
                self.stop_effect().await;
            }
            Err(e) => error!("Could not blank the strip: {}", e),
        }

        self.active_timer.stop();
        self.state = RunnerState::Terminated;
        info!("Effect runner shutdown");
    }
}
