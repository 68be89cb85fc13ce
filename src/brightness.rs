/*!
 # Brightness management

 [`BrightnessManager`] is the only writer of the strip brightness. It owns the
 fade ramps and drops external writes while a fade is running.
*/

use std::f64::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, instrument, trace, warn};

use crate::strip::SharedStrip;

/// Time between two fade samples
pub const FADE_TICK: Duration = Duration::from_millis(20);

/// Polling interval while waiting for a running fade to finish
const FADE_WAIT: Duration = Duration::from_millis(10);

/// Which way a fade moves brightness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

/// Clears the fade flag when a fade finishes or is dropped mid-ramp
struct FadeGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for FadeGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct BrightnessManager {
    strip: SharedStrip,
    max_brightness: u8,
    current: AtomicU8,
    fade_active: Arc<AtomicBool>,
    fade_steps: Vec<u8>,
}

impl std::fmt::Debug for BrightnessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrightnessManager")
            .field("max_brightness", &self.max_brightness)
            .field("current", &self.current())
            .field("fade_active", &self.is_fading())
            .field("fade_steps", &self.fade_steps.len())
            .finish()
    }
}

impl BrightnessManager {
    /// Create a manager and precompute the fade table for `fade_time_ms`
    pub fn new(strip: SharedStrip, max_brightness: u8, fade_time_ms: u64) -> Self {
        Self {
            strip,
            max_brightness,
            current: AtomicU8::new(0),
            fade_active: Arc::new(AtomicBool::new(false)),
            fade_steps: fade_steps(max_brightness, fade_time_ms),
        }
    }

    pub fn max_brightness(&self) -> u8 {
        self.max_brightness
    }

    /// Brightness last written by the manager
    pub fn current(&self) -> u8 {
        self.current.load(Ordering::Acquire)
    }

    pub fn is_fading(&self) -> bool {
        self.fade_active.load(Ordering::Acquire)
    }

    /// Precomputed fade-in samples, fade-out walks them backwards
    pub fn fade_steps(&self) -> &[u8] {
        &self.fade_steps
    }

    /// Write a brightness value, optionally flushing the strip
    ///
    /// Ignored while a fade is running.
    pub fn set(&self, value: u8, show: bool) {
        if self.is_fading() {
            trace!(value, "Brightness write dropped during fade");
            return;
        }
        self.write(value, show);
    }

    /// Restore the configured maximum without flushing
    pub fn reset(&self) {
        if self.is_fading() {
            return;
        }
        self.current.store(self.max_brightness, Ordering::Release);
        self.strip.lock().set_brightness(self.max_brightness);
    }

    fn write(&self, value: u8, show: bool) {
        self.current.store(value, Ordering::Release);
        let mut strip = self.strip.lock();
        strip.set_brightness(value);
        if show {
            if let Err(e) = strip.show() {
                warn!("Failed to show brightness change: {}", e);
            }
        }
    }

    fn try_claim(&self) -> Option<FadeGuard> {
        self.fade_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FadeGuard {
                flag: self.fade_active.clone(),
            })
    }

    async fn claim(&self) -> FadeGuard {
        loop {
            if let Some(guard) = self.try_claim() {
                return guard;
            }
            time::sleep(FADE_WAIT).await;
        }
    }

    async fn ramp(&self, direction: FadeDirection, _guard: FadeGuard) {
        let steps: Vec<u8> = match direction {
            FadeDirection::In => self.fade_steps.clone(),
            FadeDirection::Out => self.fade_steps.iter().rev().copied().collect(),
        };
        for step in steps {
            self.write(step, true);
            time::sleep(FADE_TICK).await;
        }
        // The sine table stops one tick short of its target
        let target = match direction {
            FadeDirection::In => self.max_brightness,
            FadeDirection::Out => 0,
        };
        self.write(target, true);
        debug!(?direction, "Fade complete");
    }

    /// Fade brightness from zero up to the maximum
    ///
    /// Waits for a running fade to finish first.
    #[instrument(skip(self))]
    pub async fn fade_in(&self) {
        let guard = self.claim().await;
        self.ramp(FadeDirection::In, guard).await;
    }

    /// Fade brightness from the maximum down to zero
    #[instrument(skip(self))]
    pub async fn fade_out(&self) {
        let guard = self.claim().await;
        self.ramp(FadeDirection::Out, guard).await;
    }

    /// Run a fade in the background
    ///
    /// When no other fade is running the fade is claimed before returning, so
    /// brightness writes issued right after this call are already suppressed.
    pub fn spawn_fade(self: &Arc<Self>, direction: FadeDirection) -> JoinHandle<()> {
        let manager = self.clone();
        match self.try_claim() {
            Some(guard) => tokio::spawn(async move { manager.ramp(direction, guard).await }),
            None => tokio::spawn(async move {
                match direction {
                    FadeDirection::In => manager.fade_in().await,
                    FadeDirection::Out => manager.fade_out().await,
                }
            }),
        }
    }
}

/// Sine eased brightness samples, one per [`FADE_TICK`]
pub fn fade_steps(max_brightness: u8, fade_time_ms: u64) -> Vec<u8> {
    let count = fade_time_ms / FADE_TICK.as_millis() as u64;
    if count == 0 {
        return Vec::new();
    }
    let step = FRAC_PI_2 / count as f64;
    (0..count)
        .map(|i| ((i as f64 * step).sin() * f64::from(max_brightness)).round() as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::{share, MemoryStrip, Strip, StripEvent};

    #[test]
    fn test_fade_table() {
        let steps = fade_steps(255, 1000);
        assert_eq!(steps.len(), 50);
        assert_eq!(steps[0], 0);
        assert!(steps.windows(2).all(|w| w[0] <= w[1]));
        for (i, step) in steps.iter().enumerate() {
            let expected = ((i as f64 * FRAC_PI_2 / 50.0).sin() * 255.0).round() as u8;
            assert_eq!(*step, expected);
        }
    }

    #[test]
    fn test_short_fade_is_empty() {
        assert!(fade_steps(255, 10).is_empty());
    }

    #[test]
    fn test_set_and_reset() {
        let memory = MemoryStrip::new(3);
        let manager = BrightnessManager::new(share(Box::new(memory.clone())), 128, 1000);

        manager.set(10, true);
        assert_eq!(manager.current(), 10);
        assert_eq!(memory.shown_brightness(), 10);

        manager.reset();
        assert_eq!(manager.current(), 128);
        assert_eq!(memory.brightness(), 128);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_dropped_while_fading() {
        let memory = MemoryStrip::recording(2);
        let manager = Arc::new(BrightnessManager::new(
            share(Box::new(memory.clone())),
            255,
            100,
        ));

        let fade = manager.spawn_fade(FadeDirection::In);
        assert!(manager.is_fading());
        manager.set(3, true);
        fade.await.unwrap();

        assert!(!manager.is_fading());
        let brightness: Vec<u8> = memory
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StripEvent::Brightness(b) => Some(b),
                _ => None,
            })
            .collect();
        let mut expected = manager.fade_steps().to_vec();
        expected.push(255);
        assert_eq!(brightness, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_in_ends_at_max() {
        // 20ms gives a single sample of 0
        for fade_time in [20, 100, 1000] {
            let memory = MemoryStrip::new(1);
            let manager = BrightnessManager::new(share(Box::new(memory.clone())), 255, fade_time);
            manager.fade_in().await;
            assert_eq!(manager.current(), 255, "fade of {fade_time}ms");
            assert_eq!(memory.shown_brightness(), 255, "fade of {fade_time}ms");

            manager.fade_out().await;
            assert_eq!(memory.shown_brightness(), 0, "fade of {fade_time}ms");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_without_samples() {
        let memory = MemoryStrip::new(1);
        let manager = BrightnessManager::new(share(Box::new(memory.clone())), 180, 0);
        manager.fade_in().await;
        assert_eq!(memory.shown_brightness(), 180);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fades_never_interleave() {
        let memory = MemoryStrip::recording(1);
        let manager = Arc::new(BrightnessManager::new(
            share(Box::new(memory.clone())),
            200,
            200,
        ));

        let first = manager.spawn_fade(FadeDirection::In);
        let second = manager.spawn_fade(FadeDirection::Out);
        first.await.unwrap();
        second.await.unwrap();

        let brightness: Vec<u8> = memory
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StripEvent::Brightness(b) => Some(b),
                _ => None,
            })
            .collect();
        let mut expected = manager.fade_steps().to_vec();
        expected.push(200);
        expected.extend(manager.fade_steps().iter().rev());
        expected.push(0);
        assert_eq!(brightness, expected);
    }
}
