/*!
 # In-memory strip

 A [`Strip`] that only keeps its pixels in a buffer. Used for dry runs
 without hardware and by the tests, which read back the last shown frame
 and the event log.
*/

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::Strip;
use crate::color::Rgbw;
use crate::{Error, Result};

/// Something that happened to a [`MemoryStrip`], in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripEvent {
    Pixel(usize, Rgbw),
    Show,
    Brightness(u8),
}

#[derive(Debug, Default)]
struct MemoryState {
    pixels: Vec<Rgbw>,
    shown: Vec<Rgbw>,
    brightness: u8,
    shown_brightness: u8,
    shows: usize,
    events: Option<Vec<StripEvent>>,
    fail_begin: bool,
}

impl MemoryState {
    fn record(&mut self, event: StripEvent) {
        if let Some(events) = self.events.as_mut() {
            events.push(event);
        }
    }
}

/// A strip that only exists in memory
///
/// Used for dry runs without hardware and as the instrumented strip in tests.
/// Clones share the same buffer, so a clone kept aside can observe what the
/// runner renders.
#[derive(Debug, Clone)]
pub struct MemoryStrip {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStrip {
    pub fn new(num_pixels: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                pixels: vec![Rgbw::BLACK; num_pixels],
                shown: vec![Rgbw::BLACK; num_pixels],
                brightness: 255,
                shown_brightness: 255,
                ..MemoryState::default()
            })),
        }
    }

    /// A memory strip that keeps a log of every write
    pub fn recording(num_pixels: usize) -> Self {
        let strip = Self::new(num_pixels);
        strip.state.lock().events = Some(Vec::new());
        strip
    }

    /// A memory strip whose `begin` fails, like a misconfigured driver
    pub fn failing(num_pixels: usize) -> Self {
        let strip = Self::new(num_pixels);
        strip.state.lock().fail_begin = true;
        strip
    }

    /// Current (possibly unshown) buffer
    pub fn pixels(&self) -> Vec<Rgbw> {
        self.state.lock().pixels.clone()
    }

    /// Buffer as of the last `show`
    pub fn shown(&self) -> Vec<Rgbw> {
        self.state.lock().shown.clone()
    }

    /// Brightness as of the last `show`
    pub fn shown_brightness(&self) -> u8 {
        self.state.lock().shown_brightness
    }

    pub fn show_count(&self) -> usize {
        self.state.lock().shows
    }

    /// Recorded events, empty unless created with [`MemoryStrip::recording`]
    pub fn events(&self) -> Vec<StripEvent> {
        self.state.lock().events.clone().unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Some(events) = self.state.lock().events.as_mut() {
            events.clear();
        }
    }
}

impl Strip for MemoryStrip {
    fn begin(&mut self) -> Result<()> {
        if self.state.lock().fail_begin {
            return Err(Error::StripFailed("memory strip configured to fail".into()));
        }
        self.show()
    }

    fn num_pixels(&self) -> usize {
        self.state.lock().pixels.len()
    }

    fn set_pixel_color(&mut self, index: usize, color: Rgbw) {
        let mut state = self.state.lock();
        if let Some(pixel) = state.pixels.get_mut(index) {
            *pixel = color;
            state.record(StripEvent::Pixel(index, color));
        }
    }

    fn show(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.shown = state.pixels.clone();
        state.shown_brightness = state.brightness;
        state.shows += 1;
        state.record(StripEvent::Show);
        trace!(brightness = state.brightness, frame = ?state.shown, "Memory strip show");
        Ok(())
    }

    fn set_brightness(&mut self, value: u8) {
        let mut state = self.state.lock();
        state.brightness = value;
        state.record(StripEvent::Brightness(value));
    }

    fn brightness(&self) -> u8 {
        self.state.lock().brightness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_buffer() {
        let strip = MemoryStrip::recording(3);
        let mut writer = strip.clone();

        writer.set_pixel_color(1, Rgbw::new(1, 2, 3, 0));
        writer.set_pixel_color(7, Rgbw::new(9, 9, 9, 0));
        assert_eq!(strip.pixels()[1], Rgbw::new(1, 2, 3, 0));
        assert_eq!(strip.shown()[1], Rgbw::BLACK);

        writer.show().unwrap();
        assert_eq!(strip.shown()[1], Rgbw::new(1, 2, 3, 0));
        assert_eq!(strip.show_count(), 1);
        assert_eq!(
            strip.events(),
            vec![StripEvent::Pixel(1, Rgbw::new(1, 2, 3, 0)), StripEvent::Show]
        );
    }

    #[test]
    fn test_failing_begin() {
        let mut strip = MemoryStrip::failing(3);
        assert!(matches!(strip.begin(), Err(Error::StripFailed(_))));
    }
}
