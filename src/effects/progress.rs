//! One-shot progress renderings of a 0-100 value

use super::ProgressEffectKind;
use crate::color::{blend, Rgbw};
use crate::strip::Strip;
use crate::Result;

/// Draw `value` percent on the whole strip and show it
pub fn render(
    kind: ProgressEffectKind,
    strip: &mut dyn Strip,
    value: u8,
    progress_color: Rgbw,
    base_color: Rgbw,
    reverse: bool,
) -> Result<()> {
    let n = strip.num_pixels();
    let frame = match kind {
        ProgressEffectKind::ProgressBar => progress_bar(n, value, progress_color, base_color),
        ProgressEffectKind::Gradient => gradient(n, value, progress_color, base_color),
        ProgressEffectKind::SinglePixel => single_pixel(n, value, progress_color, base_color),
    };

    for (i, color) in frame.into_iter().enumerate() {
        let pixel = if reverse { n - 1 - i } else { i };
        strip.set_pixel_color(pixel, color);
    }
    strip.show()
}

/// Length of the lit part in pixels, fractional
fn upper_bar(n: usize, value: u8) -> f64 {
    f64::from(value.min(100)) * n as f64 / 100.0
}

/// Lit pixels in progress color, the boundary pixel blended by its fraction
pub fn progress_bar(n: usize, value: u8, progress: Rgbw, base: Rgbw) -> Vec<Rgbw> {
    let upper = upper_bar(n, value);
    let whole = upper.floor() as usize;
    let remainder = upper.fract();

    (0..n)
        .map(|i| {
            if i < whole {
                progress
            } else if i == whole && remainder > 0.0 {
                blend(progress, base, remainder)
            } else {
                base
            }
        })
        .collect()
}

/// Like the bar, but lit pixels ramp from the base color up to the progress
/// color at the leading edge
pub fn gradient(n: usize, value: u8, progress: Rgbw, base: Rgbw) -> Vec<Rgbw> {
    let upper = upper_bar(n, value);
    let lit = upper.ceil() as usize;

    (0..n)
        .map(|i| {
            if i < lit {
                blend(progress, base, (i + 1) as f64 / upper.max(1.0))
            } else {
                base
            }
        })
        .collect()
}

/// Only the leading pixel is lit
pub fn single_pixel(n: usize, value: u8, progress: Rgbw, base: Rgbw) -> Vec<Rgbw> {
    let mut frame = vec![base; n];
    if value > 0 && n > 0 {
        let position = (upper_bar(n, value).ceil() as usize).clamp(1, n) - 1;
        frame[position] = progress;
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::MemoryStrip;

    const GREEN: Rgbw = Rgbw::new(0, 255, 0, 0);
    const BLUE: Rgbw = Rgbw::new(0, 0, 255, 0);

    #[test]
    fn test_progress_bar_blends_boundary() {
        let frame = progress_bar(10, 45, GREEN, Rgbw::BLACK);
        assert_eq!(&frame[..4], &[GREEN; 4]);
        assert_eq!(frame[4], Rgbw::new(0, 128, 0, 0));
        assert_eq!(&frame[5..], &[Rgbw::BLACK; 5]);
    }

    #[test]
    fn test_progress_bar_limits() {
        assert_eq!(progress_bar(10, 0, GREEN, BLUE), vec![BLUE; 10]);
        assert_eq!(progress_bar(10, 100, GREEN, BLUE), vec![GREEN; 10]);
        assert_eq!(progress_bar(10, 150, GREEN, BLUE), vec![GREEN; 10]);
        assert_eq!(progress_bar(10, 50, GREEN, BLUE)[4], GREEN);
        assert_eq!(progress_bar(10, 50, GREEN, BLUE)[5], BLUE);
    }

    #[test]
    fn test_reverse() {
        let mut strip = MemoryStrip::new(10);
        render(
            ProgressEffectKind::ProgressBar,
            &mut strip,
            45,
            GREEN,
            Rgbw::BLACK,
            true,
        )
        .unwrap();

        let shown = strip.shown();
        assert_eq!(&shown[6..], &[GREEN; 4]);
        assert_eq!(shown[5], Rgbw::new(0, 128, 0, 0));
        assert_eq!(&shown[..5], &[Rgbw::BLACK; 5]);
    }

    #[test]
    fn test_gradient() {
        let frame = gradient(4, 100, GREEN, Rgbw::BLACK);
        assert_eq!(frame[3], GREEN);
        assert!(frame.windows(2).all(|w| w[0].g <= w[1].g));
        assert_eq!(gradient(4, 0, GREEN, BLUE), vec![BLUE; 4]);
    }

    #[test]
    fn test_single_pixel() {
        let frame = single_pixel(10, 45, GREEN, BLUE);
        assert_eq!(frame.iter().filter(|p| **p == GREEN).count(), 1);
        assert_eq!(frame[4], GREEN);
        assert_eq!(single_pixel(10, 100, GREEN, BLUE)[9], GREEN);
        assert_eq!(single_pixel(10, 0, GREEN, BLUE), vec![BLUE; 10]);
    }
}
