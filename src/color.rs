/*!
 # Color utilities

 Pure helpers shared by the effects and drivers: hex parsing, blending, the
 classic strandtest color wheel and per-channel color correction.
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An RGB color, as configured by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Rgb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        hex_to_rgb(s)
    }
}

impl TryFrom<String> for Rgb {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        hex_to_rgb(&value)
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// A color as written to the strip, with the optional white channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rgbw {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Rgbw {
    pub const BLACK: Rgbw = Rgbw::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }

    /// Scale every channel by a brightness value (0-255)
    pub const fn scaled(self, brightness: u8) -> Self {
        Self {
            r: scale8(self.r, brightness),
            g: scale8(self.g, brightness),
            b: scale8(self.b, brightness),
            w: scale8(self.w, brightness),
        }
    }

    /// Each channel divided by ten, used for the soft edges of `Bounce`
    pub const fn dimmed(self) -> Self {
        Self {
            r: self.r / 10,
            g: self.g / 10,
            b: self.b / 10,
            w: self.w / 10,
        }
    }
}

impl From<Rgb> for Rgbw {
    fn from(color: Rgb) -> Self {
        Self::new(color.r, color.g, color.b, 0)
    }
}

/// Parse a `#rrggbb` hex string into a color
///
/// The leading `#` is optional. Anything after the sixth hex digit is ignored.
pub fn hex_to_rgb(hex: &str) -> Result<Rgb> {
    let digits = hex.trim().trim_start_matches('#');
    let digits = digits
        .get(0..6)
        .ok_or_else(|| Error::InvalidColor(hex.to_string()))?;

    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16).map_err(|_| Error::InvalidColor(hex.to_string()))
    };

    Ok(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

/// Clamp any integer into a color channel
pub fn clamp_channel(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

/// Scale an 8-bit value by a factor (0-255 = 0.0-1.0)
#[inline]
pub const fn scale8(value: u8, scale: u8) -> u8 {
    ((value as u16 * (1 + scale as u16)) >> 8) as u8
}

/// Linear interpolation between two colors
///
/// `fraction_of_a` is clamped to 0.0-1.0; 1.0 yields `a`, 0.0 yields `b`.
pub fn blend(a: Rgbw, b: Rgbw, fraction_of_a: f64) -> Rgbw {
    let t = fraction_of_a.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (f64::from(x) * t + f64::from(y) * (1.0 - t)).round() as u8;
    Rgbw {
        r: mix(a.r, b.r),
        g: mix(a.g, b.g),
        b: mix(a.b, b.b),
        w: mix(a.w, b.w),
    }
}

/// Color for a position (0-255) on the color wheel
///
/// Red to green to blue and back, as in Adafruit's strandtest.
pub const fn wheel(pos: u8) -> Rgb {
    if pos < 85 {
        Rgb::new(pos * 3, 255 - pos * 3, 0)
    } else if pos < 170 {
        let pos = pos - 85;
        Rgb::new(255 - pos * 3, 0, pos * 3)
    } else {
        let pos = pos - 170;
        Rgb::new(0, pos * 3, 255 - pos * 3)
    }
}

/// Per-channel adjustment applied to every configured color
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorCorrection {
    /// Red channel scale, percent
    pub red: u8,
    /// Green channel scale, percent
    pub green: u8,
    /// Blue channel scale, percent
    pub blue: u8,
    /// Render pure white on the dedicated white channel
    pub white_override: bool,
    /// White channel brightness for the override, percent
    pub white_brightness: u8,
}

impl Default for ColorCorrection {
    fn default() -> Self {
        Self {
            red: 100,
            green: 100,
            blue: 100,
            white_override: false,
            white_brightness: 50,
        }
    }
}

impl ColorCorrection {
    /// Convert a configured color into what gets written to the strip
    pub fn apply(&self, color: Rgb) -> Rgbw {
        if color == Rgb::WHITE && self.white_override {
            let white = percent_of_255(self.white_brightness);
            return Rgbw::new(0, 0, 0, white);
        }

        let adjust = |value: u8, percent: u8| {
            clamp_channel((f64::from(value) * f64::from(percent) / 100.0) as i64)
        };

        Rgbw::new(
            adjust(color.r, self.red),
            adjust(color.g, self.green),
            adjust(color.b, self.blue),
            0,
        )
    }
}

/// Convert a percentage into the 0-255 range
pub fn percent_of_255(percent: u8) -> u8 {
    (f64::from(percent.min(100)) / 100.0 * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_rgb() {
        let cases = [
            ("#29aab1", Rgb::new(41, 170, 177)),
            ("#efdcd0", Rgb::new(239, 220, 208)),
            ("#1ee8a8", Rgb::new(30, 232, 168)),
            ("#84c513", Rgb::new(132, 197, 19)),
            ("#7a4f2e", Rgb::new(122, 79, 46)),
            ("00ff00", Rgb::new(0, 255, 0)),
        ];
        for (hex, expected) in cases {
            assert_eq!(hex_to_rgb(hex).unwrap(), expected, "{hex}");
        }
    }

    #[test]
    fn test_hex_to_rgb_rejects_garbage() {
        assert!(hex_to_rgb("#12").is_err());
        assert!(hex_to_rgb("#zz0000").is_err());
    }

    #[test]
    fn test_rgb_display_round_trip() {
        let color = Rgb::new(41, 170, 177);
        assert_eq!(color.to_string(), "#29aab1");
    }

    #[test]
    fn test_wheel() {
        let cases = [
            (29, Rgb::new(87, 168, 0)),
            (64, Rgb::new(192, 63, 0)),
            (108, Rgb::new(186, 0, 69)),
            (181, Rgb::new(0, 33, 222)),
            (183, Rgb::new(0, 39, 216)),
            (244, Rgb::new(0, 222, 33)),
            (250, Rgb::new(0, 240, 15)),
        ];
        for (pos, expected) in cases {
            assert_eq!(wheel(pos), expected, "wheel({pos})");
        }
    }

    #[test]
    fn test_blend() {
        let green = Rgbw::new(0, 255, 0, 0);
        assert_eq!(blend(green, Rgbw::BLACK, 1.0), green);
        assert_eq!(blend(green, Rgbw::BLACK, 0.0), Rgbw::BLACK);
        assert_eq!(blend(green, Rgbw::BLACK, 0.5), Rgbw::new(0, 128, 0, 0));
        // Out of range fractions clamp
        assert_eq!(blend(green, Rgbw::BLACK, 1.7), green);
    }

    #[test]
    fn test_color_correction() {
        let correction = ColorCorrection {
            red: 50,
            ..ColorCorrection::default()
        };
        assert_eq!(
            correction.apply(Rgb::new(200, 100, 10)),
            Rgbw::new(100, 100, 10, 0)
        );

        let white = ColorCorrection {
            white_override: true,
            white_brightness: 100,
            ..ColorCorrection::default()
        };
        assert_eq!(white.apply(Rgb::WHITE), Rgbw::new(0, 0, 0, 255));
        assert_eq!(white.apply(Rgb::new(255, 255, 254)), Rgbw::new(255, 255, 254, 0));
    }

    #[test]
    fn test_scale8() {
        assert_eq!(scale8(255, 255), 255);
        assert_eq!(scale8(255, 0), 0);
        assert_eq!(scale8(200, 127), 100);
    }
}
