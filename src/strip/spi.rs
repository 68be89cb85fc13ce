/*!
 # Local strip over SPI

 WS2812 and SK6812 strips wired to the SPI MOSI pin. The spidev bus must be
 clocked at 2.4 MHz so that three SPI bits make up one LED data bit.
*/

use std::io::Write;
use std::path::Path;

use spidev::{SpiModeFlags, Spidev, SpidevOptions};
use tracing::{debug, info, instrument, trace};

use super::{Strip, StripType};
use crate::color::Rgbw;
use crate::{Error, Result};

/// Three SPI bits per LED bit at the 800 kHz WS281x data rate
pub const SPI_SPEED_HZ: u32 = 2_400_000;

/// Low bytes appended to each frame to latch the data (> 80us at 2.4 MHz)
const RESET_BYTES: usize = 40;

/// SPI pattern for a one bit
const ONE: u32 = 0b110;
/// SPI pattern for a zero bit
const ZERO: u32 = 0b100;

/// Encode one color byte into three SPI bytes, most significant bit first
pub const fn encode_byte(byte: u8) -> [u8; 3] {
    let mut bits: u32 = 0;
    let mut i = 8;
    while i > 0 {
        i -= 1;
        bits = (bits << 3) | if byte & (1 << i) != 0 { ONE } else { ZERO };
    }
    [(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]
}

/// A WS281x/SK6812 strip driven through a spidev device
pub struct SpiStrip<W: Write + Send = Spidev> {
    device: W,
    pixels: Vec<Rgbw>,
    brightness: u8,
    strip_type: StripType,
}

impl SpiStrip<Spidev> {
    /// Open and configure a spidev device, e.g. `/dev/spidev0.0`
    #[instrument]
    pub fn open(path: &Path, num_pixels: usize, strip_type: StripType) -> Result<Self> {
        debug!("Opening SPI device");
        let failed = |e: std::io::Error| Error::StripFailed(format!("{}: {e}", path.display()));
        let mut device = Spidev::open(path).map_err(failed)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_SPEED_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        device.configure(&options).map_err(failed)?;
        info!(
            "SPI device {} opened at {} Hz for {} pixels",
            path.display(),
            SPI_SPEED_HZ,
            num_pixels
        );
        Ok(Self::new(device, num_pixels, strip_type))
    }
}

impl<W: Write + Send> SpiStrip<W> {
    pub fn new(device: W, num_pixels: usize, strip_type: StripType) -> Self {
        Self {
            device,
            pixels: vec![Rgbw::BLACK; num_pixels],
            brightness: 255,
            strip_type,
        }
    }

    /// Bytes per pixel before SPI encoding
    fn color_bytes(&self) -> usize {
        if self.strip_type.has_white() {
            4
        } else {
            3
        }
    }

    /// Encode the buffer as one SPI transfer in the strip's color order
    pub fn encode(&self) -> Vec<u8> {
        let order = self.strip_type.order();
        let white = self.strip_type.has_white();
        let mut frame = Vec::with_capacity(self.pixels.len() * self.color_bytes() * 3 + RESET_BYTES);
        for pixel in &self.pixels {
            let pixel = pixel.scaled(self.brightness);
            for byte in order.arrange(pixel) {
                frame.extend_from_slice(&encode_byte(byte));
            }
            if white {
                frame.extend_from_slice(&encode_byte(pixel.w));
            }
        }
        frame.resize(frame.len() + RESET_BYTES, 0);
        frame
    }

    pub fn into_inner(self) -> W {
        self.device
    }
}

impl<W: Write + Send> Strip for SpiStrip<W> {
    fn begin(&mut self) -> Result<()> {
        self.show()
            .map_err(|e| Error::StripFailed(format!("initial SPI write failed: {e}")))
    }

    fn num_pixels(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel_color(&mut self, index: usize, color: Rgbw) {
        if let Some(pixel) = self.pixels.get_mut(index) {
            *pixel = color;
        }
    }

    fn show(&mut self) -> Result<()> {
        let frame = self.encode();
        trace!(bytes = frame.len(), "Writing SPI frame");
        self.device.write_all(&frame)?;
        self.device.flush()?;
        Ok(())
    }

    fn set_brightness(&mut self, value: u8) {
        self.brightness = value;
    }

    fn brightness(&self) -> u8 {
        self.brightness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_byte() {
        // 0x00 -> 100 100 100 100 100 100 100 100
        assert_eq!(encode_byte(0x00), [0b1001_0010, 0b0100_1001, 0b0010_0100]);
        // 0xFF -> 110 110 110 110 110 110 110 110
        assert_eq!(encode_byte(0xFF), [0b1101_1011, 0b0110_1101, 0b1011_0110]);
        // 0x80 -> 110 then seven zero bits
        assert_eq!(encode_byte(0x80), [0b1101_0010, 0b0100_1001, 0b0010_0100]);
    }

    #[test]
    fn test_frame_layout() {
        let mut strip = SpiStrip::new(Vec::new(), 2, StripType::Ws2811StripGrb);
        strip.set_pixel_color(0, Rgbw::new(0xFF, 0x00, 0x00, 0));
        strip.begin().unwrap();

        let written = strip.into_inner();
        assert_eq!(written.len(), 2 * 3 * 3 + RESET_BYTES);
        // Green first, then red
        assert_eq!(&written[0..3], &encode_byte(0x00));
        assert_eq!(&written[3..6], &encode_byte(0xFF));
        assert!(written[18..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_brightness_scales_output() {
        let mut strip = SpiStrip::new(Vec::new(), 1, StripType::Sk6812WStrip);
        strip.set_pixel_color(0, Rgbw::new(200, 200, 200, 200));
        strip.set_brightness(127);
        let frame = strip.encode();
        assert_eq!(&frame[0..3], &encode_byte(100));
        assert_eq!(&frame[9..12], &encode_byte(100));
    }

    #[test]
    fn test_color_order() {
        let mut strip = SpiStrip::new(Vec::new(), 1, StripType::Ws2811StripBrg);
        strip.set_pixel_color(0, Rgbw::new(0x10, 0x20, 0x30, 0x40));
        let frame = strip.encode();
        assert_eq!(frame.len(), 3 * 3 + RESET_BYTES);
        assert_eq!(&frame[0..3], &encode_byte(0x30));
        assert_eq!(&frame[3..6], &encode_byte(0x10));
        assert_eq!(&frame[6..9], &encode_byte(0x20));

        let mut strip = SpiStrip::new(Vec::new(), 1, StripType::Sk6812StripRgbw);
        strip.set_pixel_color(0, Rgbw::new(0x10, 0x20, 0x30, 0x40));
        let frame = strip.encode();
        assert_eq!(frame.len(), 4 * 3 + RESET_BYTES);
        assert_eq!(&frame[0..3], &encode_byte(0x10));
        assert_eq!(&frame[3..6], &encode_byte(0x20));
        assert_eq!(&frame[6..9], &encode_byte(0x30));
        assert_eq!(&frame[9..12], &encode_byte(0x40));
    }

    #[test]
    fn test_strip_type_names() {
        let parsed: StripType = serde_json::from_str("\"SK6812W_STRIP\"").unwrap();
        assert_eq!(parsed, StripType::Sk6812WStrip);
        assert!(parsed.has_white());
        let parsed: StripType = serde_json::from_str("\"WS2811_STRIP_GBR\"").unwrap();
        assert_eq!(parsed.order(), crate::strip::ColorOrder::Gbr);
        assert!(!parsed.has_white());
        assert_eq!(
            serde_json::to_string(&StripType::Sk6812StripBgrw).unwrap(),
            "\"SK6812_STRIP_BGRW\""
        );
    }
}
