/*!
 # Strip abstraction

 Everything that can display pixels implements [`Strip`]: the local SPI
 driver, the WLED network driver, the in-memory strip and segment views.
*/

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::color::Rgbw;
use crate::settings::{DriverSettings, StripSettings};
use crate::Result;

pub mod memory;
pub mod spi;
pub mod wled;

pub use memory::{MemoryStrip, StripEvent};
pub use spi::SpiStrip;
pub use wled::WledStrip;

/// Order in which a strip expects the color bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorOrder {
    Rgb,
    Rbg,
    Grb,
    Gbr,
    Brg,
    Bgr,
}

impl ColorOrder {
    /// The red, green and blue channels of a pixel in wire order
    pub fn arrange(self, pixel: Rgbw) -> [u8; 3] {
        let Rgbw { r, g, b, .. } = pixel;
        match self {
            ColorOrder::Rgb => [r, g, b],
            ColorOrder::Rbg => [r, b, g],
            ColorOrder::Grb => [g, r, b],
            ColorOrder::Gbr => [g, b, r],
            ColorOrder::Brg => [b, r, g],
            ColorOrder::Bgr => [b, g, r],
        }
    }
}

/// LED chipset and channel layout of the strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StripType {
    #[default]
    Ws2811StripGrb,
    Ws2812Strip,
    Ws2811StripRgb,
    Ws2811StripRbg,
    Ws2811StripGbr,
    Ws2811StripBgr,
    Ws2811StripBrg,
    Sk6812Strip,
    #[serde(rename = "SK6812W_STRIP")]
    Sk6812WStrip,
    Sk6812StripRgbw,
    Sk6812StripRbgw,
    Sk6812StripGrbw,
    Sk6812StripGbrw,
    Sk6812StripBrgw,
    Sk6812StripBgrw,
}

impl StripType {
    pub fn order(self) -> ColorOrder {
        use StripType::*;
        match self {
            Ws2811StripGrb | Ws2812Strip | Sk6812Strip | Sk6812WStrip | Sk6812StripGrbw => {
                ColorOrder::Grb
            }
            Ws2811StripRgb | Sk6812StripRgbw => ColorOrder::Rgb,
            Ws2811StripRbg | Sk6812StripRbgw => ColorOrder::Rbg,
            Ws2811StripGbr | Sk6812StripGbrw => ColorOrder::Gbr,
            Ws2811StripBgr | Sk6812StripBgrw => ColorOrder::Bgr,
            Ws2811StripBrg | Sk6812StripBrgw => ColorOrder::Brg,
        }
    }

    /// Whether each pixel carries a fourth, white byte after the colors
    pub fn has_white(self) -> bool {
        use StripType::*;
        matches!(
            self,
            Sk6812WStrip
                | Sk6812StripRgbw
                | Sk6812StripRbgw
                | Sk6812StripGrbw
                | Sk6812StripGbrw
                | Sk6812StripBrgw
                | Sk6812StripBgrw
        )
    }
}

/// Pixel-level interface of an LED strip
///
/// Pixel writes only touch the buffer; nothing reaches the LEDs until
/// [`Strip::show`] flushes the whole buffer at once.
pub trait Strip: Send {
    /// Initialize the hardware and display the (blank) buffer
    fn begin(&mut self) -> Result<()> {
        self.show()
    }

    /// Number of addressable pixels
    fn num_pixels(&self) -> usize;

    /// Write one pixel to the buffer. Out of range indices are ignored.
    fn set_pixel_color(&mut self, index: usize, color: Rgbw);

    /// Flush the buffer to the LEDs
    fn show(&mut self) -> Result<()>;

    /// Set the global brightness (0-255) used by the next `show`
    fn set_brightness(&mut self, value: u8);

    /// Current global brightness
    fn brightness(&self) -> u8;
}

impl<S: Strip + ?Sized> Strip for Box<S> {
    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn num_pixels(&self) -> usize {
        (**self).num_pixels()
    }

    fn set_pixel_color(&mut self, index: usize, color: Rgbw) {
        (**self).set_pixel_color(index, color);
    }

    fn show(&mut self) -> Result<()> {
        (**self).show()
    }

    fn set_brightness(&mut self, value: u8) {
        (**self).set_brightness(value);
    }

    fn brightness(&self) -> u8 {
        (**self).brightness()
    }
}

/// The physical strip, shared between the effect task, fades and segments
pub type SharedStrip = Arc<Mutex<Box<dyn Strip>>>;

/// Wrap a driver so it can be shared
pub fn share(strip: Box<dyn Strip>) -> SharedStrip {
    Arc::new(Mutex::new(strip))
}

/// Fill every pixel of a strip with one color, without showing it
pub fn fill(strip: &mut dyn Strip, color: Rgbw) {
    for index in 0..strip.num_pixels() {
        strip.set_pixel_color(index, color);
    }
}

/// Start the driver selected in the settings
pub async fn connect(settings: &StripSettings) -> Result<Box<dyn Strip>> {
    let num_pixels = settings.count;
    let strip: Box<dyn Strip> = match &settings.driver {
        DriverSettings::Spi { device } => {
            info!("Using {:?} SPI strip on {}", settings.strip_type, device.display());
            Box::new(SpiStrip::open(device, num_pixels, settings.strip_type)?)
        }
        DriverSettings::Wled { host, port } => {
            info!("Using WLED strip at {}:{}", host, port);
            let rgbw = settings.strip_type.has_white();
            Box::new(WledStrip::connect(host, *port, num_pixels, rgbw).await?)
        }
        DriverSettings::Memory => {
            info!("Using in-memory strip, nothing will light up");
            Box::new(MemoryStrip::new(num_pixels))
        }
    };
    Ok(strip)
}
