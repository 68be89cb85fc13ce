/*!
 # WLED realtime strip

 Forwards every frame to a WLED instance using its UDP realtime protocol.
 Packets are fire-and-forget: there is no acknowledgement and no retry.
*/

use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info, instrument, trace, warn};

use super::Strip;
use crate::color::Rgbw;
use crate::{Error, Result};

/// Default WLED realtime UDP port
pub const DEFAULT_PORT: u16 = 21324;

/// DRGB protocol
const MODE_DRGB: u8 = 2;
/// DRGBW protocol
const MODE_DRGBW: u8 = 3;
/// Seconds WLED waits after the last packet before returning to its own mode
const TIMEOUT: u8 = 255;

/// A strip rendered remotely by WLED
pub struct WledStrip {
    socket: UdpSocket,
    addr: SocketAddr,
    pixels: Vec<Rgbw>,
    brightness: u8,
    rgbw: bool,
}

impl WledStrip {
    /// Resolve the WLED host and open a local UDP socket
    #[instrument]
    pub async fn connect(host: &str, port: u16, num_pixels: usize, rgbw: bool) -> Result<Self> {
        debug!("Resolving WLED host");
        let addr = lookup_host((host, port))
            .await
            .map_err(|e| Error::StripFailed(format!("cannot resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| Error::StripFailed(format!("no address for {host}")))?;

        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| Error::StripFailed(format!("cannot open UDP socket: {e}")))?;

        info!("Sending realtime frames to WLED at {}", addr);
        Ok(Self {
            socket,
            addr,
            pixels: vec![Rgbw::BLACK; num_pixels],
            brightness: 255,
            rgbw,
        })
    }

    /// Build the realtime packet for the current buffer
    ///
    /// WLED has no brightness field, so brightness is applied to the pixel data.
    pub fn packet(&self) -> Vec<u8> {
        let bytes_per_pixel = if self.rgbw { 4 } else { 3 };
        let mut packet = Vec::with_capacity(2 + self.pixels.len() * bytes_per_pixel);
        packet.push(if self.rgbw { MODE_DRGBW } else { MODE_DRGB });
        packet.push(TIMEOUT);
        for pixel in &self.pixels {
            let pixel = pixel.scaled(self.brightness);
            packet.extend_from_slice(&[pixel.r, pixel.g, pixel.b]);
            if self.rgbw {
                packet.push(pixel.w);
            }
        }
        packet
    }
}

impl Strip for WledStrip {
    fn num_pixels(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel_color(&mut self, index: usize, color: Rgbw) {
        if let Some(pixel) = self.pixels.get_mut(index) {
            *pixel = color;
        }
    }

    fn show(&mut self) -> Result<()> {
        let packet = self.packet();
        match self.socket.try_send_to(&packet, self.addr) {
            Ok(sent) => trace!(bytes = sent, "Sent WLED frame"),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                warn!("UDP socket busy, dropping WLED frame");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn set_brightness(&mut self, value: u8) {
        self.brightness = value;
    }

    fn brightness(&self) -> u8 {
        self.brightness
    }
}
