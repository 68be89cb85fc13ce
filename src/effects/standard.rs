//! Standard animations
//!
//! Every frame is written and shown before the cancellable sleep, so a stop
//! never leaves a half written frame on the strip.

use tokio::time::Instant;

use super::{EffectControl, EffectKind};
use crate::brightness::BrightnessManager;
use crate::color::{wheel, Rgbw};
use crate::strip::{fill, Strip};
use crate::Result;

/// Poll interval of effects that have nothing left to draw
const IDLE_POLL_MS: u64 = 100;

/// Lit pixels in the middle of the `Bounce` block
const BOUNCE_SIZE: usize = 3;

const BALL_COUNT: usize = 2;
const GRAVITY: f64 = -9.81;
const START_HEIGHT: f64 = 1.0;

/// Render a standard animation until stopped
pub async fn run(
    kind: EffectKind,
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    if strip.num_pixels() == 0 {
        idle(control).await;
        return Ok(());
    }

    match kind {
        EffectKind::SolidColor => solid_color(strip, control, color, brightness).await,
        EffectKind::ColorWipe => color_wipe(strip, control, color, delay, brightness).await,
        EffectKind::ColorWipe2 => color_wipe_2(strip, control, color, delay, brightness).await,
        EffectKind::Pulse => pulse(strip, control, color, delay, brightness).await,
        EffectKind::Bounce => bounce(strip, control, color, delay, brightness).await,
        EffectKind::BounceSolo => bounce_solo(strip, control, color, delay, brightness).await,
        EffectKind::Rainbow => rainbow(strip, control, delay, brightness).await,
        EffectKind::RainbowCycle => rainbow_cycle(strip, control, delay, brightness).await,
        EffectKind::Random => random(strip, control, delay, brightness).await,
        EffectKind::Blink => blink(strip, control, color, delay, brightness).await,
        EffectKind::Crossover => crossover(strip, control, color, delay, brightness).await,
        EffectKind::BouncyBalls => bouncy_balls(strip, control, color, delay, brightness).await,
    }
}

async fn idle(control: &mut EffectControl) {
    while control.sleep(IDLE_POLL_MS).await {}
}

async fn solid_color(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    brightness: &BrightnessManager,
) -> Result<()> {
    brightness.reset();
    fill(strip, color);
    strip.show()?;
    idle(control).await;
    Ok(())
}

async fn color_wipe(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let n = strip.num_pixels();
    loop {
        brightness.reset();
        for c in [color, Rgbw::BLACK] {
            for i in 0..n {
                strip.set_pixel_color(i, c);
                strip.show()?;
                if !control.sleep(delay).await {
                    return Ok(());
                }
            }
        }
    }
}

/// Wipe on forwards, wipe off backwards
async fn color_wipe_2(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let n = strip.num_pixels();
    let sweep: Vec<(usize, Rgbw)> = (0..n)
        .map(|i| (i, color))
        .chain((0..n).rev().map(|i| (i, Rgbw::BLACK)))
        .collect();

    loop {
        brightness.reset();
        for &(i, c) in &sweep {
            strip.set_pixel_color(i, c);
            strip.show()?;
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

/// Solid color breathing from 0 to max brightness and back
async fn pulse(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let max = brightness.max_brightness();
    if max == 0 {
        return solid_color(strip, control, color, brightness).await;
    }

    loop {
        brightness.set(1, false);
        fill(strip, color);
        strip.show()?;

        for level in (0..max).chain((0..max).rev()) {
            brightness.set(level, true);
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

/// A block of pixels with dimmed edges moving out and back
async fn bounce(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let travel = strip.num_pixels().saturating_sub(BOUNCE_SIZE + 2);
    let positions: Vec<usize> = if travel == 0 {
        vec![0]
    } else {
        (0..travel).chain((1..=travel).rev()).collect()
    };
    let edge = color.dimmed();

    loop {
        brightness.reset();
        for &i in &positions {
            fill(strip, Rgbw::BLACK);
            strip.set_pixel_color(i, edge);
            for j in 1..=BOUNCE_SIZE {
                strip.set_pixel_color(i + j, color);
            }
            strip.set_pixel_color(i + BOUNCE_SIZE + 1, edge);
            strip.show()?;
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

/// One pixel moving out and back
async fn bounce_solo(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let n = strip.num_pixels();
    loop {
        brightness.reset();
        for i in (0..n).chain((0..n).rev()) {
            fill(strip, Rgbw::BLACK);
            strip.set_pixel_color(i, color);
            strip.show()?;
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

/// Whole strip stepping through the color wheel
async fn rainbow(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    loop {
        for pos in 0..=255u8 {
            brightness.reset();
            fill(strip, wheel(pos).into());
            strip.show()?;
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

/// Color wheel spread over the strip, rotating
async fn rainbow_cycle(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let n = strip.num_pixels();
    loop {
        brightness.reset();
        for j in 0..256usize {
            for i in 0..n {
                let pos = ((i * 256 / n) + j) & 255;
                strip.set_pixel_color(i, wheel(pos as u8).into());
            }
            strip.show()?;
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

async fn random(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let n = strip.num_pixels();
    brightness.reset();
    for i in 0..n {
        strip.set_pixel_color(i, wheel(rand::random()).into());
    }
    strip.show()?;

    loop {
        let index = rand::random_range(0..n);
        strip.set_pixel_color(index, wheel(rand::random()).into());
        strip.show()?;
        if !control.sleep(delay).await {
            return Ok(());
        }
    }
}

async fn blink(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    loop {
        for c in [color, Rgbw::BLACK] {
            brightness.reset();
            fill(strip, c);
            strip.show()?;
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

/// Two pixels crossing from opposite ends
async fn crossover(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    let mut n = strip.num_pixels();
    // Needs an odd count to meet in the middle
    if n % 2 == 0 {
        n -= 1;
    }

    loop {
        brightness.reset();
        for i in 0..n {
            fill(strip, Rgbw::BLACK);
            strip.set_pixel_color(i, color);
            strip.set_pixel_color(n - 1 - i, color);
            strip.show()?;
            if !control.sleep(delay).await {
                return Ok(());
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ball {
    last_bounce: Instant,
    impact_velocity: f64,
    dampening: f64,
}

/// Balls dropped from the far end, bouncing with gravity
///
/// After tweaking4all's Arduino bouncing balls effect.
async fn bouncy_balls(
    strip: &mut dyn Strip,
    control: &mut EffectControl,
    color: Rgbw,
    delay: u64,
    brightness: &BrightnessManager,
) -> Result<()> {
    brightness.reset();
    let n = strip.num_pixels();
    let start_velocity = (-2.0 * GRAVITY * START_HEIGHT).sqrt();
    let now = Instant::now();
    let mut balls: Vec<Ball> = (0..BALL_COUNT)
        .map(|i| Ball {
            last_bounce: now,
            impact_velocity: start_velocity,
            dampening: 0.9 - i as f64 / (BALL_COUNT * BALL_COUNT) as f64,
        })
        .collect();

    loop {
        let now = Instant::now();
        fill(strip, Rgbw::BLACK);
        for ball in &mut balls {
            let t = now.duration_since(ball.last_bounce).as_secs_f64();
            let mut height = 0.5 * GRAVITY * t * t + ball.impact_velocity * t;

            if height < 0.0 {
                height = 0.0;
                ball.impact_velocity *= ball.dampening;
                ball.last_bounce = now;
                if ball.impact_velocity < 0.01 {
                    ball.impact_velocity = start_velocity;
                }
            }

            let position = (height * (n - 1) as f64 / START_HEIGHT).round() as usize;
            strip.set_pixel_color(position.min(n - 1), color);
        }
        strip.show()?;
        if !control.sleep(delay).await {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::strip::{share, MemoryStrip, StripEvent};

    const GREEN: Rgbw = Rgbw::new(0, 255, 0, 0);

    fn setup(n: usize) -> (MemoryStrip, Arc<BrightnessManager>) {
        let memory = MemoryStrip::recording(n);
        let brightness = Arc::new(BrightnessManager::new(
            share(Box::new(memory.clone())),
            255,
            1000,
        ));
        (memory, brightness)
    }

    /// Run an effect for `ms` of virtual time, then stop it
    async fn run_for(kind: EffectKind, memory: &MemoryStrip, brightness: Arc<BrightnessManager>, ms: u64) {
        let (signal, mut control) = EffectControl::channel();
        let mut strip = memory.clone();
        let task = tokio::spawn(async move {
            run(kind, &mut strip, &mut control, GREEN, 10, &brightness).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        signal.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_effect_stops() {
        for kind in EffectKind::ALL {
            let (memory, brightness) = setup(8);
            run_for(kind, &memory, brightness, 95).await;
            assert!(memory.show_count() > 0, "{kind} never showed a frame");
            // The last thing an effect does is show a complete frame
            let events = memory.events();
            let last_write = events
                .iter()
                .rposition(|e| matches!(e, StripEvent::Pixel(..)))
                .unwrap();
            assert!(
                events[last_write..].contains(&StripEvent::Show),
                "{kind} left an unshown frame"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_color_wipe_frames() {
        let (memory, brightness) = setup(4);
        run_for(EffectKind::ColorWipe, &memory, brightness, 25).await;
        // Frames at 0, 10 and 20 ms
        assert_eq!(memory.show_count(), 3);
        assert_eq!(&memory.shown()[..3], &[GREEN; 3]);
        assert_eq!(memory.shown()[3], Rgbw::BLACK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounce_on_tiny_strip() {
        let (memory, brightness) = setup(3);
        run_for(EffectKind::Bounce, &memory, brightness, 35).await;
        assert_eq!(memory.shown()[0], GREEN.dimmed());
        assert_eq!(memory.shown()[1], GREEN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_strip_waits_for_stop() {
        let (memory, brightness) = setup(0);
        run_for(EffectKind::Random, &memory, brightness, 50).await;
        assert_eq!(memory.show_count(), 0);
    }
}
