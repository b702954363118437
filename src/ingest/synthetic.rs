//! Synthetic frame source (`stub://`).
//!
//! Renders a dark gradient scene with a bright square sweeping left to right.
//! The square enters and leaves the usual ROI, so the stub detector produces
//! bursts of detections and the cooldown logic gets exercised end to end.
//!
//! URI options: `stub://name?frames=N` stops after N frames.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::clock::Clock;
use crate::config::SourceSettings;
use crate::frame::Frame;

const OBJECT_SIZE: u32 = 60;
const OBJECT_STEP: u32 = 12;
const OBJECT_COLOUR: Rgb<u8> = Rgb([245, 245, 245]);

pub struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    frame_interval: Option<Duration>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    opened: bool,
}

impl SyntheticSource {
    /// Unpaced source, suitable for tests.
    pub fn new(uri: &str, width: u32, height: u32) -> Result<Self> {
        if !uri.starts_with("stub://") {
            return Err(anyhow!("synthetic source requires a stub:// uri, got {}", uri));
        }
        if width < OBJECT_SIZE || height < OBJECT_SIZE {
            return Err(anyhow!(
                "synthetic frames must be at least {}x{}",
                OBJECT_SIZE,
                OBJECT_SIZE
            ));
        }
        Ok(Self {
            uri: uri.to_string(),
            width,
            height,
            frame_limit: parse_frame_limit(uri)?,
            frame_interval: None,
            frame_count: 0,
            last_frame_at: None,
            opened: false,
        })
    }

    /// Source paced to the configured frame rate.
    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        let mut source = Self::new(&settings.uri, settings.width, settings.height)?;
        if settings.target_fps > 0 {
            source.frame_interval = Some(Duration::from_secs(1) / settings.target_fps);
        }
        Ok(source)
    }

    fn render(&self) -> RgbImage {
        let mut image = RgbImage::from_fn(self.width, self.height, |x, y| {
            let shade = ((x / 8 + y / 8) % 32) as u8 + 40;
            Rgb([shade, shade / 2 + 20, 60])
        });

        // The square sweeps across the full width then restarts off-screen.
        let travel = self.width + OBJECT_SIZE;
        let pos = ((self.frame_count * OBJECT_STEP as u64) % travel as u64) as u32;
        let top = (self.height / 4).min(self.height - OBJECT_SIZE);
        for y in top..(top + OBJECT_SIZE).min(self.height) {
            for x in pos.saturating_sub(OBJECT_SIZE)..pos.min(self.width) {
                image.put_pixel(x, y, OBJECT_COLOUR);
            }
        }
        image
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!(
            "SyntheticSource: opened {} ({}x{})",
            self.uri,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self, clock: &dyn Clock) -> Result<Option<Frame>> {
        if !self.opened {
            return Err(anyhow!("source {} is not open", self.uri));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.pace();
        self.frame_count += 1;
        let image = self.render();
        Ok(Some(Frame::new(
            image,
            self.frame_count,
            clock.now(),
            clock.wall_now(),
        )))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.uri.clone(),
        }
    }

    fn close(&mut self) {
        if self.opened {
            log::debug!("SyntheticSource: closed {}", self.uri);
        }
        self.opened = false;
    }
}

fn parse_frame_limit(uri: &str) -> Result<Option<u64>> {
    let Some((_, query)) = uri.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("frames=") {
            let limit: u64 = value
                .parse()
                .map_err(|_| anyhow!("invalid frames= value in {}", uri))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}
