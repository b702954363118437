//! V4L2 camera source (`v4l2:///dev/videoN`).
//!
//! Opens a local capture device, asks for the configured resolution and frame
//! rate, and converts each captured buffer to an `RgbImage`. The driver may
//! settle on a different size; `resolution()` reports what it actually chose.
//!
//! Device access needs the `ingest-v4l2` feature. Without it, opening a
//! `v4l2://` source fails at startup.

use anyhow::{anyhow, Result};
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;
#[cfg(feature = "ingest-v4l2")]
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::clock::Clock;
use crate::config::SourceSettings;
use crate::frame::Frame;

pub const URI_SCHEME: &str = "v4l2://";

/// Device node named by a `v4l2://` uri, e.g. `v4l2:///dev/video0`.
pub fn device_path(uri: &str) -> Result<&str> {
    let path = uri
        .strip_prefix(URI_SCHEME)
        .ok_or_else(|| anyhow!("v4l2 source requires a v4l2:// uri, got {}", uri))?;
    if !path.starts_with('/') || path.len() < 2 {
        return Err(anyhow!("v4l2 uri must name an absolute device path, got {}", uri));
    }
    Ok(path)
}

pub struct V4l2Source {
    uri: String,
    device: String,
    width: u32,
    height: u32,
    #[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
    target_fps: u32,
    frame_count: u64,
    #[cfg(feature = "ingest-v4l2")]
    state: Option<CaptureState>,
    #[cfg(feature = "ingest-v4l2")]
    pixel_format: PixelFormat,
    #[cfg(feature = "ingest-v4l2")]
    last_frame_at: Option<Instant>,
    #[cfg(feature = "ingest-v4l2")]
    last_error: Option<String>,
}

impl V4l2Source {
    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        let device = device_path(&settings.uri)?.to_string();
        Ok(Self {
            uri: settings.uri.clone(),
            device,
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
            frame_count: 0,
            #[cfg(feature = "ingest-v4l2")]
            state: None,
            #[cfg(feature = "ingest-v4l2")]
            pixel_format: PixelFormat::Rgb,
            #[cfg(feature = "ingest-v4l2")]
            last_frame_at: None,
            #[cfg(feature = "ingest-v4l2")]
            last_error: None,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

#[cfg(not(feature = "ingest-v4l2"))]
impl FrameSource for V4l2Source {
    fn open(&mut self) -> Result<()> {
        Err(anyhow!(
            "cannot open {}: built without the ingest-v4l2 feature",
            self.uri
        ))
    }

    fn next_frame(&mut self, _clock: &dyn Clock) -> Result<Option<Frame>> {
        Err(anyhow!("source {} is not open", self.uri))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.uri.clone(),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Rgb,
    Yuyv,
    Mjpeg,
}

#[cfg(feature = "ingest-v4l2")]
impl PixelFormat {
    fn from_fourcc(fourcc: &v4l::FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(Self::Rgb),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

#[cfg(feature = "ingest-v4l2")]
impl V4l2Source {
    fn negotiate(&mut self, device: &mut v4l::Device) -> Result<()> {
        use v4l::video::Capture;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;

        let mut chosen = None;
        for fourcc in [b"RGB3", b"YUYV", b"MJPG"] {
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(applied) if PixelFormat::from_fourcc(&applied.fourcc).is_some() => {
                    chosen = Some(applied);
                    break;
                }
                Ok(applied) => log::debug!(
                    "V4l2Source: {} answered {} when asked for {}",
                    self.device,
                    applied.fourcc,
                    format.fourcc
                ),
                Err(err) => log::debug!(
                    "V4l2Source: {} rejected {}: {}",
                    self.device,
                    format.fourcc,
                    err
                ),
            }
        }
        let applied = chosen.ok_or_else(|| {
            anyhow!(
                "{} supports none of RGB3, YUYV or MJPG capture formats",
                self.device
            )
        })?;
        self.pixel_format = PixelFormat::from_fourcc(&applied.fourcc)
            .ok_or_else(|| anyhow!("unsupported v4l2 format {}", applied.fourcc))?;

        if (applied.width, applied.height) != (self.width, self.height) {
            log::warn!(
                "V4l2Source: {} requested {}x{}, driver chose {}x{}",
                self.device,
                self.width,
                self.height,
                applied.width,
                applied.height
            );
        }
        self.width = applied.width;
        self.height = applied.height;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", self.device, err);
            }
        }
        Ok(())
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

#[cfg(feature = "ingest-v4l2")]
impl FrameSource for V4l2Source {
    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        self.negotiate(&mut device)?;

        let state = CaptureStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        self.last_error = None;

        log::info!(
            "V4l2Source: opened {} ({}x{}, {:?})",
            self.device,
            self.width,
            self.height,
            self.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self, clock: &dyn Clock) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("source {} is not open", self.uri))?;
        let (width, height, format) = (self.width, self.height, self.pixel_format);
        let converted = state.with_stream_mut(|stream| {
            let (buf, meta) = stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            convert(format, &buf[..used], width, height)
        });
        let image = match converted {
            Ok(image) => image,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
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

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.uri.clone(),
        }
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::debug!("V4l2Source: closed {}", self.device);
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn convert(format: PixelFormat, data: &[u8], width: u32, height: u32) -> Result<image::RgbImage> {
    match format {
        PixelFormat::Rgb => {
            let len = (width * height * 3) as usize;
            if data.len() < len {
                return Err(anyhow!("short RGB3 buffer: {} of {} bytes", data.len(), len));
            }
            image::RgbImage::from_raw(width, height, data[..len].to_vec())
                .ok_or_else(|| anyhow!("RGB3 buffer does not match {}x{}", width, height))
        }
        PixelFormat::Yuyv => yuyv_to_rgb(data, width, height),
        PixelFormat::Mjpeg => Ok(image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .context("decode MJPG frame")?
            .to_rgb8()),
    }
}

/// Packed YUYV 4:2:2 to RGB using BT.601 coefficients.
#[cfg(any(feature = "ingest-v4l2", test))]
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<image::RgbImage> {
    let len = (width * height * 2) as usize;
    if width % 2 != 0 || data.len() < len {
        return Err(anyhow!(
            "YUYV buffer of {} bytes does not fit {}x{}",
            data.len(),
            width,
            height
        ));
    }
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..len].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    image::RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| anyhow!("YUYV conversion produced the wrong size"))
}

#[cfg(any(feature = "ingest-v4l2", test))]
fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(uri: &str) -> SourceSettings {
        SourceSettings {
            uri: uri.to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
        }
    }

    #[test]
    fn parses_device_path_from_uri() {
        assert_eq!(device_path("v4l2:///dev/video0").unwrap(), "/dev/video0");
        assert_eq!(
            device_path("v4l2:///dev/v4l/by-id/usb-cam").unwrap(),
            "/dev/v4l/by-id/usb-cam"
        );
        assert!(device_path("v4l2://").is_err());
        assert!(device_path("v4l2:///").is_err());
        assert!(device_path("v4l2://video0").is_err());
        assert!(device_path("stub://video0").is_err());
    }

    #[test]
    fn keeps_requested_resolution_until_opened() {
        let source = V4l2Source::from_settings(&settings("v4l2:///dev/video0")).unwrap();
        assert_eq!(source.device(), "/dev/video0");
        assert_eq!(source.resolution(), (640, 480));
        assert_eq!(source.stats().frames_captured, 0);
    }

    #[test]
    fn opening_missing_device_fails() {
        let mut source =
            V4l2Source::from_settings(&settings("v4l2:///dev/no-such-video-device")).unwrap();
        assert!(source.open().is_err());
        assert!(!source.is_healthy());
    }

    #[test]
    fn converts_yuyv_grey_and_white() {
        // Two pixels of Y=16 (black) then two of Y=235 (white), neutral chroma.
        let data = [16, 128, 16, 128, 235, 128, 235, 128];
        let image = yuyv_to_rgb(&data, 4, 1).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(3, 0).0, [255, 255, 255]);
        assert!(yuyv_to_rgb(&data[..6], 4, 1).is_err());
        assert!(yuyv_to_rgb(&data, 3, 1).is_err());
    }
}
