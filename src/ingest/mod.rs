//! Frame ingestion sources.
//!
//! This module provides the sources the loop can read frames from:
//! - Synthetic scenes (`stub://name`) for tests and demos
//! - Local directories of still images, replayed in file-name order
//! - V4L2 capture devices (`v4l2:///dev/video0`, `ingest-v4l2` feature)
//!
//! A source is opened once at startup. Failure to open is fatal. After that,
//! `next_frame` returning `Ok(None)` means the stream ended; an error means the
//! source failed. The loop treats both as the end of the run.

pub mod image_dir;
pub mod synthetic;
pub mod v4l2;

use anyhow::Result;

use crate::clock::Clock;
use crate::config::SourceSettings;
use crate::frame::Frame;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

pub trait FrameSource {
    /// Acquire the underlying device or stream.
    fn open(&mut self) -> Result<()>;

    /// Capture the next frame, or `None` at end of stream.
    fn next_frame(&mut self, clock: &dyn Clock) -> Result<Option<Frame>>;

    /// Frame size in pixels. Valid after `open`.
    fn resolution(&self) -> (u32, u32);

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;

    /// Release the underlying device. Called once when the loop stops.
    fn close(&mut self) {}
}

/// Build and open the source described by the settings.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let mut source: Box<dyn FrameSource> = if settings.uri.starts_with("stub://") {
        Box::new(SyntheticSource::from_settings(settings)?)
    } else if settings.uri.starts_with(v4l2::URI_SCHEME) {
        Box::new(V4l2Source::from_settings(settings)?)
    } else {
        Box::new(ImageDirSource::new(&settings.uri)?)
    };
    source.open()?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(uri: &str) -> SourceSettings {
        SourceSettings {
            uri: uri.to_string(),
            width: 320,
            height: 240,
            target_fps: 0,
        }
    }

    #[test]
    fn opens_synthetic_source() {
        let source = open_source(&settings("stub://cam")).unwrap();
        assert_eq!(source.resolution(), (320, 240));
    }

    #[test]
    fn camera_open_failure_is_an_error() {
        assert!(open_source(&settings("v4l2:///dev/no-such-video-device")).is_err());
        assert!(open_source(&settings("v4l2://")).is_err());
    }
}
