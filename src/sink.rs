//! Frame sinks for the annotated output stream.
//!
//! `ImageSequenceSink` writes every annotated frame as a numbered JPEG
//! (`frame_000001.jpg`, ...) resized to the configured output size, and on
//! `finish` a `sequence.json` manifest with fps, resolution and frame count
//! so the sequence can be muxed into a video later. `NullSink` discards.

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::OutputSettings;

const MANIFEST_NAME: &str = "sequence.json";

pub trait FrameSink: Send {
    fn write(&mut self, image: &RgbImage) -> Result<()>;

    /// Flush and close. Further writes are errors.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn frames_written(&self) -> u64;
}

#[derive(Debug, Serialize)]
struct SequenceManifest<'a> {
    fps: f64,
    width: u32,
    height: u32,
    frame_count: u64,
    pattern: &'a str,
}

pub struct ImageSequenceSink {
    dir: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    frames_written: u64,
    finished: bool,
}

impl ImageSequenceSink {
    pub fn create(settings: &OutputSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            bail!(
                "output resolution must be non-zero, got {}x{}",
                settings.width,
                settings.height
            );
        }
        std::fs::create_dir_all(&settings.dir)
            .with_context(|| format!("failed to create output dir {}", settings.dir.display()))?;
        log::info!(
            "ImageSequenceSink: writing {}x{} @ {} fps to {}",
            settings.width,
            settings.height,
            settings.fps,
            settings.dir.display()
        );
        Ok(Self {
            dir: settings.dir.clone(),
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            frames_written: 0,
            finished: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.jpg", index))
    }
}

impl FrameSink for ImageSequenceSink {
    fn write(&mut self, image: &RgbImage) -> Result<()> {
        if self.finished {
            bail!("sink {} is already finished", self.dir.display());
        }
        let path = self.frame_path(self.frames_written + 1);
        let written = if image.dimensions() == (self.width, self.height) {
            image.save(&path)
        } else {
            imageops::resize(image, self.width, self.height, FilterType::Triangle).save(&path)
        };
        written.with_context(|| format!("failed to write {}", path.display()))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let manifest = SequenceManifest {
            fps: self.fps,
            width: self.width,
            height: self.height,
            frame_count: self.frames_written,
            pattern: "frame_%06d.jpg",
        };
        let path = self.dir.join(MANIFEST_NAME);
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!(
            "ImageSequenceSink: finished {} ({} frames)",
            self.dir.display(),
            self.frames_written
        );
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for ImageSequenceSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("ImageSequenceSink: {}", e);
        }
    }
}

#[derive(Default)]
pub struct NullSink {
    frames_written: u64,
}

impl FrameSink for NullSink {
    fn write(&mut self, _image: &RgbImage) -> Result<()> {
        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}
