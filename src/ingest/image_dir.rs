//! Local image-directory frame source.
//!
//! Replays the still images of a local directory in file-name order, one per
//! frame. The first image fixes the stream resolution; later images with a
//! different size are resized to it. The end of the directory is the end of
//! the stream.
//!
//! Only local paths are accepted (no URL schemes).

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::clock::Clock;
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    resolution: Option<(u32, u32)>,
    frame_count: u64,
}

impl ImageDirSource {
    pub fn new(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "image directory source only supports local paths (no URL schemes): {}",
                path
            ));
        }
        Ok(Self {
            dir: PathBuf::from(path),
            files: Vec::new(),
            next_index: 0,
            resolution: None,
            frame_count: 0,
        })
    }

    fn load(&self, path: &Path) -> Result<image::RgbImage> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .into_rgb8();
        Ok(image)
    }
}

impl FrameSource for ImageDirSource {
    fn open(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("source unavailable: {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        files.sort();

        let first = files
            .first()
            .ok_or_else(|| anyhow!("source unavailable: no images in {}", self.dir.display()))?;
        let first_dims = image::image_dimensions(first)
            .with_context(|| format!("failed to read {}", first.display()))?;

        log::info!(
            "ImageDirSource: opened {} ({} frames, {}x{})",
            self.dir.display(),
            files.len(),
            first_dims.0,
            first_dims.1
        );
        self.resolution = Some(first_dims);
        self.files = files;
        self.next_index = 0;
        Ok(())
    }

    fn next_frame(&mut self, clock: &dyn Clock) -> Result<Option<Frame>> {
        let (width, height) = self
            .resolution
            .ok_or_else(|| anyhow!("source {} is not open", self.dir.display()))?;
        let Some(path) = self.files.get(self.next_index).cloned() else {
            return Ok(None);
        };
        self.next_index += 1;

        let mut image = self.load(&path)?;
        if image.dimensions() != (width, height) {
            log::warn!(
                "ImageDirSource: {} is {}x{}, resizing to {}x{}",
                path.display(),
                image.width(),
                image.height(),
                width,
                height
            );
            image = imageops::resize(&image, width, height, FilterType::Triangle);
        }

        self.frame_count += 1;
        Ok(Some(Frame::new(
            image,
            self.frame_count,
            clock.now(),
            clock.wall_now(),
        )))
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution.unwrap_or((0, 0))
    }

    fn is_healthy(&self) -> bool {
        self.resolution.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.dir.display().to_string(),
        }
    }

    fn close(&mut self) {
        self.files.clear();
        self.resolution = None;
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use image::{Rgb, RgbImage};

    #[test]
    fn replays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(40, 30, Rgb([1, 1, 1]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(40, 30, Rgb([2, 2, 2]))
            .save(dir.path().join("a.png"))
            .unwrap();
        RgbImage::from_pixel(20, 10, Rgb([3, 3, 3]))
            .save(dir.path().join("c.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let clock = ManualClock::default();
        let mut source = ImageDirSource::new(dir.path().to_str().unwrap()).unwrap();
        source.open().unwrap();
        assert_eq!(source.resolution(), (40, 30));

        let first = source.next_frame(&clock).unwrap().unwrap();
        let second = source.next_frame(&clock).unwrap().unwrap();
        let third = source.next_frame(&clock).unwrap().unwrap();
        assert_eq!(*first.image.get_pixel(0, 0), Rgb([2, 2, 2]));
        assert_eq!(*second.image.get_pixel(0, 0), Rgb([1, 1, 1]));
        assert_eq!(third.image.dimensions(), (40, 30));
        assert!(source.next_frame(&clock).unwrap().is_none());
        assert_eq!(source.stats().frames_captured, 3);
    }

    #[test]
    fn empty_or_missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut empty = ImageDirSource::new(dir.path().to_str().unwrap()).unwrap();
        assert!(empty.open().is_err());

        let missing = dir.path().join("nope");
        let mut missing = ImageDirSource::new(missing.to_str().unwrap()).unwrap();
        assert!(missing.open().is_err());
    }

    #[test]
    fn rejects_url_schemes() {
        assert!(ImageDirSource::new("rtsp://camera/stream").is_err());
        assert!(ImageDirSource::new("  ").is_err());
    }
}
