//! Filesystem snapshot store.
//!
//! Snapshots are named `snapshot_<YYYYMMDD_HHMMSS>.<ext>` after the frame's
//! wall-clock time. Two alerts within the same second get `_1`, `_2`, ...
//! suffixes rather than overwriting each other.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::actions::SnapshotStore;

const MAX_SUFFIX: u32 = 1000;

pub struct FilesystemSnapshotStore {
    dir: PathBuf,
    extension: String,
}

impl FilesystemSnapshotStore {
    /// Create the store, creating `dir` if needed.
    pub fn new(dir: &Path, extension: &str) -> Result<Self> {
        let extension = extension.trim_start_matches('.').to_lowercase();
        match image::ImageFormat::from_extension(&extension) {
            Some(format) if format.writing_enabled() => {}
            Some(_) => {
                return Err(anyhow!(
                    "snapshot format {} is not compiled into this build",
                    extension
                ))
            }
            None => return Err(anyhow!("unsupported snapshot format: {}", extension)),
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        log::info!("FilesystemSnapshotStore: writing to {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            extension,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unique_path(&self, at: NaiveDateTime) -> Result<PathBuf> {
        let stem = format!("snapshot_{}", at.format("%Y%m%d_%H%M%S"));
        let first = self.dir.join(format!("{}.{}", stem, self.extension));
        if !first.exists() {
            return Ok(first);
        }
        for n in 1..MAX_SUFFIX {
            let candidate = self.dir.join(format!("{}_{}.{}", stem, n, self.extension));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(anyhow!("too many snapshots named {} in {}", stem, self.dir.display()))
    }
}

impl SnapshotStore for FilesystemSnapshotStore {
    fn save(&mut self, image: &RgbImage, at: NaiveDateTime) -> Result<PathBuf> {
        let path = self.unique_path(at)?;
        image
            .save(&path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        Ok(path)
    }
}
