//! Append-only plain-text detection log.
//!
//! One line per frame with something to report:
//! `<YYYY-MM-DD HH:MM:SS> - Detected: <payload>`.
//!
//! What gets logged is independent of what raises an alert: `LogPolicy::All`
//! records every detected label, `Interesting` only the classes of interest.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::detect::{label_for, DetectionSet, Detections};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogPolicy {
    /// Every detected label.
    #[default]
    All,
    /// Only detected classes of interest.
    Interesting,
    Off,
}

impl FromStr for LogPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "interesting" | "interest" => Ok(Self::Interesting),
            "off" | "none" => Ok(Self::Off),
            other => Err(anyhow!(
                "unknown detection log policy '{}': expected 'all', 'interesting' or 'off'",
                other
            )),
        }
    }
}

pub struct DetectionLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    policy: LogPolicy,
    lines_written: u64,
}

impl DetectionLog {
    /// Open (or create) the log file for appending.
    pub fn open(path: &Path, policy: LogPolicy) -> Result<Self> {
        let writer = if policy == LogPolicy::Off {
            None
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open detection log {}", path.display()))?;
            Some(BufWriter::new(file))
        };
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            policy,
            lines_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Labels this log would record for the given detections.
    pub fn payload(&self, detections: &Detections, interest: &DetectionSet) -> Vec<&'static str> {
        let classes = detections.class_set();
        match self.policy {
            LogPolicy::All => classes.into_iter().map(label_for).collect(),
            LogPolicy::Interesting => classes
                .intersection(interest)
                .copied()
                .map(label_for)
                .collect(),
            LogPolicy::Off => Vec::new(),
        }
    }

    /// Append a line for this frame. Returns whether anything was written.
    pub fn record(
        &mut self,
        at: NaiveDateTime,
        detections: &Detections,
        interest: &DetectionSet,
    ) -> Result<bool> {
        let labels = self.payload(detections, interest);
        let Some(writer) = self.writer.as_mut() else {
            return Ok(false);
        };
        if labels.is_empty() {
            return Ok(false);
        }
        writeln!(writer, "{}", format_line(at, &labels))?;
        writer.flush()?;
        self.lines_written += 1;
        Ok(true)
    }

    /// Flush and release the file handle.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("failed to flush {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for DetectionLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("detection log close failed: {}", e);
        }
    }
}

pub fn format_line(at: NaiveDateTime, labels: &[&str]) -> String {
    format!(
        "{} - Detected: {:?}",
        at.format("%Y-%m-%d %H:%M:%S"),
        labels
    )
}
