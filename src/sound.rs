//! Audible alert through an external player command.
//!
//! The player (`aplay` by default) is spawned with the sound file as its only
//! argument and must exit within the configured timeout; otherwise it is
//! killed and the play counts as failed.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::actions::AlertSound;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct CommandSound {
    command: String,
    sound_path: PathBuf,
    timeout: Duration,
}

impl CommandSound {
    pub fn new(command: &str, sound_path: &Path, timeout: Duration) -> Result<Self> {
        if command.trim().is_empty() {
            bail!("sound command must not be empty");
        }
        if !sound_path.is_file() {
            log::warn!(
                "CommandSound: {} does not exist yet; alerts will report a failure until it does",
                sound_path.display()
            );
        }
        Ok(Self {
            command: command.to_string(),
            sound_path: sound_path.to_path_buf(),
            timeout,
        })
    }
}

impl AlertSound for CommandSound {
    fn play(&mut self) -> Result<()> {
        if !self.sound_path.is_file() {
            bail!("sound file {} not found", self.sound_path.display());
        }
        let mut child = Command::new(&self.command)
            .arg(&self.sound_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start sound player '{}'", self.command))?;

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(anyhow!("sound player '{}' exited with {}", self.command, status));
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "sound player '{}' timed out after {:?}",
                    self.command,
                    self.timeout
                );
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
