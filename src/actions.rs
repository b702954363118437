//! Alert side effects.
//!
//! When the decision engine fires, `AlertDispatcher::dispatch` runs three
//! actions in order: save a snapshot of the annotated frame, publish a
//! notification, play a sound. Each action fails on its own. A failed
//! snapshot still lets the publish and the sound go ahead, and every outcome
//! ends up in the returned `AlertReport` instead of an error.

use anyhow::Result;
use chrono::NaiveDateTime;
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::detect::{label_for, DetectionSet};
use crate::frame::Frame;

/// Persists alert snapshots.
pub trait SnapshotStore: Send {
    /// Write `image` and return where it went.
    fn save(&mut self, image: &RgbImage, at: NaiveDateTime) -> Result<PathBuf>;
}

/// Sends alert notifications to the outside world.
pub trait AlertNotifier: Send {
    fn notify(&mut self, message: &AlertMessage) -> Result<()>;

    /// Release the connection. Called once at shutdown.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Plays the audible alert.
pub trait AlertSound: Send {
    fn play(&mut self) -> Result<()>;
}

/// Notification body, published as JSON.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertMessage {
    pub message: String,
    pub snapshot: Option<PathBuf>,
    pub classes: Vec<String>,
    pub timestamp: String,
}

impl AlertMessage {
    pub fn new(snapshot: Option<PathBuf>, matched: &DetectionSet, at: NaiveDateTime) -> Self {
        let message = match &snapshot {
            Some(path) => format!(
                "Object of interest detected! Snapshot saved at: {}",
                path.display()
            ),
            None => "Object of interest detected! Snapshot could not be saved.".to_string(),
        };
        Self {
            message,
            snapshot,
            classes: matched.iter().map(|&id| label_for(id).to_string()).collect(),
            timestamp: at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Done; carries a short detail such as the snapshot path.
    Completed(String),
    /// Not configured.
    Skipped,
    Failed(String),
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(detail) => Self::Completed(detail),
            Err(e) => Self::Failed(format!("{:#}", e)),
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(detail) if detail.is_empty() => write!(f, "ok"),
            Self::Completed(detail) => write!(f, "ok ({})", detail),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// What happened to each action of one alert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertReport {
    pub snapshot: ActionOutcome,
    pub publish: ActionOutcome,
    pub sound: ActionOutcome,
}

impl AlertReport {
    pub fn all_succeeded(&self) -> bool {
        !(self.snapshot.is_failure() || self.publish.is_failure() || self.sound.is_failure())
    }
}

impl fmt::Display for AlertReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshot {}, publish {}, sound {}",
            self.snapshot, self.publish, self.sound
        )
    }
}

pub struct AlertDispatcher {
    snapshots: Box<dyn SnapshotStore>,
    notifier: Option<Box<dyn AlertNotifier>>,
    sound: Option<Box<dyn AlertSound>>,
}

impl AlertDispatcher {
    pub fn new(
        snapshots: Box<dyn SnapshotStore>,
        notifier: Option<Box<dyn AlertNotifier>>,
        sound: Option<Box<dyn AlertSound>>,
    ) -> Self {
        Self {
            snapshots,
            notifier,
            sound,
        }
    }

    /// Run the alert actions for `frame`, which should already carry the
    /// detection boxes. The ROI outline is drawn afterwards.
    pub fn dispatch(&mut self, frame: &Frame, matched: &DetectionSet) -> AlertReport {
        let saved = self.snapshots.save(&frame.image, frame.wall_time);
        let snapshot_path = saved.as_ref().ok().cloned();
        let snapshot = ActionOutcome::from_result(saved.map(|path| path.display().to_string()));

        let publish = match self.notifier.as_mut() {
            Some(notifier) => {
                let message = AlertMessage::new(snapshot_path, matched, frame.wall_time);
                ActionOutcome::from_result(notifier.notify(&message).map(|_| String::new()))
            }
            None => ActionOutcome::Skipped,
        };

        let sound = match self.sound.as_mut() {
            Some(sound) => ActionOutcome::from_result(sound.play().map(|_| String::new())),
            None => ActionOutcome::Skipped,
        };

        AlertReport {
            snapshot,
            publish,
            sound,
        }
    }

    /// Close the notifier connection, if any.
    pub fn close(&mut self) -> Result<()> {
        match self.notifier.as_mut() {
            Some(notifier) => notifier.close(),
            None => Ok(()),
        }
    }
}
