//! ROI Sentinel
//!
//! Single-camera surveillance pipeline that watches a fixed region of interest
//! and raises rate-limited alerts when an object of interest shows up.
//!
//! # Architecture
//!
//! Each iteration of the loop:
//!
//! 1. Reads a frame from a `FrameSource`.
//! 2. Extracts the region of interest (`Region`).
//! 3. Runs a `DetectorBackend` on the ROI and paints the detections back into the frame.
//! 4. Feeds the detected classes to the alert decision engine (`AlertState`).
//! 5. On a fire decision, dispatches the alert actions (snapshot, MQTT, sound).
//! 6. Outlines the ROI and writes the annotated frame to a `FrameSink`.
//!
//! # Module Structure
//!
//! - `frame`: Frame container and ROI extract/composite
//! - `alert`: Cooldown state machine
//! - `actions`: Alert action dispatcher and per-action reports
//! - `detect`: Detector backends, labels, annotation
//! - `ingest`: Frame sources
//! - `sink`: Frame sinks
//! - `snapshot`, `sound`, `transport`: Alert action implementations
//! - `detection_log`: Append-only detection log
//! - `config`: File and environment configuration
//! - `clock`: Monotonic and manual time sources
//! - `pipeline`: Main loop orchestration

pub mod actions;
pub mod alert;
pub mod clock;
pub mod config;
pub mod detect;
pub mod detection_log;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod snapshot;
pub mod sound;
pub mod transport;

pub use actions::{
    ActionOutcome, AlertDispatcher, AlertMessage, AlertNotifier, AlertReport, AlertSound,
    SnapshotStore,
};
pub use alert::{decide, AlertPhase, AlertState, Decision};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::SentinelConfig;
pub use detect::{ClassId, Detection, DetectionSet, Detections, DetectorBackend};
pub use detection_log::{DetectionLog, LogPolicy};
pub use frame::{Frame, Region};
pub use ingest::{FrameSource, ImageDirSource, SourceStats, SyntheticSource};
pub use pipeline::{
    FrameReport, Pipeline, PipelineParts, RunSummary, StepOutcome, StopReason,
};
pub use sink::{FrameSink, ImageSequenceSink, NullSink};
pub use snapshot::FilesystemSnapshotStore;
pub use sound::CommandSound;
pub use transport::{MqttNotifier, MqttSettings};
