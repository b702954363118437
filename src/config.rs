use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{ClassId, DetectionSet, COCO_LABELS};
use crate::detection_log::LogPolicy;
use crate::frame::Region;

const DEFAULT_SOURCE_URI: &str = "stub://camera0";
const DEFAULT_SOURCE_WIDTH: u32 = 1920;
const DEFAULT_SOURCE_HEIGHT: u32 = 1080;
const DEFAULT_SOURCE_FPS: u32 = 20;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_ROI: Region = Region::new(100, 100, 400, 400);
const DEFAULT_COOLDOWN_SECS: u64 = 30;
// person, car
const DEFAULT_CLASSES_OF_INTEREST: [ClassId; 2] = [0, 2];
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
const DEFAULT_SNAPSHOT_EXT: &str = "jpg";
const DEFAULT_SOUND_COMMAND: &str = "aplay";
const DEFAULT_SOUND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MQTT_BROKER: &str = "mqtt.eclipseprojects.io";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TOPIC: &str = "home/surveillance";
const DEFAULT_MQTT_CLIENT_ID: &str = "roi-sentinel";
const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_MQTT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OUTPUT_DIR: &str = "annotated_output";
const DEFAULT_OUTPUT_WIDTH: u32 = 1920;
const DEFAULT_OUTPUT_HEIGHT: u32 = 1080;
const DEFAULT_OUTPUT_FPS: f64 = 20.0;
const DEFAULT_DETECTION_LOG: &str = "detection_log.txt";

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    roi: Option<Region>,
    alert: Option<AlertConfigFile>,
    mqtt: Option<MqttConfigFile>,
    output: Option<OutputConfigFile>,
    detection_log: Option<DetectionLogConfigFile>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    input_size: Option<u32>,
    stub_class: Option<ClassId>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    classes_of_interest: Option<Vec<ClassId>>,
    snapshot_dir: Option<PathBuf>,
    snapshot_ext: Option<String>,
    sound_path: Option<PathBuf>,
    sound_command: Option<String>,
    sound_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    enabled: Option<bool>,
    broker: Option<String>,
    port: Option<u16>,
    topic: Option<String>,
    client_id: Option<String>,
    keep_alive_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionLogConfigFile {
    path: Option<PathBuf>,
    policy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub roi: Region,
    pub alert: AlertSettings,
    pub mqtt: MqttSettings,
    pub output: OutputSettings,
    pub detection_log: DetectionLogSettings,
    /// Stop after this many frames. `None` runs until the source ends or a stop signal.
    pub max_frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `stub://name[?frames=N]`, `v4l2:///dev/videoN` or a local directory of images.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub input_size: u32,
    /// Class reported by the stub backend.
    pub stub_class: ClassId,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            confidence_threshold: DEFAULT_CONFIDENCE,
            input_size: DEFAULT_INPUT_SIZE,
            stub_class: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub classes_of_interest: DetectionSet,
    pub snapshot_dir: PathBuf,
    pub snapshot_ext: String,
    pub sound_path: Option<PathBuf>,
    pub sound_command: String,
    pub sound_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: DEFAULT_MQTT_BROKER.to_string(),
            port: DEFAULT_MQTT_PORT,
            topic: DEFAULT_MQTT_TOPIC.to_string(),
            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
            keep_alive: Duration::from_secs(DEFAULT_MQTT_KEEP_ALIVE_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_MQTT_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Clone)]
pub struct DetectionLogSettings {
    pub path: PathBuf,
    pub policy: LogPolicy,
}

impl SentinelConfig {
    /// Load from `SENTINEL_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), apply env overrides, validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
        };

        let detector_defaults = DetectorSettings::default();
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(detector_defaults.backend),
            model_path: detector_file
                .model_path
                .unwrap_or(detector_defaults.model_path),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(detector_defaults.confidence_threshold),
            input_size: detector_file
                .input_size
                .unwrap_or(detector_defaults.input_size),
            stub_class: detector_file
                .stub_class
                .unwrap_or(detector_defaults.stub_class),
        };

        let alert_file = file.alert.unwrap_or_default();
        let alert = AlertSettings {
            cooldown: Duration::from_secs(
                alert_file.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            classes_of_interest: alert_file
                .classes_of_interest
                .map(|ids| ids.into_iter().collect())
                .unwrap_or_else(|| DEFAULT_CLASSES_OF_INTEREST.into_iter().collect()),
            snapshot_dir: alert_file
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            snapshot_ext: alert_file
                .snapshot_ext
                .unwrap_or_else(|| DEFAULT_SNAPSHOT_EXT.to_string()),
            sound_path: alert_file.sound_path,
            sound_command: alert_file
                .sound_command
                .unwrap_or_else(|| DEFAULT_SOUND_COMMAND.to_string()),
            sound_timeout: Duration::from_secs(
                alert_file
                    .sound_timeout_secs
                    .unwrap_or(DEFAULT_SOUND_TIMEOUT_SECS),
            ),
        };

        let mqtt_defaults = MqttSettings::default();
        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttSettings {
            enabled: mqtt_file.enabled.unwrap_or(mqtt_defaults.enabled),
            broker: mqtt_file.broker.unwrap_or(mqtt_defaults.broker),
            port: mqtt_file.port.unwrap_or(mqtt_defaults.port),
            topic: mqtt_file.topic.unwrap_or(mqtt_defaults.topic),
            client_id: mqtt_file.client_id.unwrap_or(mqtt_defaults.client_id),
            keep_alive: mqtt_file
                .keep_alive_secs
                .map(Duration::from_secs)
                .unwrap_or(mqtt_defaults.keep_alive),
            connect_timeout: mqtt_file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(mqtt_defaults.connect_timeout),
        };

        let output_file = file.output.unwrap_or_default();
        let output = OutputSettings {
            dir: output_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            width: output_file.width.unwrap_or(DEFAULT_OUTPUT_WIDTH),
            height: output_file.height.unwrap_or(DEFAULT_OUTPUT_HEIGHT),
            fps: output_file.fps.unwrap_or(DEFAULT_OUTPUT_FPS),
        };

        let log_file = file.detection_log.unwrap_or_default();
        let detection_log = DetectionLogSettings {
            path: log_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTION_LOG)),
            policy: match log_file.policy {
                Some(policy) => policy.parse()?,
                None => LogPolicy::default(),
            },
        };

        Ok(Self {
            source,
            detector,
            roi: file.roi.unwrap_or(DEFAULT_ROI),
            alert,
            mqtt,
            output,
            detection_log,
            max_frames: file.max_frames,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("SENTINEL_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(broker) = std::env::var("SENTINEL_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                self.mqtt.broker = broker;
            }
        }
        if let Ok(topic) = std::env::var("SENTINEL_MQTT_TOPIC") {
            if !topic.trim().is_empty() {
                self.mqtt.topic = topic;
            }
        }
        if let Ok(dir) = std::env::var("SENTINEL_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.alert.snapshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(cooldown) = std::env::var("SENTINEL_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(classes) = std::env::var("SENTINEL_CLASSES") {
            let parsed = parse_class_list(&classes)?;
            if !parsed.is_empty() {
                self.alert.classes_of_interest = parsed;
            }
        }
        Ok(())
    }

    /// Check invariants and normalise values. Call again after manual overrides.
    pub fn validate(&mut self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source resolution must be non-zero"));
        }
        // Synthetic and camera sources are sized by these settings; image
        // directories are checked against the region once opened. A camera that
        // negotiates a different size is checked again when the pipeline is built.
        if self.source.uri.starts_with("stub://") || self.source.uri.starts_with("v4l2://") {
            self.roi
                .validate_within(self.source.width, self.source.height)?;
        }
        if self.alert.classes_of_interest.is_empty() {
            return Err(anyhow!("classes_of_interest must not be empty"));
        }
        if let Some(unknown) = self
            .alert
            .classes_of_interest
            .iter()
            .find(|id| **id as usize >= COCO_LABELS.len())
        {
            return Err(anyhow!("class of interest {} is outside the label space", unknown));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within 0..=1"));
        }
        if self.output.width == 0 || self.output.height == 0 {
            return Err(anyhow!("output resolution must be non-zero"));
        }
        if !(self.output.fps.is_finite() && self.output.fps > 0.0) {
            return Err(anyhow!("output fps must be positive"));
        }
        self.alert.snapshot_ext = self.alert.snapshot_ext.trim_start_matches('.').to_lowercase();
        if !matches!(self.alert.snapshot_ext.as_str(), "jpg" | "jpeg" | "png") {
            return Err(anyhow!(
                "snapshot_ext must be jpg, jpeg or png (got {})",
                self.alert.snapshot_ext
            ));
        }
        if self.mqtt.enabled {
            if self.mqtt.broker.trim().is_empty() {
                return Err(anyhow!("mqtt broker must not be empty"));
            }
            if self.mqtt.topic.trim().is_empty() || self.mqtt.topic.contains(['#', '+']) {
                return Err(anyhow!("mqtt topic must be a non-empty topic without wildcards"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str(&raw).map_err(anyhow::Error::from)
    } else {
        serde_json::from_str(&raw).map_err(anyhow::Error::from)
    };
    parsed.map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
}

/// Parse a comma-separated list of class ids or COCO labels.
pub fn parse_class_list(value: &str) -> Result<DetectionSet> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.parse::<ClassId>() {
            Ok(id) => Ok(id),
            Err(_) => crate::detect::class_for_label(entry)
                .ok_or_else(|| anyhow!("unknown class '{}'", entry)),
        })
        .collect()
}
