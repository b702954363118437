use std::path::Path;
use std::sync::atomic::AtomicBool;

use image::{Rgb, RgbImage};
use tempfile::{NamedTempFile, TempDir};

use roi_sentinel::{Pipeline, SentinelConfig, StopReason};

fn load(config_json: &str) -> SentinelConfig {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, config_json.as_bytes()).expect("write config");
    SentinelConfig::load_from(Some(file.path())).expect("load config")
}

fn config_json(dir: &TempDir, source: &str, cooldown_secs: u64, policy: &str) -> String {
    let root = dir.path().display();
    format!(
        r#"{{
            "source": {{ "uri": "{source}", "width": 320, "height": 240, "target_fps": 0 }},
            "roi": {{ "x": 10, "y": 10, "width": 100, "height": 100 }},
            "alert": {{
                "cooldown_secs": {cooldown_secs},
                "classes_of_interest": [0],
                "snapshot_dir": "{root}/snapshots",
                "snapshot_ext": "png"
            }},
            "mqtt": {{ "enabled": false }},
            "output": {{ "dir": "{root}/out", "width": 160, "height": 120, "fps": 5.0 }},
            "detection_log": {{ "path": "{root}/detections.txt", "policy": "{policy}" }}
        }}"#
    )
}

fn count_files(dir: &Path, extension: &str) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == extension))
                .count()
        })
        .unwrap_or(0)
}

fn scene(bright: bool) -> RgbImage {
    let mut image = RgbImage::from_pixel(160, 120, Rgb([30, 30, 30]));
    if bright {
        for y in 40..70 {
            for x in 40..70 {
                image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
    }
    image
}

#[test]
fn synthetic_run_fires_once_within_cooldown() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = load(&config_json(&dir, "stub://yard?frames=12", 3600, "all"));
    cfg.roi.y = 40;
    cfg.roi.width = 300;

    let mut pipeline = Pipeline::from_config(&cfg).expect("build pipeline");
    let summary = pipeline.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.frames_processed, 12);
    assert_eq!(summary.alerts_fired, 1);
    assert_eq!(summary.stop_reason, StopReason::EndOfStream);

    assert_eq!(count_files(&dir.path().join("snapshots"), "png"), 1);
    assert_eq!(count_files(&dir.path().join("out"), "jpg"), 12);
    let manifest = std::fs::read_to_string(dir.path().join("out/sequence.json")).unwrap();
    assert!(manifest.contains("\"frame_count\": 12"));

    let log = std::fs::read_to_string(dir.path().join("detections.txt")).unwrap();
    assert!(!log.is_empty());
    for line in log.lines() {
        assert!(line.contains(" - Detected: [\"person\"]"), "{}", line);
    }
}

#[test]
fn image_directory_alerts_on_each_bright_frame_without_cooldown() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("frames");
    std::fs::create_dir(&frames).unwrap();
    scene(true).save(frames.join("0001.png")).unwrap();
    scene(false).save(frames.join("0002.png")).unwrap();
    scene(true).save(frames.join("0003.png")).unwrap();

    let cfg = load(&config_json(
        &dir,
        &frames.display().to_string(),
        0,
        "interesting",
    ));
    let mut pipeline = Pipeline::from_config(&cfg).expect("build pipeline");
    let summary = pipeline.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.alerts_fired, 2);
    assert_eq!(count_files(&dir.path().join("snapshots"), "png"), 2);

    let log = std::fs::read_to_string(dir.path().join("detections.txt")).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[test]
fn region_outside_image_directory_frames_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("frames");
    std::fs::create_dir(&frames).unwrap();
    RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]))
        .save(frames.join("only.png"))
        .unwrap();

    let cfg = load(&config_json(&dir, &frames.display().to_string(), 30, "all"));
    assert!(Pipeline::from_config(&cfg).is_err());
}

#[test]
fn missing_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-dir");
    let cfg = load(&config_json(&dir, &missing.display().to_string(), 30, "all"));
    assert!(Pipeline::from_config(&cfg).is_err());
}
