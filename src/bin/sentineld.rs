//! sentineld - ROI surveillance daemon
//!
//! Watches a fixed region of interest in a camera feed, raises rate-limited
//! alerts (snapshot, MQTT notification, sound) when an object of interest
//! appears, and writes the annotated stream to an image sequence.
//!
//! Stop with Ctrl-C, or type `q` and Enter when running in a terminal.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roi_sentinel::detect::label_for;
use roi_sentinel::{Pipeline, SentinelConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "ROI surveillance daemon with rate-limited alerts")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: `stub://name[?frames=N]`, `v4l2:///dev/videoN` or a directory of images.
    #[arg(long)]
    source: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Do not connect to the MQTT broker.
    #[arg(long)]
    no_mqtt: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.uri = source;
    }
    if args.max_frames.is_some() {
        cfg.max_frames = args.max_frames;
    }
    if args.no_mqtt {
        cfg.mqtt.enabled = false;
    }
    cfg.validate()?;

    log::info!(
        "sentineld {} starting: source={} roi={} cooldown={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.uri,
        cfg.roi,
        cfg.alert.cooldown
    );
    log::info!(
        "classes of interest: {:?}",
        cfg.alert
            .classes_of_interest
            .iter()
            .map(|&id| label_for(id))
            .collect::<Vec<_>>()
    );

    let mut pipeline = Pipeline::from_config(&cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    if std::io::stdin().is_terminal() {
        spawn_stop_key_listener(Arc::clone(&stop));
        log::info!("sentineld running. press q + Enter or Ctrl-C to stop");
    } else {
        log::info!("sentineld running. press Ctrl-C to stop");
    }

    let summary = pipeline.run(&stop)?;
    log::info!(
        "sentineld stopped: {} frames processed, {} alerts fired",
        summary.frames_processed,
        summary.alerts_fired
    );
    Ok(())
}

fn spawn_stop_key_listener(stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().eq_ignore_ascii_case("q") {
                stop.store(true, Ordering::SeqCst);
                break;
            }
        }
    });
}
