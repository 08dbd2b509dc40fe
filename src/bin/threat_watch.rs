//! threat_watch - camera threat monitoring daemon
//!
//! This daemon:
//! 1. Opens the configured capture device
//! 2. Admits a throttled subset of frames and stages them for detection
//! 3. Keeps the damage level and alert feed, logging periodic snapshots
//!
//! Configuration comes from `THREAT_WATCH_CONFIG` and `THREAT_WATCH_*`
//! variables; flags below override both.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use threat_watch::{Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sample a camera feed and raise threat alerts")]
struct Args {
    /// Capture device URI (stub://<name> or /dev/videoN).
    #[arg(long)]
    device: Option<String>,

    /// Detection endpoint (http(s)://... or stub://<label>).
    #[arg(long)]
    detect_url: Option<String>,

    /// Delay between admitting a frame and sending it, in milliseconds.
    #[arg(long)]
    staging_ms: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print the final snapshot as JSON on exit.
    #[arg(long)]
    print_snapshot: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load()?;
    if let Some(device) = args.device {
        config.capture.device = device;
    }
    if let Some(url) = args.detect_url {
        config.detection.endpoint = url;
    }
    if let Some(ms) = args.staging_ms {
        config.detection.staging_delay = Duration::from_millis(ms);
    }
    config.validate()?;

    log::info!(
        "threat_watch {} starting: device={} detector={} every_nth={} min_interval={:?}",
        env!("CARGO_PKG_VERSION"),
        config.capture.device,
        config.detection.endpoint,
        config.sampler.every_nth,
        config.sampler.min_interval
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_signal.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    if let Some(secs) = args.duration_secs {
        let shutdown_timer = shutdown.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            shutdown_timer.store(true, Ordering::SeqCst);
        });
    }

    let mut pipeline = Pipeline::from_config(&config)?;
    let result = pipeline.run_until(&shutdown);
    log::info!("shutdown requested, draining pipeline...");

    let snapshot = pipeline.snapshot();
    log::info!(
        "threat_watch stopped: ticks={} dispatched={} resolved={} failed={} stale={} damage={} alerts={}",
        snapshot.stats.ticks,
        snapshot.stats.dispatched,
        snapshot.stats.resolved,
        snapshot.stats.failed,
        snapshot.stats.stale,
        snapshot.damage_level,
        snapshot.alerts.len()
    );
    if args.print_snapshot {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    result
}
