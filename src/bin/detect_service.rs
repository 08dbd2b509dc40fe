//! detect_service - threat detection HTTP service
//!
//! This daemon:
//! 1. Serves `POST /detect-threat/` (multipart field `file`)
//! 2. Normalises the image and asks the upstream vision model about it
//! 3. Answers `{"alert": "dangerous" | "not dangerous", ...}`
//!
//! Configuration comes from `DETECT_SERVICE_CONFIG`, `DETECT_SERVICE_*`
//! variables and `API_KEY`.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::mpsc;

use threat_watch::service::{ChatCompletionsModel, DetectService};
use threat_watch::ServiceConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Threat detection HTTP service")]
struct Args {
    /// Listen address, overrides DETECT_SERVICE_ADDR.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load()?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    config.validate()?;

    let model = ChatCompletionsModel::from_config(&config);
    log::info!(
        "detect_service {}: upstream model {} at {}",
        env!("CARGO_PKG_VERSION"),
        config.model,
        config.invoke_url
    );
    let handle = DetectService::new(config, Box::new(model)).spawn()?;
    log::info!("detect_service running on http://{}/detect-threat/", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("detect_service waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping detect service...");
    handle.stop()?;

    Ok(())
}
