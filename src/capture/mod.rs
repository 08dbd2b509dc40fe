//! Capture devices and the ticking frame source.
//!
//! Devices are chosen from a URI:
//! - `stub://<name>`: synthetic moving pattern (tests, demos)
//! - `stub://denied`, `stub://missing`: simulated permission denial / absent device
//! - `/dev/videoN`: V4L2 device (feature: ingest-v4l2)
//!
//! `FrameSource` owns exactly one device. The capture handle is acquired by
//! `start()` and released by `stop()`, which also runs from `Drop`, so every
//! exit path (errors, early returns, unwinding) gives the device back.

mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::Result;
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::frame::{FrameTick, RawFrame};

pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// Which way the camera should face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    Environment,
    User,
}

impl std::str::FromStr for Facing {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "environment" => Ok(Facing::Environment),
            "user" => Ok(Facing::User),
            other => anyhow::bail!("unknown facing mode '{}'", other),
        }
    }
}

/// Requested capture configuration. Devices treat these as ideals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device URI (e.g., "stub://front", "/dev/video0").
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Tick cadence in frames per second.
    pub frame_rate: u32,
    pub facing: Facing,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 640,
            height: 480,
            frame_rate: 30,
            facing: Facing::Environment,
        }
    }
}

/// A platform capture device.
///
/// `open` acquires the handle, `grab` writes the current picture into the
/// source-owned frame buffer, `release` gives the handle back. `release` must
/// be safe to call on a device that was never opened.
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;

    fn open(&mut self, config: &CaptureConfig) -> Result<()>;

    fn grab(&mut self, frame: &mut RawFrame) -> Result<()>;

    fn release(&mut self);
}

/// Build the device named by `config.device`.
pub fn open_device(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
    if let Some(name) = config.device.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticDevice::new(name)));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Device::new(&config.device)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(PipelineError::CaptureUnavailable(format!(
            "device {} requires the ingest-v4l2 feature",
            config.device
        ))
        .into())
    }
}

// ----------------------------------------------------------------------------
// Ticker: cadence without backlog
// ----------------------------------------------------------------------------

/// Paces ticks at a fixed frame rate. A late tick is never made up for:
/// the next deadline is rescheduled from now.
#[derive(Clone, Debug)]
pub struct Ticker {
    period: Duration,
    next_deadline: Option<Instant>,
}

impl Ticker {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            period: frame_period(frame_rate),
            next_deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next deadline and return the wake-up instant.
    pub fn wait(&mut self) -> Instant {
        if let Some(deadline) = self.next_deadline {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        let now = Instant::now();
        self.next_deadline = Some(self.schedule_after(now));
        now
    }

    fn schedule_after(&self, now: Instant) -> Instant {
        match self.next_deadline {
            Some(deadline) if deadline + self.period > now => deadline + self.period,
            _ => now + self.period,
        }
    }

    pub fn reset(&mut self) {
        self.next_deadline = None;
    }
}

fn frame_period(frame_rate: u32) -> Duration {
    if frame_rate == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_micros(1_000_000 / frame_rate as u64)
    }
}

// ----------------------------------------------------------------------------
// FrameSource
// ----------------------------------------------------------------------------

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Owns the capture device lifecycle and produces ticks.
pub struct FrameSource {
    config: CaptureConfig,
    device: Box<dyn CaptureDevice>,
    frame: RawFrame,
    ticker: Ticker,
    active: bool,
    sequence: u64,
    frames_captured: u64,
}

impl FrameSource {
    pub fn new(config: CaptureConfig, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            ticker: Ticker::new(config.frame_rate),
            config,
            device,
            frame: RawFrame::empty(),
            active: false,
            sequence: 0,
            frames_captured: 0,
        }
    }

    /// Build a source for the device URI in `config`.
    pub fn from_config(config: CaptureConfig) -> Result<Self> {
        let device = open_device(&config)?;
        Ok(Self::new(config, device))
    }

    /// Acquire the capture handle.
    ///
    /// Fails with `PipelineError::CaptureUnavailable` when the device refuses;
    /// the source then stays inactive and produces no ticks.
    pub fn start(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }
        if let Err(err) = self.device.open(&self.config) {
            self.device.release();
            self.active = false;
            log::error!(
                "FrameSource: capture unavailable on {}: {:#}",
                self.config.device,
                err
            );
            return Err(PipelineError::CaptureUnavailable(format!("{:#}", err)).into());
        }
        self.active = true;
        self.sequence = 0;
        self.ticker.reset();
        log::info!(
            "FrameSource: streaming from {} ({}x{} @ {} fps, facing {:?})",
            self.device.name(),
            self.config.width,
            self.config.height,
            self.config.frame_rate,
            self.config.facing
        );
        Ok(())
    }

    /// Release the capture handle. Idempotent.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.device.release();
        self.frame.release();
        log::info!("FrameSource: released {}", self.device.name());
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Block until the next tick is due.
    pub fn wait_for_tick(&mut self) -> Instant {
        self.ticker.wait()
    }

    /// Capture one frame and hand it to `f` together with its tick.
    ///
    /// Returns `Ok(None)` without calling `f` when the source is inactive.
    /// The frame reference does not outlive the callback.
    pub fn tick<R>(&mut self, f: impl FnOnce(FrameTick, &RawFrame) -> R) -> Result<Option<R>> {
        self.tick_at(Instant::now(), f)
    }

    /// Same as `tick`, with an explicit capture instant.
    pub fn tick_at<R>(
        &mut self,
        captured_at: Instant,
        f: impl FnOnce(FrameTick, &RawFrame) -> R,
    ) -> Result<Option<R>> {
        if !self.active {
            return Ok(None);
        }
        self.device.grab(&mut self.frame)?;
        self.sequence += 1;
        self.frames_captured += 1;
        let tick = FrameTick::new(captured_at, self.sequence);
        Ok(Some(f(tick, &self.frame)))
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            device: self.config.device.clone(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
