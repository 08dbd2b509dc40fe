use anyhow::{anyhow, Result};

use super::{CaptureConfig, CaptureDevice, Facing};
use crate::frame::RawFrame;

/// Synthetic capture device behind `stub://` URIs.
///
/// `stub://denied` refuses like a browser without camera permission and
/// `stub://missing` behaves like a host with no camera. Every other name opens
/// and produces a slowly drifting RGB pattern.
pub struct SyntheticDevice {
    name: String,
    open: Option<OpenState>,
}

struct OpenState {
    width: u32,
    height: u32,
    frame_count: u64,
    /// Simulated scene, changes every 50 frames.
    scene_state: u8,
}

impl SyntheticDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: format!("stub://{}", name),
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, config: &CaptureConfig) -> Result<()> {
        match self.name.as_str() {
            "stub://denied" => return Err(anyhow!("camera permission denied")),
            "stub://missing" => return Err(anyhow!("no capture device found")),
            _ => {}
        }
        if config.facing == Facing::User {
            log::debug!("SyntheticDevice: {} ignores facing mode", self.name);
        }
        self.open = Some(OpenState {
            width: config.width,
            height: config.height,
            frame_count: 0,
            scene_state: 0,
        });
        log::info!("SyntheticDevice: opened {} (synthetic)", self.name);
        Ok(())
    }

    fn grab(&mut self, frame: &mut RawFrame) -> Result<()> {
        let state = self
            .open
            .as_mut()
            .ok_or_else(|| anyhow!("{} grabbed before open", self.name))?;
        state.frame_count += 1;
        if state.frame_count % 50 == 0 {
            state.scene_state = state.scene_state.wrapping_add(1);
        }
        let offset = state.frame_count + state.scene_state as u64;
        let buf = frame.buffer_mut(state.width, state.height);
        for (i, pixel) in buf.iter_mut().enumerate() {
            *pixel = ((i as u64 + offset) % 256) as u8;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.open = None;
    }
}
