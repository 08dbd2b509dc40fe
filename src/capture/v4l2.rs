//! V4L2 capture device.
//!
//! Opens a local device node (e.g., /dev/video0), requests packed RGB24 at the
//! configured size and rate, and copies each dequeued buffer into the
//! source-owned frame. Nothing is written to disk.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{CaptureConfig, CaptureDevice, Facing};
use crate::frame::RawFrame;

pub struct V4l2Device {
    path: String,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            state: None,
            active_width: 0,
            active_height: 0,
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.path
    }

    fn open(&mut self, config: &CaptureConfig) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(anyhow!(
                "{} does not deliver RGB24 (got {})",
                self.path,
                format.fourcc
            ));
        }

        if config.frame_rate > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.frame_rate);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Device: failed to set fps on {}: {}", self.path, err);
            }
        }
        if config.facing == Facing::User {
            log::debug!("V4l2Device: facing mode is fixed by the device node");
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Device: opened {} ({}x{})",
            self.path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn grab(&mut self, frame: &mut RawFrame) -> Result<()> {
        use v4l::io::traits::CaptureStream;

        let (width, height) = (self.active_width, self.active_height);
        let state = self.state.as_mut().context("v4l2 device not open")?;
        state.with_mut(|fields| {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            frame.load_rgb(width, height, buf);
            Ok(())
        })
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!("V4l2Device: closed {}", self.path);
        }
    }
}
