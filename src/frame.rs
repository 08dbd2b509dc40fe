//! Frame types that flow through the pipeline.
//!
//! - `FrameTick`: one admission opportunity, created per capture callback.
//! - `RawFrame`: the source-owned RGB8 buffer. Callbacks only ever see `&RawFrame`;
//!   the buffer is overwritten on the next tick and wiped on release.
//! - `EncodedFrame`: the self-describing payload handed to the detection client.

use std::time::Instant;
use zeroize::Zeroize;

/// Bytes per RGB8 pixel.
pub const RGB_CHANNELS: usize = 3;

/// One opportunity to admit a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTick {
    pub captured_at: Instant,
    pub sequence_number: u64,
}

impl FrameTick {
    pub fn new(captured_at: Instant, sequence_number: u64) -> Self {
        Self {
            captured_at,
            sequence_number,
        }
    }
}

// ----------------------------------------------------------------------------
// RawFrame: capture buffer
// ----------------------------------------------------------------------------

/// Raw RGB8 frame owned by a `FrameSource`.
///
/// No `Clone`: a frame is only valid inside the tick
/// callback that received it. Copy what you need out with the encoder.
pub struct RawFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    /// An empty, unavailable frame.
    pub fn empty() -> Self {
        Self {
            pixels: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    /// Build a frame from an RGB8 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Resize the buffer for a `width` x `height` RGB8 frame and hand it out for filling.
    ///
    /// Devices write directly into the source-owned buffer so steady-state capture
    /// does not allocate.
    pub fn buffer_mut(&mut self, width: u32, height: u32) -> &mut [u8] {
        let len = width as usize * height as usize * RGB_CHANNELS;
        self.pixels.resize(len, 0);
        self.width = width;
        self.height = height;
        &mut self.pixels
    }

    /// Copy a packed RGB8 buffer into the frame.
    pub fn load_rgb(&mut self, width: u32, height: u32, pixels: &[u8]) {
        let buf = self.buffer_mut(width, height);
        let n = buf.len().min(pixels.len());
        buf[..n].copy_from_slice(&pixels[..n]);
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// True when the buffer holds a complete frame of the advertised size.
    pub fn is_available(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * RGB_CHANNELS
    }

    /// Wipe and drop the pixel data. Called when the capture handle is released.
    pub(crate) fn release(&mut self) {
        self.pixels.zeroize();
        self.pixels = Vec::new();
        self.width = 0;
        self.height = 0;
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        self.pixels.zeroize();
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// EncodedFrame: transmissible payload
// ----------------------------------------------------------------------------

/// Encoded raster ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    pub payload: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    /// File name used for the multipart upload, derived from the MIME type.
    pub fn file_name(&self) -> &'static str {
        match self.mime_type {
            "image/jpeg" => "image.jpg",
            _ => "image.png",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_makes_frame_unavailable() {
        let mut frame = RawFrame::empty();
        assert!(!frame.is_available());

        frame.load_rgb(2, 2, &[7u8; 12]);
        assert!(frame.is_available());
        assert_eq!(frame.pixels()[11], 7);

        frame.release();
        assert!(!frame.is_available());
        assert!(frame.pixels().is_empty());
    }

    #[test]
    fn short_buffer_is_not_available() {
        let frame = RawFrame::from_rgb(vec![0u8; 5], 2, 2);
        assert!(!frame.is_available());
    }

    #[test]
    fn encoded_frame_file_name_follows_mime() {
        let png = EncodedFrame {
            payload: vec![],
            mime_type: "image/png",
            width: 1,
            height: 1,
        };
        let jpg = EncodedFrame {
            mime_type: "image/jpeg",
            ..png.clone()
        };
        assert_eq!(png.file_name(), "image.png");
        assert_eq!(jpg.file_name(), "image.jpg");
    }
}
