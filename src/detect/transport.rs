use anyhow::Result;

use crate::detect::result::Classification;
use crate::frame::EncodedFrame;

/// Detection transport trait.
///
/// A transport turns one encoded frame into one classification. It is called
/// from the dispatch worker thread, never from the capture loop, and must not
/// retry: a failure is reported once and the frame is forgotten.
pub trait DetectionTransport: Send + Sync {
    /// Transport identifier.
    fn name(&self) -> &'static str;

    /// Classify a frame. Blocks until the service answers or the transport gives up.
    fn classify(&self, frame: &EncodedFrame) -> Result<Classification>;
}
