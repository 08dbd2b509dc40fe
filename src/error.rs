//! Pipeline error taxonomy.
//!
//! Only `CaptureUnavailable` ends a session. Every other kind is local to a
//! single frame or a single detection and is logged, counted and dropped.

/// Errors raised by pipeline stages.
///
/// Carried through `anyhow::Error` like any other error; callers that need to
/// branch on the kind use `err.downcast_ref::<PipelineError>()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineError {
    /// Camera permission denied or no device present. Fatal to the session.
    CaptureUnavailable(String),
    /// The raw frame vanished or could not be rasterised. Skips one frame.
    EncodeError(String),
    /// Transport, timeout, HTTP status or malformed response. Skips one detection.
    DetectionFailed(String),
    /// A detection resolved after its session was stopped. Discarded.
    StaleResponse { session: u64 },
    /// A detection is already staged or in flight.
    Busy,
}

impl PipelineError {
    /// Stable code for logs and counters.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::CaptureUnavailable(_) => "CAPTURE_UNAVAILABLE",
            PipelineError::EncodeError(_) => "ENCODE_ERROR",
            PipelineError::DetectionFailed(_) => "DETECTION_FAILED",
            PipelineError::StaleResponse { .. } => "STALE_RESPONSE",
            PipelineError::Busy => "DETECTOR_BUSY",
        }
    }

    /// Whether the error ends the current session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::CaptureUnavailable(_))
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::CaptureUnavailable(msg)
            | PipelineError::EncodeError(msg)
            | PipelineError::DetectionFailed(msg) => write!(f, "{}: {}", self.code(), msg),
            PipelineError::StaleResponse { session } => {
                write!(f, "{}: response for stopped session {}", self.code(), session)
            }
            PipelineError::Busy => write!(f, "{}: a detection is already in flight", self.code()),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_capture_failure_is_fatal() {
        assert!(PipelineError::CaptureUnavailable("denied".into()).is_fatal());
        assert!(!PipelineError::EncodeError("gone".into()).is_fatal());
        assert!(!PipelineError::DetectionFailed("timeout".into()).is_fatal());
        assert!(!PipelineError::StaleResponse { session: 1 }.is_fatal());
        assert!(!PipelineError::Busy.is_fatal());
    }

    #[test]
    fn survives_anyhow_round_trip() {
        let err: anyhow::Error = PipelineError::DetectionFailed("status 500".into()).into();
        assert_eq!(err.to_string(), "DETECTION_FAILED: status 500");
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::DetectionFailed("status 500".into()))
        );
    }
}
