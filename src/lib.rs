//! Threat Watch
//!
//! Samples a live camera feed, sends a throttled subset of frames to a remote
//! threat classifier and keeps a damage level plus a short alert feed.
//!
//! # Architecture
//!
//! The pipeline upholds four rules by construction:
//!
//! 1. **Single flight**: at most one detection is staged or on the wire.
//! 2. **Throttled admission**: a tick passes only the exclusivity, time and
//!    count gates, in that order.
//! 3. **Single writer**: damage level and alert feed are mutated only on the
//!    pipeline thread, from completions delivered over a channel.
//! 4. **Scoped capture**: the camera is released on every exit path.
//!
//! # Module Structure
//!
//! - `capture`: capture devices and the ticking `FrameSource`
//! - `sampler`: tick admission (`FrameSampler`)
//! - `encode`: raw frame to PNG/JPEG payload
//! - `detect`: transports and the single-flight `DetectionClient`
//! - `alert`: `DamageGate`, `AlertSink`, `AlertFeed`
//! - `pipeline`: one session wiring the stages together
//! - `service`: the detection HTTP service the pipeline talks to
//! - `config`: file + environment configuration for both binaries

pub mod alert;
pub mod capture;
pub mod config;
pub mod detect;
pub mod encode;
pub mod error;
pub mod frame;
pub mod multipart;
pub mod pipeline;
pub mod sampler;
pub mod service;

pub use alert::{Alert, AlertFeed, AlertSink, DamageGate, ALERT_FEED_CAPACITY};
pub use capture::{CaptureConfig, CaptureDevice, Facing, FrameSource, SyntheticDevice, Ticker};
pub use config::{DetectionSettings, PipelineConfig, ServiceConfig};
pub use detect::{
    Classification, DetectionClient, DetectionTransport, DispatchPhase, InFlightFlag,
    ThreatLabel,
};
pub use encode::{EncoderConfig, FrameEncoder, ImageFormat};
pub use error::PipelineError;
pub use frame::{EncodedFrame, FrameTick, RawFrame};
pub use pipeline::{Pipeline, PipelineSnapshot, PipelineStats, TickOutcome};
pub use sampler::{Admission, DropReason, FrameSampler, SamplerConfig};
