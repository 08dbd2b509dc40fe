//! One capture-to-alert session.
//!
//! `Pipeline` owns every stage and is the single writer of the damage level
//! and alert feed. Detection workers never touch that state: their
//! completions come back over a channel and are applied by
//! `drain_completions`, which runs at the top of every tick. A completion
//! admitted under an earlier session, or arriving after `stop()`, is stale
//! and dropped.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::alert::{Alert, AlertFeed, AlertSink, DamageGate};
use crate::capture::FrameSource;
use crate::config::PipelineConfig;
use crate::detect::{transport_for_endpoint, Completion, DetectionClient, DispatchPhase};
use crate::encode::{EncoderConfig, FrameEncoder};
use crate::error::PipelineError;
use crate::frame::EncodedFrame;
use crate::sampler::{Admission, DropReason, FrameSampler, SamplerConfig};

const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

/// What happened to a single tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The source is not streaming; nothing was captured.
    Inactive,
    /// The device failed to deliver this frame. The session continues.
    CaptureFailed,
    Dropped(DropReason),
    EncodeFailed,
    /// Admitted and encoded, but the detection client could not dispatch it.
    DetectionFailed,
    /// Admitted and handed to the detection client under this dispatch id.
    Dispatched(u64),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub ticks: u64,
    pub capture_errors: u64,
    pub dropped_busy: u64,
    pub dropped_interval: u64,
    pub dropped_count: u64,
    pub admitted: u64,
    pub encode_errors: u64,
    pub dispatched: u64,
    pub resolved: u64,
    pub failed: u64,
    pub stale: u64,
}

/// Read-only view for presentation and logging.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineSnapshot {
    pub session: u64,
    pub is_streaming: bool,
    pub damage_level: u32,
    pub damage_threshold: u32,
    pub alarming: bool,
    pub in_flight: bool,
    pub alerts: Vec<Alert>,
    pub stats: PipelineStats,
}

enum TickDecision {
    Dropped(DropReason),
    Encoded(EncodedFrame),
    EncodeFailed(PipelineError),
}

pub struct Pipeline {
    source: FrameSource,
    sampler: FrameSampler,
    encoder: FrameEncoder,
    client: DetectionClient,
    gate: DamageGate,
    sink: AlertSink,
    session: u64,
    stats: PipelineStats,
    snapshot_interval: Duration,
}

impl Pipeline {
    pub fn new(
        source: FrameSource,
        sampler: SamplerConfig,
        encoder: EncoderConfig,
        client: DetectionClient,
        damage_threshold: u32,
    ) -> Self {
        Self {
            source,
            sampler: FrameSampler::new(sampler),
            encoder: FrameEncoder::new(encoder),
            client,
            gate: DamageGate::new(damage_threshold),
            sink: AlertSink::new(),
            session: 0,
            stats: PipelineStats::default(),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let source = FrameSource::from_config(config.capture.clone())?;
        let transport =
            transport_for_endpoint(&config.detection.endpoint, config.detection.timeout)?;
        let client = DetectionClient::new(transport, config.detection.staging_delay);
        let mut pipeline = Self::new(
            source,
            config.sampler,
            config.encoder,
            client,
            config.damage_threshold,
        );
        pipeline.snapshot_interval = config.snapshot_interval;
        Ok(pipeline)
    }

    /// Begin a new session: fresh damage level, alert feed, sampler state and
    /// counters, then acquire the camera.
    pub fn start(&mut self) -> Result<()> {
        if self.source.is_active() {
            return Ok(());
        }
        self.session += 1;
        self.sampler.reset();
        self.gate.reset();
        self.sink.clear();
        self.stats = PipelineStats::default();
        self.source.start()?;
        log::info!(
            "Pipeline: session {} started (detector: {}, staging {:?})",
            self.session,
            self.client.transport_name(),
            self.client.staging_delay()
        );
        Ok(())
    }

    /// End the session. Cancels a staged detection and releases the camera.
    /// A request already on the wire finishes in the background and its
    /// result is discarded.
    pub fn stop(&mut self) {
        if !self.source.is_active() {
            return;
        }
        self.client.cancel();
        self.source.stop();
        log::info!("Pipeline: session {} stopped", self.session);
    }

    pub fn is_streaming(&self) -> bool {
        self.source.is_active()
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn damage_level(&self) -> u32 {
        self.gate.level()
    }

    pub fn alerts(&self) -> &AlertFeed {
        self.sink.feed()
    }

    pub fn in_flight(&self) -> bool {
        self.client.in_flight()
    }

    pub fn phase(&self) -> DispatchPhase {
        self.client.phase()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn process_tick(&mut self) -> Result<TickOutcome> {
        self.process_tick_at(Instant::now())
    }

    /// Run one tick captured at `now`.
    ///
    /// Only `CaptureUnavailable` is returned as an error, after the session
    /// has been stopped. Every other failure is counted and folded into the
    /// outcome.
    pub fn process_tick_at(&mut self, now: Instant) -> Result<TickOutcome> {
        self.drain_completions();
        if !self.source.is_active() {
            return Ok(TickOutcome::Inactive);
        }

        let in_flight = self.client.in_flight();
        let sampler = &mut self.sampler;
        let encoder = &self.encoder;
        let captured = self.source.tick_at(now, |tick, frame| {
            match sampler.admit(&tick, in_flight) {
                Admission::Dropped(reason) => TickDecision::Dropped(reason),
                Admission::Admitted => match encoder.encode(frame) {
                    Ok(encoded) => TickDecision::Encoded(encoded),
                    Err(err) => TickDecision::EncodeFailed(err),
                },
            }
        });

        let decision = match captured {
            Ok(Some(decision)) => decision,
            Ok(None) => return Ok(TickOutcome::Inactive),
            Err(err) => {
                let fatal = err
                    .downcast_ref::<PipelineError>()
                    .map(PipelineError::is_fatal)
                    .unwrap_or(false);
                if fatal {
                    log::error!("Pipeline: {:#}", err);
                    self.stop();
                    return Err(err);
                }
                self.stats.capture_errors += 1;
                log::warn!("Pipeline: frame capture failed: {:#}", err);
                return Ok(TickOutcome::CaptureFailed);
            }
        };
        self.stats.ticks += 1;

        match decision {
            TickDecision::Dropped(reason) => {
                self.count_drop(reason);
                Ok(TickOutcome::Dropped(reason))
            }
            TickDecision::EncodeFailed(err) => {
                self.stats.admitted += 1;
                self.stats.encode_errors += 1;
                log::warn!("Pipeline: {}", err);
                Ok(TickOutcome::EncodeFailed)
            }
            TickDecision::Encoded(encoded) => {
                self.stats.admitted += 1;
                let submitted = self.client.submit(encoded, self.session);
                Ok(self.record_submit(submitted))
            }
        }
    }

    fn record_submit(&mut self, submitted: Result<u64, PipelineError>) -> TickOutcome {
        match submitted {
            Ok(dispatch_id) => {
                self.stats.dispatched += 1;
                TickOutcome::Dispatched(dispatch_id)
            }
            Err(PipelineError::Busy) => {
                self.count_drop(DropReason::Busy);
                TickOutcome::Dropped(DropReason::Busy)
            }
            Err(err) => {
                self.stats.failed += 1;
                log::warn!("Pipeline: {}", err);
                TickOutcome::DetectionFailed
            }
        }
    }

    fn count_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::Busy => self.stats.dropped_busy += 1,
            DropReason::Interval => self.stats.dropped_interval += 1,
            DropReason::Count => self.stats.dropped_count += 1,
        }
    }

    /// Apply every finished detection. Returns how many were applied (stale
    /// completions are not counted).
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.client.try_completion() {
            if self.apply_completion(completion) {
                applied += 1;
            }
        }
        applied
    }

    fn apply_completion(&mut self, completion: Completion) -> bool {
        if completion.session != self.session || !self.source.is_active() {
            self.stats.stale += 1;
            let stale = PipelineError::StaleResponse {
                session: completion.session,
            };
            log::debug!("Pipeline: dispatch #{} discarded: {}", completion.dispatch_id, stale);
            return false;
        }
        match completion.outcome {
            Ok(classification) => {
                self.stats.resolved += 1;
                self.gate.apply(&classification, &mut self.sink);
                log::debug!(
                    "Pipeline: dispatch #{} classified '{}', damage level {}",
                    completion.dispatch_id,
                    classification.label.as_str(),
                    self.gate.level()
                );
            }
            Err(err) => {
                self.stats.failed += 1;
                log::warn!("Pipeline: dispatch #{} failed: {}", completion.dispatch_id, err);
            }
        }
        true
    }

    /// Block until the current dispatch (if any) has finished, then apply it.
    pub fn wait_for_detection(&mut self) -> usize {
        self.client.wait_idle();
        self.drain_completions()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            session: self.session,
            is_streaming: self.source.is_active(),
            damage_level: self.gate.level(),
            damage_threshold: self.gate.threshold(),
            alarming: self.gate.is_alarming(),
            in_flight: self.client.in_flight(),
            alerts: self.sink.feed().to_vec(),
            stats: self.stats.clone(),
        }
    }

    /// Start a session and tick at the device frame rate until `shutdown` is
    /// set or the camera becomes unavailable.
    pub fn run_until(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.start()?;
        let mut last_snapshot = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            let now = self.source.wait_for_tick();
            self.process_tick_at(now)?;

            if now.duration_since(last_snapshot) >= self.snapshot_interval {
                last_snapshot = now;
                let snapshot = self.snapshot();
                log::info!(
                    "Pipeline: session={} ticks={} dispatched={} resolved={} failed={} damage={} alerts={}",
                    snapshot.session,
                    snapshot.stats.ticks,
                    snapshot.stats.dispatched,
                    snapshot.stats.resolved,
                    snapshot.stats.failed,
                    snapshot.damage_level,
                    snapshot.alerts.len()
                );
            }
        }
        self.stop();
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
