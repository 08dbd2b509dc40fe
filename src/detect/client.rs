//! Single-flight detection dispatch.
//!
//! `DetectionClient::submit` claims the dispatch slot on the caller's thread,
//! then hands the frame to a worker that waits out the staging delay, calls the
//! transport once and posts a `Completion` back over a channel. The slot is
//! released by `DispatchGuard::drop`, which runs on every exit path of the
//! worker: normal completion, cancellation during staging, transport panic.
//!
//! Phases: `Idle → Staging → Sending → {Resolved | Failed} → Idle`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::result::Classification;
use crate::detect::transport::DetectionTransport;
use crate::error::PipelineError;
use crate::frame::EncodedFrame;

pub const DEFAULT_STAGING_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    Staging,
    Sending,
    Resolved,
    Failed,
}

// ----------------------------------------------------------------------------
// Dispatch slot: the in-flight flag
// ----------------------------------------------------------------------------

struct DispatchSlot {
    busy: AtomicBool,
    phase: Mutex<DispatchPhase>,
}

impl DispatchSlot {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            phase: Mutex::new(DispatchPhase::Idle),
        }
    }

    fn set_phase(&self, phase: DispatchPhase) {
        match self.phase.lock() {
            Ok(mut guard) => *guard = phase,
            Err(poisoned) => *poisoned.into_inner() = phase,
        }
    }

    fn phase(&self) -> DispatchPhase {
        match self.phase.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

fn try_claim(slot: &Arc<DispatchSlot>) -> Option<DispatchGuard> {
    slot.busy
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .ok()?;
    slot.set_phase(DispatchPhase::Staging);
    Some(DispatchGuard { slot: slot.clone() })
}

/// Ownership of the dispatch slot. Dropping it returns the client to `Idle`.
struct DispatchGuard {
    slot: Arc<DispatchSlot>,
}

impl DispatchGuard {
    fn enter(&self, phase: DispatchPhase) {
        self.slot.set_phase(phase);
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.slot.set_phase(DispatchPhase::Idle);
        self.slot.busy.store(false, Ordering::SeqCst);
    }
}

/// Read-only handle on the client's in-flight flag.
#[derive(Clone)]
pub struct InFlightFlag {
    slot: Arc<DispatchSlot>,
}

impl InFlightFlag {
    /// True while a detection is staged or in transit.
    pub fn is_set(&self) -> bool {
        self.slot.busy.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> DispatchPhase {
        self.slot.phase()
    }
}

// ----------------------------------------------------------------------------
// StagingTimer: cancellable delay between admission and send
// ----------------------------------------------------------------------------

/// Caller-side half of the staging delay. `cancel` (or dropping the timer)
/// wakes the worker immediately and the dispatch is abandoned before any
/// network call.
pub struct StagingTimer {
    cancel: Option<Sender<()>>,
}

/// Worker-side half of the staging delay.
pub struct StagingWait {
    delay: Duration,
    cancelled: Receiver<()>,
}

impl StagingTimer {
    pub fn arm(delay: Duration) -> (StagingTimer, StagingWait) {
        let (tx, rx) = mpsc::channel();
        (
            StagingTimer { cancel: Some(tx) },
            StagingWait {
                delay,
                cancelled: rx,
            },
        )
    }

    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

impl StagingWait {
    /// Wait out the delay. Returns false when cancelled.
    pub fn wait(self) -> bool {
        if self.delay.is_zero() {
            return matches!(self.cancelled.try_recv(), Err(TryRecvError::Empty));
        }
        matches!(
            self.cancelled.recv_timeout(self.delay),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

// ----------------------------------------------------------------------------
// DetectionClient
// ----------------------------------------------------------------------------

/// Result of one dispatch, tagged with the session it was admitted in.
#[derive(Debug)]
pub struct Completion {
    pub session: u64,
    pub dispatch_id: u64,
    pub outcome: Result<Classification, PipelineError>,
}

pub struct DetectionClient {
    transport: Arc<dyn DetectionTransport>,
    staging_delay: Duration,
    slot: Arc<DispatchSlot>,
    timer: Option<StagingTimer>,
    worker: Option<JoinHandle<()>>,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    dispatched: u64,
}

impl DetectionClient {
    pub fn new(transport: Arc<dyn DetectionTransport>, staging_delay: Duration) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            transport,
            staging_delay,
            slot: Arc::new(DispatchSlot::new()),
            timer: None,
            worker: None,
            completions_tx,
            completions_rx,
            dispatched: 0,
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn staging_delay(&self) -> Duration {
        self.staging_delay
    }

    pub fn in_flight(&self) -> bool {
        self.slot.busy.load(Ordering::SeqCst)
    }

    pub fn in_flight_flag(&self) -> InFlightFlag {
        InFlightFlag {
            slot: self.slot.clone(),
        }
    }

    pub fn phase(&self) -> DispatchPhase {
        self.slot.phase()
    }

    /// Stage `frame` for classification on behalf of `session`.
    ///
    /// The in-flight flag is set before this returns. Fails with
    /// `PipelineError::Busy`, and leaves everything untouched, while a
    /// previous dispatch is still staged or in transit.
    pub fn submit(&mut self, frame: EncodedFrame, session: u64) -> Result<u64, PipelineError> {
        let guard = try_claim(&self.slot).ok_or(PipelineError::Busy)?;
        let dispatch_id = self.dispatched + 1;
        let (timer, wait) = StagingTimer::arm(self.staging_delay);
        let transport = self.transport.clone();
        let completions = self.completions_tx.clone();

        let worker = std::thread::Builder::new()
            .name(format!("detect-dispatch-{}", dispatch_id))
            .spawn(move || {
                run_dispatch(
                    guard,
                    wait,
                    transport.as_ref(),
                    frame,
                    session,
                    dispatch_id,
                    &completions,
                )
            })
            .map_err(|err| PipelineError::DetectionFailed(format!("spawn dispatch worker: {}", err)))?;

        self.dispatched = dispatch_id;
        self.timer = Some(timer);
        self.worker = Some(worker);
        log::debug!(
            "DetectionClient: dispatch #{} staged for {:?} (session {})",
            dispatch_id,
            self.staging_delay,
            session
        );
        Ok(dispatch_id)
    }

    /// Abandon a dispatch that is still staging. A request already on the wire
    /// is left to finish; its completion is the caller's to discard.
    pub fn cancel(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Next finished dispatch, if any.
    pub fn try_completion(&self) -> Option<Completion> {
        self.completions_rx.try_recv().ok()
    }

    /// Block until the current worker (if any) has exited.
    pub fn wait_idle(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("DetectionClient: dispatch worker panicked");
            }
        }
    }

    /// Number of dispatches staged so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

impl Drop for DetectionClient {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_dispatch(
    guard: DispatchGuard,
    wait: StagingWait,
    transport: &dyn DetectionTransport,
    frame: EncodedFrame,
    session: u64,
    dispatch_id: u64,
    completions: &Sender<Completion>,
) {
    if !wait.wait() {
        log::debug!("DetectionClient: dispatch #{} cancelled while staging", dispatch_id);
        return;
    }

    guard.enter(DispatchPhase::Sending);
    let outcome = transport
        .classify(&frame)
        .map_err(|err| match err.downcast::<PipelineError>() {
            Ok(PipelineError::DetectionFailed(msg)) => PipelineError::DetectionFailed(msg),
            Ok(other) => PipelineError::DetectionFailed(other.to_string()),
            Err(err) => PipelineError::DetectionFailed(format!("{:#}", err)),
        });
    drop(frame);

    guard.enter(match outcome {
        Ok(_) => DispatchPhase::Resolved,
        Err(_) => DispatchPhase::Failed,
    });
    if completions
        .send(Completion {
            session,
            dispatch_id,
            outcome,
        })
        .is_err()
    {
        log::debug!("DetectionClient: dispatch #{} finished after client teardown", dispatch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn frame() -> EncodedFrame {
        EncodedFrame {
            payload: vec![1, 2, 3],
            mime_type: "image/png",
            width: 1,
            height: 1,
        }
    }

    struct CountingTransport {
        calls: AtomicUsize,
    }

    impl DetectionTransport for CountingTransport {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn classify(&self, _frame: &EncodedFrame) -> anyhow::Result<Classification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Classification::other("clear"))
        }
    }

    struct PanickingTransport;

    impl DetectionTransport for PanickingTransport {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn classify(&self, _frame: &EncodedFrame) -> anyhow::Result<Classification> {
            panic!("transport exploded");
        }
    }

    #[test]
    fn flag_is_set_on_submit_and_cleared_after_completion() {
        let transport = Arc::new(StubTransport::fixed(Classification::dangerous("fire")));
        let mut client = DetectionClient::new(transport, Duration::from_millis(20));
        assert_eq!(client.phase(), DispatchPhase::Idle);

        client.submit(frame(), 1).unwrap();
        assert!(client.in_flight());
        assert_eq!(client.phase(), DispatchPhase::Staging);
        assert_eq!(client.submit(frame(), 1), Err(PipelineError::Busy));

        client.wait_idle();
        assert!(!client.in_flight());
        assert_eq!(client.phase(), DispatchPhase::Idle);

        let completion = client.try_completion().unwrap();
        assert_eq!(completion.session, 1);
        assert_eq!(completion.dispatch_id, 1);
        assert!(completion.outcome.unwrap().label.is_dangerous());
        assert_eq!(client.dispatched(), 1);
    }

    #[test]
    fn cancel_during_staging_skips_transport() {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        let mut client = DetectionClient::new(transport.clone(), Duration::from_secs(30));
        client.submit(frame(), 1).unwrap();

        let started = Instant::now();
        client.cancel();
        client.wait_idle();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(!client.in_flight());
        assert!(client.try_completion().is_none());
    }

    #[test]
    fn panicking_transport_still_releases_flag() {
        let mut client = DetectionClient::new(Arc::new(PanickingTransport), Duration::ZERO);
        client.submit(frame(), 1).unwrap();
        client.wait_idle();
        assert!(!client.in_flight());
        assert_eq!(client.phase(), DispatchPhase::Idle);
        assert!(client.submit(frame(), 1).is_ok());
        client.wait_idle();
    }

    #[test]
    fn staging_wait_reports_cancellation() {
        let (mut timer, wait) = StagingTimer::arm(Duration::from_secs(30));
        timer.cancel();
        assert!(!wait.wait());

        let (_timer, wait) = StagingTimer::arm(Duration::from_millis(1));
        assert!(wait.wait());

        let (timer, wait) = StagingTimer::arm(Duration::ZERO);
        drop(timer);
        assert!(!wait.wait());
    }
}
