//! Liveness Session
//!
//! Async runtime around [`ChallengeEngine`]. One task owns the engine, the
//! progress indicator and the frame throttle; host commands, detector results
//! and timer ticks are all funnelled into that task and handled one at a time,
//! so run state is never mutated concurrently.
//!
//! ```text
//! camera ──submit_frame──▶ ┌──────────────┐ ──detect──▶ FaceObserver
//! host ──start/reset─────▶ │ session task │ ◀─result───┘
//! interval ──tick────────▶ └──────────────┘ ──▶ CaptureSink / ProgressIndicator
//!                                 │
//!                                 └──SessionEvent──▶ host
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::capture::CaptureSink;
use crate::config::LivenessConfig;
use crate::detector::{DetectionError, FaceObserver};
use crate::engine::{ChallengeEngine, EngineEffect, RunOutcome, RunPhase};
use crate::frame::{Frame, FrameThrottle};
use crate::observation::DetectionOutcome;
use crate::progress::ProgressIndicator;
use crate::{LivenessError, LivenessResult};

/// Events delivered to the host, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Prompt { step: Option<usize>, label: String },
    Progress { percent: u8 },
    Captured { step: usize, slot: usize },
    /// Capture failed; the run continues without the photo
    CaptureWarning { step: usize, slot: usize, reason: String },
    Invalidated { step: usize },
    /// Terminal callback, once per completed or explicitly failed run
    Finished(RunOutcome),
}

/// Frame and detection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_received: u64,
    /// Dropped by the frame-rate cap
    pub frames_throttled: u64,
    /// Dropped because the run was not waiting for a capture
    pub frames_ignored: u64,
    /// Dropped because a detection was already in flight
    pub frames_busy: u64,
    pub detections_submitted: u64,
    /// Results received back, whatever their outcome
    pub detections_completed: u64,
    pub detections_failed: u64,
    pub detections_stale: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStatus {
    pub label: String,
    pub completed: bool,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: RunPhase,
    pub epoch: u64,
    pub current_step_index: usize,
    pub completed_steps: Vec<usize>,
    pub remaining_ticks: u32,
    pub checklist: Vec<StepStatus>,
    pub stats: SessionStats,
}

enum Command {
    Start,
    Reset,
    Frame(Frame),
    Tick,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<SessionStats>),
}

struct DetectionDone {
    epoch: u64,
    result: Result<DetectionOutcome, DetectionError>,
}

/// Cloneable handle used by the host and the camera callback.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub async fn start(&self) -> LivenessResult<()> {
        self.send(Command::Start).await
    }

    /// Safe at any time; detections already in flight are discarded when they
    /// come back.
    pub async fn reset(&self) -> LivenessResult<()> {
        self.send(Command::Reset).await
    }

    /// Advance the monitoring window by one tick. Only needed with
    /// [`LivenessSession::manual_ticks`].
    pub async fn tick(&self) -> LivenessResult<()> {
        self.send(Command::Tick).await
    }

    /// Offer a camera frame without waiting. Returns `false` when the queue is
    /// full and the frame was discarded, like a late video frame.
    pub fn submit_frame(&self, frame: Frame) -> LivenessResult<bool> {
        match self.tx.try_send(Command::Frame(frame)) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(LivenessError::ChannelClosed),
        }
    }

    pub async fn snapshot(&self) -> LivenessResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| LivenessError::ChannelClosed)
    }

    /// Stop the session task and return its final counters.
    pub async fn shutdown(&self) -> LivenessResult<SessionStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| LivenessError::ChannelClosed)
    }

    async fn send(&self, cmd: Command) -> LivenessResult<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| LivenessError::ChannelClosed)
    }
}

/// Session configuration before it is spawned.
pub struct LivenessSession {
    config: LivenessConfig,
    observer: Arc<dyn FaceObserver>,
    capture: Arc<dyn CaptureSink>,
    indicator: Box<dyn ProgressIndicator>,
    manual_ticks: bool,
}

impl LivenessSession {
    pub fn new(
        config: LivenessConfig,
        observer: Arc<dyn FaceObserver>,
        capture: Arc<dyn CaptureSink>,
        indicator: Box<dyn ProgressIndicator>,
    ) -> Self {
        Self {
            config,
            observer,
            capture,
            indicator,
            manual_ticks: false,
        }
    }

    /// Drive the monitoring window only through [`SessionHandle::tick`]
    /// instead of a `tick_interval_ms` timer.
    pub fn manual_ticks(mut self) -> Self {
        self.manual_ticks = true;
        self
    }

    /// Spawn the session task on the current tokio runtime.
    pub fn spawn(self) -> LivenessResult<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)> {
        let engine = ChallengeEngine::new(&self.config)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_buffer);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (detect_tx, detect_rx) = mpsc::unbounded_channel();

        let tick_period = if self.manual_ticks {
            None
        } else {
            Some(Duration::from_millis(self.config.tick_interval_ms))
        };

        let worker = SessionWorker {
            engine,
            throttle: FrameThrottle::new(self.config.max_fps),
            observer: self.observer,
            capture: self.capture,
            indicator: self.indicator,
            events: event_tx,
            detect_tx,
            detection_timeout: Duration::from_millis(self.config.detection_timeout_ms),
            in_flight: None,
            stats: SessionStats::default(),
        };
        tokio::spawn(worker.run(cmd_rx, detect_rx, tick_period));

        Ok((SessionHandle { tx: cmd_tx }, event_rx))
    }
}

struct SessionWorker {
    engine: ChallengeEngine,
    throttle: FrameThrottle,
    observer: Arc<dyn FaceObserver>,
    capture: Arc<dyn CaptureSink>,
    indicator: Box<dyn ProgressIndicator>,
    events: mpsc::UnboundedSender<SessionEvent>,
    detect_tx: mpsc::UnboundedSender<DetectionDone>,
    detection_timeout: Duration,
    /// Epoch of the run whose detection is outstanding
    in_flight: Option<u64>,
    stats: SessionStats,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut detections: mpsc::UnboundedReceiver<DetectionDone>,
        tick_period: Option<Duration>,
    ) {
        // Manual mode still needs a timer to select on; it is simply never polled.
        let period = tick_period.unwrap_or(Duration::from_secs(3600));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let timer_enabled = tick_period.is_some();

        info!(steps = self.engine.sequence().len(), "liveness session running");

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Shutdown(reply)) => {
                            let _ = reply.send(self.stats);
                            break;
                        }
                        Some(cmd) => {
                            if self.handle_command(cmd) {
                                ticker.reset();
                            }
                        }
                        None => break,
                    }
                }
                Some(done) = detections.recv() => {
                    if self.handle_detection(done) {
                        ticker.reset();
                    }
                }
                _ = ticker.tick(), if timer_enabled => {
                    let effects = self.engine.tick();
                    self.apply(effects);
                }
            }
        }

        info!(
            frames = self.stats.frames_received,
            detections = self.stats.detections_submitted,
            "liveness session stopped"
        );
    }

    /// Returns `true` when the engine re-armed its monitoring window, so the
    /// ticker has to restart its period from now.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Start => {
                let effects = self.engine.start();
                self.apply(effects)
            }
            Command::Reset => {
                self.throttle.reset();
                let effects = self.engine.reset();
                self.apply(effects)
            }
            Command::Tick => {
                let effects = self.engine.tick();
                self.apply(effects)
            }
            Command::Frame(frame) => {
                self.handle_frame(frame);
                false
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                false
            }
            Command::Shutdown(_) => false,
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.stats.frames_received += 1;
        self.capture.on_live_frame(&frame);

        if !self.throttle.admit(frame.timestamp_us) {
            self.stats.frames_throttled += 1;
            return;
        }
        if !self.engine.wants_frames() {
            self.stats.frames_ignored += 1;
            return;
        }
        let epoch = self.engine.state().epoch();
        // a detection left over from before a reset does not block the new run
        if self.in_flight == Some(epoch) {
            self.stats.frames_busy += 1;
            return;
        }

        self.in_flight = Some(epoch);
        self.stats.detections_submitted += 1;
        let observer = Arc::clone(&self.observer);
        let done_tx = self.detect_tx.clone();
        let limit = self.detection_timeout;
        tokio::spawn(async move {
            let result = match timeout(limit, observer.detect(&frame)).await {
                Ok(result) => result,
                Err(_) => Err(DetectionError::TimedOut(limit)),
            };
            let _ = done_tx.send(DetectionDone { epoch, result });
        });
    }

    fn handle_detection(&mut self, done: DetectionDone) -> bool {
        if self.in_flight == Some(done.epoch) {
            self.in_flight = None;
        }
        self.stats.detections_completed += 1;

        if done.epoch != self.engine.state().epoch() {
            self.stats.detections_stale += 1;
            debug!(epoch = done.epoch, "discarding detection from a previous run");
            return false;
        }
        match done.result {
            Ok(outcome) => {
                let effects = self.engine.accept_detection(done.epoch, &outcome);
                self.apply(effects)
            }
            Err(e) => {
                self.stats.detections_failed += 1;
                debug!(error = %e, "detection failed, waiting for next frame");
                false
            }
        }
    }

    /// Route effects to the collaborators and the host. Returns whether the
    /// batch re-armed the monitoring window (a prompt for a pending step).
    fn apply(&mut self, effects: Vec<EngineEffect>) -> bool {
        let rearmed = effects
            .iter()
            .any(|e| matches!(e, EngineEffect::Prompt { step: Some(_), .. }));
        for effect in effects {
            match effect {
                EngineEffect::Capture { step, slot } => match self.capture.capture(slot) {
                    Ok(()) => self.emit(SessionEvent::Captured { step, slot }),
                    Err(e) => {
                        warn!(step, slot, error = %e, "proof photo capture failed");
                        self.emit(SessionEvent::CaptureWarning {
                            step,
                            slot,
                            reason: e.to_string(),
                        });
                    }
                },
                EngineEffect::ClearCaptures => self.capture.clear(),
                EngineEffect::Progress { percent } => {
                    self.indicator.update_progress(f64::from(percent));
                    self.emit(SessionEvent::Progress { percent });
                }
                EngineEffect::Prompt { step, label } => {
                    self.emit(SessionEvent::Prompt { step, label })
                }
                EngineEffect::Invalidated { step } => self.emit(SessionEvent::Invalidated { step }),
                EngineEffect::Finished(outcome) => self.emit(SessionEvent::Finished(outcome)),
            }
        }
        rearmed
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = self.engine.state();
        SessionSnapshot {
            phase: state.phase(),
            epoch: state.epoch(),
            current_step_index: state.current_step_index(),
            completed_steps: state.completed_steps().to_vec(),
            remaining_ticks: self.engine.remaining_ticks(),
            checklist: self
                .engine
                .step_checklist()
                .into_iter()
                .map(|(label, completed)| StepStatus {
                    label: label.to_string(),
                    completed,
                })
                .collect(),
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LiveFrameCapture;
    use crate::detector::ScriptedObserver;
    use crate::observation::FaceObservation;
    use crate::progress::SegmentIndicator;
    use parking_lot::Mutex;

    fn face(yaw: f32, eye: f32) -> Result<DetectionOutcome, DetectionError> {
        Ok(DetectionOutcome::single(FaceObservation::new(yaw, eye)))
    }

    async fn next_finished(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> RunOutcome {
        loop {
            match events.recv().await {
                Some(SessionEvent::Finished(outcome)) => return outcome,
                Some(_) => continue,
                None => panic!("session ended without finishing"),
            }
        }
    }

    #[tokio::test]
    async fn test_session_runs_to_completion() {
        let observer = Arc::new(ScriptedObserver::new(vec![
            face(-40.0, 0.9),
            face(40.0, 0.9),
            face(0.0, 0.9),
        ]));
        let capture = Arc::new(LiveFrameCapture::new());
        let indicator = Arc::new(Mutex::new(SegmentIndicator::new()));

        let (handle, mut events) = LivenessSession::new(
            LivenessConfig::default(),
            observer,
            capture.clone(),
            Box::new(indicator.clone()),
        )
        .manual_ticks()
        .spawn()
        .unwrap();

        handle.start().await.unwrap();
        for i in 0..3u64 {
            handle
                .submit_frame(Frame::empty(i, i as i64 * 250_000))
                .unwrap();
            // let the detection land before offering the next frame
            loop {
                let snap = handle.snapshot().await.unwrap();
                if snap.stats.detections_submitted == i + 1
                    && snap.completed_steps.len() as u64 >= i + 1
                {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }

        let outcome = next_finished(&mut events).await;
        assert!(outcome.success);
        assert_eq!(outcome.completed_steps, vec![0, 1, 2]);
        assert_eq!(capture.captured_count(), 3);
        assert!((indicator.lock().percent() - 100.0).abs() < 1e-9);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.detections_submitted, 3);
        assert_eq!(stats.detections_completed, 3);
    }
}
