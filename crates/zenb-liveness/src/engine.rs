//! Challenge Engine
//!
//! Owns the run state and maps face observations to step transitions.
//! Every operation mutates [`RunState`] and returns the [`EngineEffect`]s the
//! host has to apply (capture, progress, prompt, completion). The engine never
//! calls a collaborator itself, which keeps it deterministic and lets the
//! session serialize all mutations through one queue.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, LivenessConfig};
use crate::observation::{DetectionOutcome, FaceObservation};
use crate::step::{ChallengeStep, StepSequence};
use crate::timeout::{TickOutcome, TimeoutMonitor};

/// Run phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    /// Created, `start()` not called yet
    Idle,
    /// Waiting for the step at this index
    Active(usize),
    Completed,
    /// Monitoring window expired while waiting for `step`
    Invalidated { step: usize },
}

/// Why a run ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RunError {
    #[error("monitoring window expired at step {step}")]
    TimeoutExpired { step: usize },
}

/// Terminal result, delivered once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub error: Option<RunError>,
    pub epoch: u64,
    pub completed_steps: Vec<usize>,
}

/// Instruction for the host, in the order it must be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEffect {
    /// Snapshot the live frame into `slot`
    Capture { step: usize, slot: usize },
    /// Drop every stored capture
    ClearCaptures,
    /// Push a cumulative percent to the indicator. Zero resets it.
    Progress { percent: u8 },
    /// Show a label. `step` is `None` once all steps are done.
    Prompt { step: Option<usize>, label: String },
    Invalidated { step: usize },
    Finished(RunOutcome),
}

/// Mutable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    phase: RunPhase,
    current_step_index: usize,
    completed_steps: Vec<usize>,
    captured_slots: Vec<usize>,
    epoch: u64,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            current_step_index: 0,
            completed_steps: Vec::new(),
            captured_slots: Vec::new(),
            epoch: 0,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    /// Completed step indices in completion order
    pub fn completed_steps(&self) -> &[usize] {
        &self.completed_steps
    }

    pub fn captured_slots(&self) -> &[usize] {
        &self.captured_slots
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, RunPhase::Active(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, RunPhase::Completed | RunPhase::Invalidated { .. })
    }
}

/// Challenge Engine
#[derive(Debug, Clone)]
pub struct ChallengeEngine {
    sequence: StepSequence,
    eye_open_threshold: f32,
    done_label: String,
    report_timeout_as_failure: bool,
    monitor: TimeoutMonitor,
    state: RunState,
}

impl ChallengeEngine {
    pub fn new(config: &LivenessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sequence = config.step_sequence()?;
        Ok(Self::with_sequence(sequence, config))
    }

    /// Build around an already resolved sequence; step configuration in
    /// `config` is ignored.
    pub fn with_sequence(sequence: StepSequence, config: &LivenessConfig) -> Self {
        Self {
            sequence,
            eye_open_threshold: config.eye_open_threshold,
            done_label: config.done_label.clone(),
            report_timeout_as_failure: config.report_timeout_as_failure,
            monitor: TimeoutMonitor::new(config.timeout_ticks),
            state: RunState::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn sequence(&self) -> &StepSequence {
        &self.sequence
    }

    /// Step awaited right now, if the run is active.
    pub fn current_step(&self) -> Option<&ChallengeStep> {
        match self.state.phase {
            RunPhase::Active(i) => self.sequence.get(i),
            _ => None,
        }
    }

    pub fn remaining_ticks(&self) -> u32 {
        self.monitor.remaining()
    }

    /// Whether the next frame is worth sending to the detector: the run is
    /// active and not every slot has a capture yet.
    pub fn wants_frames(&self) -> bool {
        self.state.is_active() && self.state.captured_slots.len() < self.sequence.len()
    }

    /// `(label, completed)` for every step, in sequence order.
    pub fn step_checklist(&self) -> Vec<(&str, bool)> {
        self.sequence
            .iter()
            .enumerate()
            .map(|(i, step)| (step.label.as_str(), self.state.completed_steps.contains(&i)))
            .collect()
    }

    /// Idle -> Active(0). Ignored in any other phase; use `reset()` to leave a
    /// finished run.
    pub fn start(&mut self) -> Vec<EngineEffect> {
        if self.state.phase != RunPhase::Idle {
            debug!(phase = ?self.state.phase, "start ignored, run already started");
            return Vec::new();
        }
        self.state.epoch += 1;
        self.state.phase = RunPhase::Active(0);
        self.state.current_step_index = 0;
        self.monitor.restart();
        info!(epoch = self.state.epoch, steps = self.sequence.len(), "liveness run started");
        vec![self.prompt_for(0)]
    }

    /// Any phase -> Active(0) with progress, captures and history cleared.
    /// Starts a new run, so the monitoring window is re-armed in full.
    pub fn reset(&mut self) -> Vec<EngineEffect> {
        self.state.epoch += 1;
        self.state.phase = RunPhase::Active(0);
        self.state.current_step_index = 0;
        self.state.completed_steps.clear();
        self.state.captured_slots.clear();
        self.monitor.cancel();
        self.monitor.restart();
        info!(epoch = self.state.epoch, "liveness run reset");
        vec![
            EngineEffect::Progress { percent: 0 },
            EngineEffect::ClearCaptures,
            self.prompt_for(0),
        ]
    }

    /// Apply a detector result produced for a frame submitted during `epoch`.
    ///
    /// Results from an earlier epoch (a frame submitted before a reset) and
    /// ambiguous frames with zero or several faces are dropped.
    pub fn accept_detection(
        &mut self,
        epoch: u64,
        outcome: &DetectionOutcome,
    ) -> Vec<EngineEffect> {
        if epoch != self.state.epoch {
            debug!(epoch, current = self.state.epoch, "discarding stale detection");
            return Vec::new();
        }
        match outcome.single_face() {
            Some(face) => self.evaluate(face),
            None => {
                debug!(faces = outcome.face_count(), "skipping ambiguous frame");
                Vec::new()
            }
        }
    }

    /// Evaluate one observation against the active step.
    pub fn evaluate(&mut self, obs: &FaceObservation) -> Vec<EngineEffect> {
        let index = match self.state.phase {
            RunPhase::Active(i) => i,
            _ => return Vec::new(),
        };
        let step = match self.sequence.get(index) {
            Some(step) => step,
            None => return Vec::new(),
        };
        if !step.accepts(obs, self.eye_open_threshold)
            || self.state.completed_steps.contains(&index)
        {
            return Vec::new();
        }

        let slot = step.slot;
        let percent = step.progress_percent;
        self.state.completed_steps.push(index);
        self.state.captured_slots.push(slot);
        info!(step = index, slot, percent, yaw = obs.head_yaw_deg, "challenge step passed");

        let mut effects = vec![
            EngineEffect::Capture { step: index, slot },
            EngineEffect::Progress { percent },
        ];

        let next = index + 1;
        if next < self.sequence.len() {
            self.state.phase = RunPhase::Active(next);
            self.state.current_step_index = next;
            self.monitor.restart();
            effects.push(self.prompt_for(next));
        } else {
            self.state.phase = RunPhase::Completed;
            self.monitor.cancel();
            info!(epoch = self.state.epoch, "liveness run completed");
            effects.push(EngineEffect::Prompt {
                step: None,
                label: self.done_label.clone(),
            });
            effects.push(EngineEffect::Finished(RunOutcome {
                success: true,
                error: None,
                epoch: self.state.epoch,
                completed_steps: self.state.completed_steps.clone(),
            }));
        }
        effects
    }

    /// Advance the monitoring window by one tick.
    ///
    /// Expiry invalidates the run and clears the completed-step history. The
    /// progress indicator is left as is; only `reset()` clears it.
    pub fn tick(&mut self) -> Vec<EngineEffect> {
        let step = match self.state.phase {
            RunPhase::Active(i) => i,
            _ => return Vec::new(),
        };
        match self.monitor.tick() {
            TickOutcome::Expired => {}
            TickOutcome::Idle | TickOutcome::Running { .. } => return Vec::new(),
        }

        self.state.phase = RunPhase::Invalidated { step };
        self.state.completed_steps.clear();
        info!(epoch = self.state.epoch, step, "liveness run timed out");

        let mut effects = vec![EngineEffect::Invalidated { step }];
        if self.report_timeout_as_failure {
            effects.push(EngineEffect::Finished(RunOutcome {
                success: false,
                error: Some(RunError::TimeoutExpired { step }),
                epoch: self.state.epoch,
                completed_steps: Vec::new(),
            }));
        }
        effects
    }

    fn prompt_for(&self, index: usize) -> EngineEffect {
        EngineEffect::Prompt {
            step: Some(index),
            label: self
                .sequence
                .get(index)
                .map(|s| s.label.clone())
                .unwrap_or_default(),
        }
    }
}

impl Default for ChallengeEngine {
    fn default() -> Self {
        Self::with_sequence(StepSequence::default(), &LivenessConfig::default())
    }
}
