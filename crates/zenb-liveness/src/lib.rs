//! Active liveness challenge engine.
//!
//! Walks a user through an ordered set of face challenges (look left, look
//! right, smile), captures a proof photo at each step and reports the run's
//! outcome once.
//!
//! # Modules
//! - `engine`: the challenge state machine (pure, effect-returning)
//! - `step`: challenge steps and acceptance rules
//! - `timeout`: per-run monitoring window
//! - `progress`: progress indicator contract and segmented-ring model
//! - `session`: tokio task serializing frames, detections and ticks
//! - `capture`, `detector`, `frame`, `observation`: collaborator contracts
//! - `config`: TOML configuration with environment overrides
//!
//! # Example
//! ```rust
//! use zenb_liveness::{ChallengeEngine, EngineEffect, FaceObservation};
//!
//! let mut engine = ChallengeEngine::default();
//! engine.start();
//!
//! let effects = engine.evaluate(&FaceObservation::new(-40.0, 0.9));
//! assert!(effects.contains(&EngineEffect::Capture { step: 0, slot: 0 }));
//! assert!(effects.contains(&EngineEffect::Progress { percent: 33 }));
//! ```

pub mod capture;
pub mod config;
pub mod detector;
pub mod engine;
pub mod frame;
pub mod observation;
pub mod progress;
pub mod session;
pub mod step;
pub mod timeout;

pub use capture::{CaptureError, CaptureSink, CapturedImage, LiveFrameCapture};
pub use config::{ConfigError, LivenessConfig, StepConfig};
pub use detector::{DetectionError, FaceObserver, ScriptedDetection, ScriptedObserver};
pub use engine::{ChallengeEngine, EngineEffect, RunError, RunOutcome, RunPhase, RunState};
pub use frame::{Frame, FrameThrottle};
pub use observation::{DetectionOutcome, FaceObservation};
pub use progress::{
    IndicatorChange, ProgressIndicator, SegmentIndicator, SegmentSettings, SegmentUpdate,
};
pub use session::{
    LivenessSession, SessionEvent, SessionHandle, SessionSnapshot, SessionStats, StepStatus,
};
pub use step::{AcceptanceRule, ChallengeKind, ChallengeStep, StepSequence};
pub use timeout::{TickOutcome, TimeoutMonitor};

/// Result type for liveness operations
pub type LivenessResult<T> = Result<T, LivenessError>;

/// Errors surfaced to the host
#[derive(Debug, thiserror::Error)]
pub enum LivenessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    #[error("Run ended without a result")]
    Incomplete,

    #[error("Session channel closed")]
    ChannelClosed,
}

impl RunOutcome {
    /// `Ok` for a successful run, the failure reason otherwise.
    pub fn into_result(self) -> LivenessResult<()> {
        match (self.success, self.error) {
            (true, _) => Ok(()),
            (false, Some(err)) => Err(err.into()),
            (false, None) => Err(LivenessError::Incomplete),
        }
    }
}
