//! Face detector contract and a scripted implementation for hosts without a
//! camera (simulations, tests).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

use crate::frame::Frame;
use crate::observation::DetectionOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionError {
    #[error("detector backend failed: {0}")]
    Backend(String),
    #[error("scripted detector has no results left")]
    ScriptExhausted,
    #[error("detector did not answer within {0:?}")]
    TimedOut(Duration),
}

/// Face detection engine.
#[async_trait]
pub trait FaceObserver: Send + Sync {
    /// Detect faces in one frame.
    async fn detect(&self, frame: &Frame) -> Result<DetectionOutcome, DetectionError>;
}

pub type ScriptedDetection = Result<DetectionOutcome, DetectionError>;

/// Replays pre-recorded detector results, one per `detect` call.
#[derive(Debug, Default)]
pub struct ScriptedObserver {
    script: Mutex<VecDeque<ScriptedDetection>>,
    latency: Option<Duration>,
}

impl ScriptedObserver {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = ScriptedDetection>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            latency: None,
        }
    }

    /// Delay every result by `latency`, simulating an asynchronous backend.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push(&self, result: ScriptedDetection) {
        self.script.lock().push_back(result);
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl FaceObserver for ScriptedObserver {
    async fn detect(&self, _frame: &Frame) -> Result<DetectionOutcome, DetectionError> {
        let next = self.script.lock().pop_front();
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        next.unwrap_or(Err(DetectionError::ScriptExhausted))
    }
}
