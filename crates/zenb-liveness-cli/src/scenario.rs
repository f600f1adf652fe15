//! Scripted camera input for `zenb-liveness simulate`.
//!
//! A scenario is a TOML list of frames. Each frame carries what the detector
//! should report for it, plus optional host actions applied before the frame
//! is submitted:
//!
//! ```toml
//! frame_interval_ms = 250
//!
//! [[frames]]
//! faces = [{ head_yaw_deg = -40.0, left_eye_open_probability = 0.9 }]
//!
//! [[frames]]
//! ticks_before = 4
//! error = "model not loaded"
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use zenb_liveness::{DetectionError, DetectionOutcome, FaceObservation, FaceObserver, Frame};

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Scenario error: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub description: Option<String>,
    /// Spacing between frame timestamps
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Ticks delivered after the last frame
    #[serde(default)]
    pub ticks_after: u32,
    pub frames: Vec<ScenarioFrame>,
}

fn default_frame_interval_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioFrame {
    #[serde(default)]
    pub reset_before: bool,
    #[serde(default)]
    pub ticks_before: u32,
    /// Faces the detector reports; empty means no face in view
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
    /// Detector failure instead of faces
    #[serde(default)]
    pub error: Option<String>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = toml::from_str(content)?;
        if scenario.frame_interval_ms == 0 {
            return Err(ScenarioError::Invalid(
                "frame_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(i) = scenario
            .frames
            .iter()
            .position(|f| f.error.is_some() && !f.faces.is_empty())
        {
            return Err(ScenarioError::Invalid(format!(
                "frame {} sets both faces and error",
                i
            )));
        }
        Ok(scenario)
    }

    /// Camera timestamp of frame `index`, in microseconds.
    pub fn timestamp_us(&self, index: usize) -> i64 {
        (index as u64 * self.frame_interval_ms * 1_000) as i64
    }
}

/// Answers detections by frame sequence number.
pub struct ScenarioObserver {
    frames: HashMap<u64, ScenarioFrame>,
}

impl ScenarioObserver {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            frames: scenario
                .frames
                .iter()
                .cloned()
                .enumerate()
                .map(|(i, f)| (i as u64, f))
                .collect(),
        }
    }
}

#[async_trait]
impl FaceObserver for ScenarioObserver {
    async fn detect(&self, frame: &Frame) -> Result<DetectionOutcome, DetectionError> {
        match self.frames.get(&frame.sequence) {
            Some(ScenarioFrame {
                error: Some(reason),
                ..
            }) => Err(DetectionError::Backend(reason.clone())),
            Some(f) => Ok(DetectionOutcome::from_faces(f.faces.clone())),
            None => Ok(DetectionOutcome::none()),
        }
    }
}
