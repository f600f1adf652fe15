use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::step::{AcceptanceRule, ChallengeKind, StepSequence};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Liveness run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Left-eye-open probability a frame must exceed to count for any step
    pub eye_open_threshold: f32,
    /// Monitoring window, in ticks, restarted on start and on every transition
    pub timeout_ticks: u32,
    /// Duration of one tick in milliseconds
    pub tick_interval_ms: u64,
    /// Frames per second handed to the detector
    pub max_fps: u32,
    /// Label shown once every step is complete
    pub done_label: String,
    /// Fire the terminal callback with a failure when the window expires
    #[serde(default)]
    pub report_timeout_as_failure: bool,
    /// Capacity of the session command queue; frames beyond it are dropped
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Upper bound on one detector call before it counts as failed
    #[serde(default = "default_detection_timeout_ms")]
    pub detection_timeout_ms: u64,
    pub steps: Vec<StepConfig>,
}

fn default_command_buffer() -> usize {
    64
}

fn default_detection_timeout_ms() -> u64 {
    2_000
}

/// One step as written in configuration. Unset fields take the kind's
/// defaults (see [`StepSequence::from_configs`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub kind: ChallengeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<AcceptanceRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
}

impl StepConfig {
    pub fn authored(kind: ChallengeKind, progress_percent: u8) -> Self {
        Self {
            kind,
            label: None,
            rule: None,
            slot: None,
            progress_percent: Some(progress_percent),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            eye_open_threshold: 0.4,
            timeout_ticks: 10,
            tick_interval_ms: 1_000,
            max_fps: 5,
            done_label: "Done ✅".to_string(),
            report_timeout_as_failure: false,
            command_buffer: default_command_buffer(),
            detection_timeout_ms: default_detection_timeout_ms(),
            steps: vec![
                StepConfig::authored(ChallengeKind::LookLeft, 33),
                StepConfig::authored(ChallengeKind::LookRight, 66),
                StepConfig::authored(ChallengeKind::Smile, 100),
            ],
        }
    }
}

impl LivenessConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LivenessConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    /// Environment variables are prefixed with ZENB_LIVENESS_
    /// Example: ZENB_LIVENESS_TIMEOUT_TICKS=15
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults, then the file if it exists, then the environment.
    pub fn load_layered(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            _ => LivenessConfig::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment variable overrides
    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use std::env;

        if let Ok(val) = env::var("ZENB_LIVENESS_EYE_OPEN_THRESHOLD") {
            self.eye_open_threshold = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid ZENB_LIVENESS_EYE_OPEN_THRESHOLD".to_string())
            })?;
        }
        if let Ok(val) = env::var("ZENB_LIVENESS_TIMEOUT_TICKS") {
            self.timeout_ticks = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid ZENB_LIVENESS_TIMEOUT_TICKS".to_string())
            })?;
        }
        if let Ok(val) = env::var("ZENB_LIVENESS_TICK_INTERVAL_MS") {
            self.tick_interval_ms = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid ZENB_LIVENESS_TICK_INTERVAL_MS".to_string())
            })?;
        }
        if let Ok(val) = env::var("ZENB_LIVENESS_MAX_FPS") {
            self.max_fps = val
                .parse()
                .map_err(|_| ConfigError::Validation("Invalid ZENB_LIVENESS_MAX_FPS".to_string()))?;
        }
        if let Ok(val) = env::var("ZENB_LIVENESS_DETECTION_TIMEOUT_MS") {
            self.detection_timeout_ms = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid ZENB_LIVENESS_DETECTION_TIMEOUT_MS".to_string())
            })?;
        }
        if let Ok(val) = env::var("ZENB_LIVENESS_REPORT_TIMEOUT_AS_FAILURE") {
            self.report_timeout_as_failure = val.parse().map_err(|_| {
                ConfigError::Validation(
                    "Invalid ZENB_LIVENESS_REPORT_TIMEOUT_AS_FAILURE".to_string(),
                )
            })?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.eye_open_threshold) {
            return Err(ConfigError::Validation(
                "eye_open_threshold must be in [0, 1)".to_string(),
            ));
        }
        if self.timeout_ticks == 0 {
            return Err(ConfigError::Validation(
                "timeout_ticks must be positive".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_fps == 0 || self.max_fps > 60 {
            return Err(ConfigError::Validation(
                "max_fps must be in [1, 60]".to_string(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(ConfigError::Validation(
                "command_buffer must be positive".to_string(),
            ));
        }
        if self.detection_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "detection_timeout_ms must be positive".to_string(),
            ));
        }

        StepSequence::from_configs(&self.steps)?;
        Ok(())
    }

    /// Resolved step sequence.
    pub fn step_sequence(&self) -> Result<StepSequence, ConfigError> {
        StepSequence::from_configs(&self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_valid() {
        let config = LivenessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.step_sequence().unwrap(), StepSequence::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LivenessConfig::default();
        config.eye_open_threshold = 1.0;
        assert!(config.validate().is_err());

        let mut config = LivenessConfig::default();
        config.timeout_ticks = 0;
        assert!(config.validate().is_err());

        let mut config = LivenessConfig::default();
        config.max_fps = 0;
        assert!(config.validate().is_err());

        let mut config = LivenessConfig::default();
        config.detection_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = LivenessConfig::default();
        config.steps.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = LivenessConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = LivenessConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.steps, config.steps);
        assert_eq!(parsed.timeout_ticks, 10);
        assert_eq!(parsed.done_label, "Done ✅");
    }

    #[test]
    fn test_config_from_file_with_custom_rule() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
eye_open_threshold = 0.5
timeout_ticks = 8
tick_interval_ms = 500
max_fps = 10
done_label = "Verified"

[[steps]]
kind = "look_left"

[[steps]]
kind = "smile"
label = "Smile please"
rule = {{ type = "smile_above", probability = 0.8 }}
"#
        )
        .unwrap();

        let config = LivenessConfig::from_file(file.path()).unwrap();
        assert!(!config.report_timeout_as_failure);
        assert_eq!(config.command_buffer, 64);
        assert_eq!(config.detection_timeout_ms, 2_000);

        let seq = config.step_sequence().unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.get(0).unwrap().progress_percent, 50);
        let smile = seq.get(1).unwrap();
        assert_eq!(smile.label, "Smile please");
        assert_eq!(smile.rule, AcceptanceRule::SmileAbove { probability: 0.8 });
        assert_eq!(smile.progress_percent, 100);
    }

    #[test]
    fn test_config_rejects_bad_band() {
        let text = r#"
eye_open_threshold = 0.4
timeout_ticks = 10
tick_interval_ms = 1000
max_fps = 5
done_label = "Done"

[[steps]]
kind = "smile"
rule = { type = "yaw_within", min = 3.0, max = -3.0 }
"#;
        assert!(matches!(
            LivenessConfig::from_toml_str(text),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_load_layered_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LivenessConfig::load_layered(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.steps.len(), 3);
    }
}
