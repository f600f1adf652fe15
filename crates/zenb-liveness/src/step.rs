//! Challenge steps and their acceptance rules.
//!
//! A run walks an ordered, fixed sequence of steps (look left, look right,
//! smile). Each step owns the rule that decides whether a face observation
//! satisfies it, the capture slot its proof photo goes to, and the cumulative
//! progress percent awarded when it completes.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, StepConfig};
use crate::observation::FaceObservation;

/// Challenge types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    LookLeft,
    LookRight,
    Smile,
    /// Caller-defined step; label and rule must be configured explicitly
    Custom,
}

impl ChallengeKind {
    pub fn default_label(&self) -> &'static str {
        match self {
            ChallengeKind::LookLeft => "👈🏻 Look Left",
            ChallengeKind::LookRight => "👉🏻 Look Right",
            ChallengeKind::Smile => "🙂 Smile :)",
            ChallengeKind::Custom => "Follow the instruction",
        }
    }

    /// Rule used when the step does not configure one.
    ///
    /// `Smile` defaults to a centred-yaw band, which only proves the user faced
    /// the camera again. Detectors that classify smiles should configure
    /// [`AcceptanceRule::SmileAbove`] instead.
    pub fn default_rule(&self) -> Option<AcceptanceRule> {
        match self {
            ChallengeKind::LookLeft => Some(AcceptanceRule::YawBelow { degrees: -35.0 }),
            ChallengeKind::LookRight => Some(AcceptanceRule::YawAbove { degrees: 35.0 }),
            ChallengeKind::Smile => Some(AcceptanceRule::YawWithin {
                min: -3.0,
                max: 3.0,
            }),
            ChallengeKind::Custom => None,
        }
    }
}

/// Predicate over a single face observation. All comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcceptanceRule {
    YawBelow { degrees: f32 },
    YawAbove { degrees: f32 },
    YawWithin { min: f32, max: f32 },
    SmileAbove { probability: f32 },
}

impl AcceptanceRule {
    pub fn accepts(&self, obs: &FaceObservation) -> bool {
        let yaw = obs.head_yaw_deg;
        match *self {
            AcceptanceRule::YawBelow { degrees } => yaw < degrees,
            AcceptanceRule::YawAbove { degrees } => yaw > degrees,
            AcceptanceRule::YawWithin { min, max } => yaw > min && yaw < max,
            AcceptanceRule::SmileAbove { probability } => obs
                .smiling_probability
                .map_or(false, |p| p > probability),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match *self {
            AcceptanceRule::YawBelow { degrees } | AcceptanceRule::YawAbove { degrees } => {
                if !degrees.is_finite() || degrees.abs() > 90.0 {
                    return Err(format!("yaw threshold {} must be within [-90, 90]", degrees));
                }
            }
            AcceptanceRule::YawWithin { min, max } => {
                if !(min.is_finite() && max.is_finite()) || min >= max {
                    return Err(format!("yaw band [{}, {}] must have min < max", min, max));
                }
            }
            AcceptanceRule::SmileAbove { probability } => {
                if !(0.0..=1.0).contains(&probability) {
                    return Err(format!(
                        "smile probability {} must be in [0, 1]",
                        probability
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One configured challenge step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeStep {
    pub kind: ChallengeKind,
    pub label: String,
    pub rule: AcceptanceRule,
    /// Capture slot the proof photo is stored at
    pub slot: usize,
    /// Cumulative progress percent pushed to the indicator on completion
    pub progress_percent: u8,
}

impl ChallengeStep {
    /// Whether `obs` completes this step. The eye gate applies to every step so
    /// a blink or closed-eye frame never counts.
    pub fn accepts(&self, obs: &FaceObservation, eye_open_threshold: f32) -> bool {
        obs.eyes_open(eye_open_threshold) && self.rule.accepts(obs)
    }
}

/// `round(100 * (index + 1) / count)` in integer arithmetic.
pub fn derived_percent(index: usize, count: usize) -> u8 {
    if count == 0 {
        return 100;
    }
    let numerator = 200 * (index + 1) + count;
    ((numerator / (2 * count)).min(100)) as u8
}

/// Ordered, immutable step sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSequence {
    steps: Vec<ChallengeStep>,
}

impl StepSequence {
    /// Build and validate a sequence from its configuration.
    ///
    /// Missing labels and rules fall back to the kind's defaults, missing slots
    /// to the step position, and missing percents to [`derived_percent`].
    pub fn from_configs(configs: &[StepConfig]) -> Result<Self, ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::Validation(
                "steps must contain at least one step".to_string(),
            ));
        }

        let count = configs.len();
        let mut steps = Vec::with_capacity(count);
        let mut last_percent = 0u8;

        for (index, cfg) in configs.iter().enumerate() {
            let rule = cfg.rule.or_else(|| cfg.kind.default_rule()).ok_or_else(|| {
                ConfigError::Validation(format!("steps[{}]: custom step requires a rule", index))
            })?;
            rule.validate()
                .map_err(|e| ConfigError::Validation(format!("steps[{}]: {}", index, e)))?;

            let percent = cfg
                .progress_percent
                .unwrap_or_else(|| derived_percent(index, count));
            if percent == 0 || percent > 100 {
                return Err(ConfigError::Validation(format!(
                    "steps[{}]: progress_percent must be in [1, 100]",
                    index
                )));
            }
            if percent < last_percent {
                return Err(ConfigError::Validation(format!(
                    "steps[{}]: progress_percent {} is below the previous step's {}",
                    index, percent, last_percent
                )));
            }
            last_percent = percent;

            let slot = cfg.slot.unwrap_or(index);
            if steps.iter().any(|s: &ChallengeStep| s.slot == slot) {
                return Err(ConfigError::Validation(format!(
                    "steps[{}]: capture slot {} is already assigned",
                    index, slot
                )));
            }

            steps.push(ChallengeStep {
                kind: cfg.kind,
                label: cfg
                    .label
                    .clone()
                    .unwrap_or_else(|| cfg.kind.default_label().to_string()),
                rule,
                slot,
                progress_percent: percent,
            });
        }

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChallengeStep> {
        self.steps.get(index)
    }

    pub fn first(&self) -> Option<&ChallengeStep> {
        self.steps.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChallengeStep> {
        self.steps.iter()
    }
}

impl Default for StepSequence {
    /// Look left, look right, smile with the authored 33 / 66 / 100 split.
    fn default() -> Self {
        let steps = [
            (ChallengeKind::LookLeft, 33u8),
            (ChallengeKind::LookRight, 66),
            (ChallengeKind::Smile, 100),
        ]
        .iter()
        .enumerate()
        .filter_map(|(slot, &(kind, percent))| {
            kind.default_rule().map(|rule| ChallengeStep {
                kind,
                label: kind.default_label().to_string(),
                rule,
                slot,
                progress_percent: percent,
            })
        })
        .collect();
        Self { steps }
    }
}
