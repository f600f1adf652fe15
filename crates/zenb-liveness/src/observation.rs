//! Face observations produced by the detector for a single frame.

use serde::{Deserialize, Serialize};

/// One detector result describing face geometry for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    /// Probability that the left eye is open (0.0 - 1.0)
    pub left_eye_open_probability: f32,
    /// Head yaw (Euler Y) in degrees. Negative is a turn to the subject's left.
    pub head_yaw_deg: f32,
    /// Probability that the right eye is open, when the detector classifies it
    #[serde(default)]
    pub right_eye_open_probability: Option<f32>,
    /// Smiling probability, when the detector classifies it
    #[serde(default)]
    pub smiling_probability: Option<f32>,
}

impl FaceObservation {
    pub fn new(head_yaw_deg: f32, left_eye_open_probability: f32) -> Self {
        Self {
            left_eye_open_probability,
            head_yaw_deg,
            right_eye_open_probability: None,
            smiling_probability: None,
        }
    }

    pub fn with_smile(mut self, probability: f32) -> Self {
        self.smiling_probability = Some(probability);
        self
    }

    pub fn with_right_eye(mut self, probability: f32) -> Self {
        self.right_eye_open_probability = Some(probability);
        self
    }

    /// Eye-openness gate. Strict: a probability equal to the threshold fails.
    #[inline]
    pub fn eyes_open(&self, threshold: f32) -> bool {
        self.left_eye_open_probability > threshold
    }
}

/// All faces found in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub faces: Vec<FaceObservation>,
}

impl DetectionOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn single(face: FaceObservation) -> Self {
        Self { faces: vec![face] }
    }

    pub fn from_faces(faces: Vec<FaceObservation>) -> Self {
        Self { faces }
    }

    /// The face, if and only if exactly one was detected.
    ///
    /// Zero faces or several faces make the frame ambiguous; callers skip it.
    pub fn single_face(&self) -> Option<&FaceObservation> {
        match self.faces.as_slice() {
            [face] => Some(face),
            _ => None,
        }
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_gate_is_strict() {
        assert!(FaceObservation::new(0.0, 0.9).eyes_open(0.4));
        assert!(!FaceObservation::new(0.0, 0.4).eyes_open(0.4));
        assert!(!FaceObservation::new(0.0, 0.2).eyes_open(0.4));
    }

    #[test]
    fn test_single_face_gating() {
        assert!(DetectionOutcome::none().single_face().is_none());

        let one = DetectionOutcome::single(FaceObservation::new(-40.0, 0.9));
        assert_eq!(one.single_face().map(|f| f.head_yaw_deg), Some(-40.0));

        let two = DetectionOutcome::from_faces(vec![
            FaceObservation::new(-40.0, 0.9),
            FaceObservation::new(10.0, 0.9),
        ]);
        assert!(two.single_face().is_none());
        assert_eq!(two.face_count(), 2);
    }
}
