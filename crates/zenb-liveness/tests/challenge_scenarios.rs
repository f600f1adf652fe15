use zenb_liveness::{
    AcceptanceRule, ChallengeEngine, ChallengeKind, EngineEffect, FaceObservation,
    LivenessConfig, ProgressIndicator, RunPhase, SegmentIndicator, StepConfig,
};

/// Applies effects the way a host would and records what reached each
/// collaborator.
#[derive(Default)]
struct Host {
    captures: Vec<usize>,
    progress_calls: Vec<u8>,
    labels: Vec<String>,
    finished: Vec<bool>,
    invalidated: Vec<usize>,
    indicator: SegmentIndicator,
}

impl Host {
    fn apply(&mut self, effects: Vec<EngineEffect>) {
        for effect in effects {
            match effect {
                EngineEffect::Capture { slot, .. } => self.captures.push(slot),
                EngineEffect::ClearCaptures => self.captures.clear(),
                EngineEffect::Progress { percent } => {
                    self.progress_calls.push(percent);
                    self.indicator.update_progress(f64::from(percent));
                }
                EngineEffect::Prompt { label, .. } => self.labels.push(label),
                EngineEffect::Invalidated { step } => self.invalidated.push(step),
                EngineEffect::Finished(outcome) => self.finished.push(outcome.success),
            }
        }
    }
}

#[test]
fn three_step_scenario() {
    let mut engine = ChallengeEngine::default();
    let mut host = Host::default();
    host.apply(engine.start());
    assert_eq!(host.labels.last().map(String::as_str), Some("👈🏻 Look Left"));

    host.apply(engine.evaluate(&FaceObservation::new(-40.0, 0.9)));
    assert_eq!(host.captures, vec![0]);
    assert_eq!(host.progress_calls, vec![33]);
    assert_eq!(host.labels.last().map(String::as_str), Some("👉🏻 Look Right"));

    host.apply(engine.evaluate(&FaceObservation::new(40.0, 0.9)));
    assert_eq!(host.captures, vec![0, 1]);
    assert_eq!(host.progress_calls, vec![33, 66]);
    assert_eq!(host.labels.last().map(String::as_str), Some("🙂 Smile :)"));

    host.apply(engine.evaluate(&FaceObservation::new(0.0, 0.9)));
    assert_eq!(host.captures, vec![0, 1, 2]);
    assert_eq!(host.progress_calls, vec![33, 66, 100]);
    assert_eq!(host.finished, vec![true]);
    assert_eq!(host.labels.last().map(String::as_str), Some("Done ✅"));
    assert!((host.indicator.percent() - 100.0).abs() < 1e-9);
}

#[test]
fn closed_eyes_never_transition() {
    let mut engine = ChallengeEngine::default();
    let mut host = Host::default();
    host.apply(engine.start());
    host.apply(engine.evaluate(&FaceObservation::new(-40.0, 0.2)));
    assert!(host.captures.is_empty());
    assert!(host.progress_calls.is_empty());
    assert_eq!(engine.state().phase(), RunPhase::Active(0));
}

#[test]
fn timeout_on_second_step_then_reset() {
    let mut engine = ChallengeEngine::default();
    let mut host = Host::default();
    host.apply(engine.start());
    host.apply(engine.evaluate(&FaceObservation::new(-40.0, 0.9)));

    for _ in 0..10 {
        host.apply(engine.tick());
    }
    assert_eq!(host.invalidated, vec![1]);
    assert_eq!(engine.state().phase(), RunPhase::Invalidated { step: 1 });
    assert!(host.finished.is_empty());
    // indicator keeps the earned progress until an explicit reset
    assert!((host.indicator.percent() - 33.0).abs() < 1e-6);

    host.apply(engine.evaluate(&FaceObservation::new(40.0, 0.9)));
    assert_eq!(host.captures, vec![0]);

    host.apply(engine.reset());
    assert_eq!(host.progress_calls.last(), Some(&0));
    assert_eq!(host.indicator.percent(), 0.0);
    assert!(host.captures.is_empty());
    assert_eq!(engine.state().current_step_index(), 0);
    assert!(engine.state().completed_steps().is_empty());

    host.apply(engine.evaluate(&FaceObservation::new(-40.0, 0.9)));
    assert_eq!(host.captures, vec![0]);
}

#[test]
fn n_step_sequences_complete_after_n_observations() {
    for n in 1..=6usize {
        let steps: Vec<StepConfig> = (0..n)
            .map(|i| StepConfig {
                kind: ChallengeKind::Custom,
                label: Some(format!("step {}", i)),
                rule: Some(AcceptanceRule::YawAbove {
                    degrees: i as f32 * 10.0,
                }),
                slot: None,
                progress_percent: None,
            })
            .collect();
        let config = LivenessConfig {
            steps,
            ..LivenessConfig::default()
        };
        let mut engine = ChallengeEngine::new(&config).unwrap();
        let mut host = Host::default();
        host.apply(engine.start());

        for i in 0..n {
            let yaw = i as f32 * 10.0 + 5.0;
            host.apply(engine.evaluate(&FaceObservation::new(yaw, 0.9)));
        }

        assert_eq!(engine.state().phase(), RunPhase::Completed, "n = {}", n);
        assert_eq!(host.finished, vec![true]);
        assert_eq!(host.captures, (0..n).collect::<Vec<_>>());
        assert_eq!(host.progress_calls.last(), Some(&100));
        assert!(host.progress_calls.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn smile_rule_can_replace_yaw_band() {
    let mut config = LivenessConfig::default();
    config.steps[2].rule = Some(AcceptanceRule::SmileAbove { probability: 0.7 });
    let mut engine = ChallengeEngine::new(&config).unwrap();
    engine.start();
    engine.evaluate(&FaceObservation::new(-40.0, 0.9));
    engine.evaluate(&FaceObservation::new(40.0, 0.9));

    // centred head without a smile no longer passes
    assert!(engine.evaluate(&FaceObservation::new(0.0, 0.9)).is_empty());
    let effects = engine.evaluate(&FaceObservation::new(0.0, 0.9).with_smile(0.95));
    assert!(effects.contains(&EngineEffect::Progress { percent: 100 }));
    assert_eq!(engine.state().phase(), RunPhase::Completed);
}
