//! Progress indicator contract and a segmented-arc model.
//!
//! The engine only ever talks to [`ProgressIndicator`]. [`SegmentIndicator`]
//! keeps the arithmetic of a ring split into discrete segments so a host can
//! render it without re-deriving which segments are full.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Circular progress indicator driven by the engine.
pub trait ProgressIndicator: Send {
    /// Clear all visual progress. Idempotent.
    fn reset(&mut self);

    /// Move to `percent` (0 - 100). Zero is a full reset; values above 100
    /// are clamped.
    fn update_progress(&mut self, percent: f64);
}

impl<T: ProgressIndicator> ProgressIndicator for Arc<Mutex<T>> {
    fn reset(&mut self) {
        self.lock().reset();
    }

    fn update_progress(&mut self, percent: f64) {
        self.lock().update_progress(percent);
    }
}

/// Segment layout of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentSettings {
    pub segments_count: usize,
    /// Animation time for a partial segment; completing a segment takes half
    pub animation_duration_ms: u64,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            segments_count: 99,
            animation_duration_ms: 500,
        }
    }
}

/// Render instructions for one update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IndicatorChange {
    Reset,
    Advance(SegmentUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentUpdate {
    /// Segments `0..filled_through` are drawn full without animation
    pub filled_through: usize,
    /// Previously active segment, animated to full before the new one starts
    pub completed_segment: Option<usize>,
    pub active_segment: usize,
    /// Stroke fraction of the active segment before and after the animation
    pub from: f64,
    pub to: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SegmentIndicator {
    settings: SegmentSettings,
    levels: Vec<f64>,
    active_segment: usize,
    value: f64,
    last_change: Option<IndicatorChange>,
}

impl SegmentIndicator {
    pub fn new() -> Self {
        Self::with_settings(SegmentSettings::default())
    }

    pub fn with_settings(settings: SegmentSettings) -> Self {
        let count = settings.segments_count.max(1);
        Self {
            settings: SegmentSettings {
                segments_count: count,
                ..settings
            },
            levels: vec![0.0; count],
            active_segment: 0,
            value: 0.0,
            last_change: None,
        }
    }

    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }

    /// Stroke fraction of every segment, in ring order.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn active_segment(&self) -> usize {
        self.active_segment
    }

    pub fn last_change(&self) -> Option<&IndicatorChange> {
        self.last_change.as_ref()
    }

    /// Overall fill as a percentage of the ring.
    pub fn percent(&self) -> f64 {
        let total: f64 = self.levels.iter().sum();
        total / self.settings.segments_count as f64 * 100.0
    }

    fn clear(&mut self) {
        self.levels.iter_mut().for_each(|l| *l = 0.0);
        self.active_segment = 0;
        self.value = 0.0;
        self.last_change = Some(IndicatorChange::Reset);
    }
}

impl ProgressIndicator for SegmentIndicator {
    fn reset(&mut self) {
        self.clear();
    }

    fn update_progress(&mut self, percent: f64) {
        if percent <= 0.0 || percent.is_nan() {
            self.clear();
            return;
        }

        let count = self.settings.segments_count;
        let fraction = (percent / 100.0).min(1.0);
        let scaled = fraction * count as f64;
        let active = (scaled.floor() as usize).min(count);

        for level in self.levels.iter_mut().take(active) {
            *level = 1.0;
        }

        let full_ms = self.settings.animation_duration_ms;
        let update = if active >= count {
            // Whole ring: finish whatever was in flight and close the last segment.
            let last = count - 1;
            let completed = (self.active_segment != last).then_some(self.active_segment);
            let from = if completed.is_some() { 0.0 } else { self.value };
            self.active_segment = last;
            self.value = 1.0;
            SegmentUpdate {
                filled_through: count,
                completed_segment: completed,
                active_segment: last,
                from,
                to: 1.0,
                duration_ms: full_ms,
            }
        } else {
            let target = scaled - active as f64;
            let (completed, from) = if self.active_segment != active {
                (Some(self.active_segment), 0.0)
            } else {
                (None, self.value)
            };
            if let Some(done) = completed {
                self.levels[done] = 1.0;
            }
            self.levels[active] = target;
            self.active_segment = active;
            self.value = target;
            SegmentUpdate {
                filled_through: active,
                completed_segment: completed,
                active_segment: active,
                from,
                to: target,
                duration_ms: full_ms,
            }
        };

        self.last_change = Some(IndicatorChange::Advance(update));
    }
}

impl Default for SegmentIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(ind: &SegmentIndicator) -> SegmentUpdate {
        match ind.last_change() {
            Some(IndicatorChange::Advance(u)) => u.clone(),
            other => panic!("expected advance, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_is_reset() {
        let mut a = SegmentIndicator::new();
        a.update_progress(66.0);
        a.update_progress(0.0);

        let mut b = SegmentIndicator::new();
        b.update_progress(66.0);
        b.reset();

        assert_eq!(a.levels(), b.levels());
        assert_eq!(a.last_change(), Some(&IndicatorChange::Reset));
        assert_eq!(a.percent(), 0.0);
    }

    #[test]
    fn test_reset_idempotent() {
        let mut ind = SegmentIndicator::new();
        ind.reset();
        let once = ind.levels().to_vec();
        ind.reset();
        assert_eq!(ind.levels(), once.as_slice());
    }

    #[test]
    fn test_first_step_fills_passed_segments() {
        let mut ind = SegmentIndicator::new();
        ind.update_progress(33.0);
        let u = advance(&ind);
        // 0.33 * 99 = 32.67
        assert_eq!(u.active_segment, 32);
        assert_eq!(u.filled_through, 32);
        assert_eq!(u.completed_segment, Some(0));
        assert!((u.to - 0.67).abs() < 1e-6);
        assert!(ind.levels()[..32].iter().all(|&l| l == 1.0));
        assert!((ind.percent() - 33.0).abs() < 1e-6);
    }

    #[test]
    fn test_same_segment_animates_from_current() {
        let settings = SegmentSettings {
            segments_count: 4,
            animation_duration_ms: 100,
        };
        let mut ind = SegmentIndicator::with_settings(settings);
        ind.update_progress(30.0);
        ind.update_progress(40.0);
        let u = advance(&ind);
        assert_eq!(u.active_segment, 1);
        assert_eq!(u.completed_segment, None);
        assert!((u.from - 0.2).abs() < 1e-9);
        assert!((u.to - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_over_hundred_is_clamped() {
        let mut ind = SegmentIndicator::new();
        ind.update_progress(66.0);
        ind.update_progress(250.0);
        let u = advance(&ind);
        assert_eq!(u.filled_through, 99);
        assert_eq!(u.active_segment, 98);
        assert!(ind.levels().iter().all(|&l| l == 1.0));
        assert!((ind.percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_shared_indicator_forwards() {
        let shared = Arc::new(Mutex::new(SegmentIndicator::new()));
        let mut handle: Box<dyn ProgressIndicator> = Box::new(shared.clone());
        handle.update_progress(100.0);
        assert!((shared.lock().percent() - 100.0).abs() < 1e-9);
        handle.reset();
        assert_eq!(shared.lock().percent(), 0.0);
    }
}
