//! Camera frames and the delivery-rate throttle.

use bytes::Bytes;

/// One camera frame. Pixel data is opaque to the engine; it is only handed to
/// the detector and the capture sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl Frame {
    pub fn new(
        sequence: u64,
        timestamp_us: i64,
        width: u32,
        height: u32,
        pixels: impl Into<Bytes>,
    ) -> Self {
        Self {
            sequence,
            timestamp_us,
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Frame without pixel data, for scripted sources.
    pub fn empty(sequence: u64, timestamp_us: i64) -> Self {
        Self::new(sequence, timestamp_us, 0, 0, Bytes::new())
    }
}

/// Caps delivery at `max_fps` regardless of the sensor rate.
///
/// The camera keeps running at full speed for the preview; only frames at
/// least `1 / max_fps` after the last admitted one go on to detection.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    min_interval_us: i64,
    last_admitted_us: Option<i64>,
}

impl FrameThrottle {
    pub fn new(max_fps: u32) -> Self {
        let fps = i64::from(max_fps.max(1));
        Self {
            min_interval_us: 1_000_000 / fps,
            last_admitted_us: None,
        }
    }

    pub fn min_interval_us(&self) -> i64 {
        self.min_interval_us
    }

    /// Whether a frame stamped `timestamp_us` should be delivered.
    ///
    /// A timestamp earlier than the last admitted one means the clock
    /// restarted; the frame is admitted and becomes the new anchor.
    pub fn admit(&mut self, timestamp_us: i64) -> bool {
        let admit = match self.last_admitted_us {
            None => true,
            Some(last) if timestamp_us < last => true,
            Some(last) => timestamp_us - last >= self.min_interval_us,
        };
        if admit {
            self.last_admitted_us = Some(timestamp_us);
        }
        admit
    }

    pub fn reset(&mut self) {
        self.last_admitted_us = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_caps_rate() {
        let mut throttle = FrameThrottle::new(5);
        assert_eq!(throttle.min_interval_us(), 200_000);

        // 30 fps sensor for one second
        let admitted = (0..30)
            .map(|i| i as i64 * 33_333)
            .filter(|&ts| throttle.admit(ts))
            .count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_throttle_reanchors_on_clock_restart() {
        let mut throttle = FrameThrottle::new(5);
        assert!(throttle.admit(1_000_000));
        assert!(!throttle.admit(1_100_000));
        assert!(throttle.admit(10));
        assert!(!throttle.admit(100_000));
        assert!(throttle.admit(200_010));
    }
}
