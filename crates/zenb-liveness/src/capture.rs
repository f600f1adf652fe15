//! Proof-photo capture.
//!
//! The engine only commands "capture now into slot N". What gets stored is the
//! live camera frame at the moment of the command, not the frame that was
//! analysed, so sinks see every inbound frame through
//! [`CaptureSink::on_live_frame`].

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("no live frame available for slot {slot}")]
    NoLiveFrame { slot: usize },
    #[error("capture sink failed: {0}")]
    Sink(String),
}

/// Stores proof photos by slot.
pub trait CaptureSink: Send + Sync {
    /// Latest frame from the camera feed.
    fn on_live_frame(&self, _frame: &Frame) {}

    /// Store the current live frame at `slot`, overwriting any prior image.
    fn capture(&self, slot: usize) -> Result<(), CaptureError>;

    /// Drop every stored image.
    fn clear(&self);

    fn captured_count(&self) -> usize;
}

/// A stored proof photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub slot: usize,
    pub frame_sequence: u64,
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

#[derive(Debug, Default)]
struct CaptureState {
    live: Option<Frame>,
    slots: BTreeMap<usize, CapturedImage>,
}

/// In-memory sink that snapshots the most recent live frame.
#[derive(Debug, Default)]
pub struct LiveFrameCapture {
    state: Mutex<CaptureState>,
}

impl LiveFrameCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: usize) -> Option<CapturedImage> {
        self.state.lock().slots.get(&slot).cloned()
    }

    /// Stored images in slot order
    pub fn images(&self) -> Vec<CapturedImage> {
        self.state.lock().slots.values().cloned().collect()
    }
}

impl CaptureSink for LiveFrameCapture {
    fn on_live_frame(&self, frame: &Frame) {
        self.state.lock().live = Some(frame.clone());
    }

    fn capture(&self, slot: usize) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        let frame = state
            .live
            .as_ref()
            .ok_or(CaptureError::NoLiveFrame { slot })?;
        let image = CapturedImage {
            slot,
            frame_sequence: frame.sequence,
            timestamp_us: frame.timestamp_us,
            width: frame.width,
            height: frame.height,
            pixels: frame.pixels.clone(),
        };
        state.slots.insert(slot, image);
        Ok(())
    }

    fn clear(&self) {
        self.state.lock().slots.clear();
    }

    fn captured_count(&self) -> usize {
        self.state.lock().slots.len()
    }
}
