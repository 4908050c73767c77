//! Shared pipeline state: the detection flag, the frame counter and the latest frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::frame::ProcessedFrame;

/// State shared between the producer thread and request handlers.
///
/// `latest` only ever holds a fully encoded frame; the lock is held for the
/// pointer swap and nothing else.
#[derive(Debug, Default)]
pub struct PipelineState {
    detection_enabled: AtomicBool,
    latest: Mutex<Option<Arc<ProcessedFrame>>>,
    frame_counter: AtomicU64,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detection(enabled: bool) -> Self {
        let state = Self::default();
        state.set_detection_enabled(enabled);
        state
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Acquire)
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::Release);
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter.load(Ordering::Acquire)
    }

    pub fn latest_frame(&self) -> Option<Arc<ProcessedFrame>> {
        self.lock_latest().clone()
    }

    /// Swap in a newly processed frame and bump the counter.
    pub fn publish(&self, frame: Arc<ProcessedFrame>) {
        *self.lock_latest() = Some(frame);
        self.frame_counter.fetch_add(1, Ordering::AcqRel);
    }

    fn lock_latest(&self) -> MutexGuard<'_, Option<Arc<ProcessedFrame>>> {
        // The guarded value is a single pointer, so a poisoned lock still holds
        // a whole frame.
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EncodedFormat;
    use std::time::Instant;

    fn frame(sequence: u64) -> Arc<ProcessedFrame> {
        Arc::new(ProcessedFrame::new(
            sequence,
            4,
            4,
            EncodedFormat::Png,
            Vec::new(),
            Instant::now(),
            vec![sequence as u8],
        ))
    }

    #[test]
    fn starts_empty_with_detection_off() {
        let state = PipelineState::new();
        assert!(!state.detection_enabled());
        assert!(state.latest_frame().is_none());
        assert_eq!(state.frame_counter(), 0);
    }

    #[test]
    fn publish_replaces_latest_and_counts() {
        let state = PipelineState::new();
        state.publish(frame(1));
        state.publish(frame(2));
        assert_eq!(state.frame_counter(), 2);
        assert_eq!(state.latest_frame().map(|f| f.sequence), Some(2));
    }

    #[test]
    fn flag_is_last_write_wins() {
        let state = PipelineState::with_detection(true);
        state.set_detection_enabled(false);
        state.set_detection_enabled(false);
        assert!(!state.detection_enabled());
    }
}
