//! Live stream fan-out.
//!
//! The producer pushes each published frame into a bounded queue per
//! subscriber with `try_send`. A subscriber whose queue is full or whose
//! receiver is gone is dropped on the spot; nobody else waits for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::SubscriberDisconnected;
use crate::frame::ProcessedFrame;

/// Multipart boundary token.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the stream response.
pub fn multipart_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// Frame one encoded image as a multipart chunk.
pub fn encode_chunk(frame: &ProcessedFrame) -> Vec<u8> {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: {}\r\n\r\n",
        frame.format.content_type()
    );
    let mut chunk = Vec::with_capacity(header.len() + frame.bytes().len() + 4);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(frame.bytes());
    chunk.extend_from_slice(b"\r\n\r\n");
    chunk
}

struct Slot {
    id: u64,
    tx: SyncSender<Arc<ProcessedFrame>>,
}

/// Fan-out point between the producer and every open viewer.
pub struct StreamHub {
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
    queue_depth: usize,
    dropped: AtomicU64,
}

impl StreamHub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a viewer. It sees frames published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_slots().push(Slot { id, tx });
        log::info!("stream subscriber {} connected", id);
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut slots = self.lock_slots();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        if slots.len() != before {
            log::info!("stream subscriber {} disconnected", id);
        }
    }

    /// Offer `frame` to every subscriber without blocking.
    pub fn publish(&self, frame: &Arc<ProcessedFrame>) {
        let mut slots = self.lock_slots();
        slots.retain(|slot| match slot.tx.try_send(Arc::clone(frame)) {
            Ok(()) => true,
            Err(err) => {
                let reason = match err {
                    TrySendError::Full(_) => SubscriberDisconnected::Stalled(slot.id),
                    TrySendError::Disconnected(_) => SubscriberDisconnected::HungUp(slot.id),
                };
                log::info!("dropping stream subscriber: {}", reason);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_slots().len()
    }

    /// Subscribers dropped for stalling or hanging up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Receiving side of one viewer.
///
/// Ends once the hub drops this subscriber.
pub struct Subscription {
    id: u64,
    rx: Receiver<Arc<ProcessedFrame>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next frame. `Ok(None)` on timeout, `Err` once dropped.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Arc<ProcessedFrame>>, SubscriberDisconnected> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SubscriberDisconnected::HungUp(self.id)),
        }
    }

    /// Multipart chunks for every frame this subscriber receives.
    pub fn into_chunks(self) -> impl Iterator<Item = Vec<u8>> {
        self.map(|frame| encode_chunk(&frame))
    }
}

impl Iterator for Subscription {
    type Item = Arc<ProcessedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
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
            2,
            2,
            EncodedFormat::Png,
            Vec::new(),
            Instant::now(),
            vec![0xAB, sequence as u8],
        ))
    }

    #[test]
    fn chunk_matches_multipart_layout() {
        let chunk = encode_chunk(&frame(3));
        let mut expected = b"--frame\r\nContent-Type: image/png\r\n\r\n".to_vec();
        expected.extend_from_slice(&[0xAB, 3]);
        expected.extend_from_slice(b"\r\n\r\n");
        assert_eq!(chunk, expected);
        assert_eq!(multipart_content_type(), "multipart/x-mixed-replace; boundary=frame");
    }

    #[test]
    fn every_subscriber_sees_every_frame_in_order() {
        let hub = StreamHub::new(4);
        let a = hub.subscribe();
        let b = hub.subscribe();
        for seq in 1..=3 {
            hub.publish(&frame(seq));
        }
        let got_a: Vec<u64> = (0..3).filter_map(|_| a.rx.try_recv().ok()).map(|f| f.sequence).collect();
        let got_b: Vec<u64> = (0..3).filter_map(|_| b.rx.try_recv().ok()).map(|f| f.sequence).collect();
        assert_eq!(got_a, vec![1, 2, 3]);
        assert_eq!(got_b, vec![1, 2, 3]);
    }

    #[test]
    fn hung_up_subscriber_is_dropped_without_affecting_others() {
        let hub = StreamHub::new(4);
        let keep = hub.subscribe();
        let gone = hub.subscribe();
        drop(gone);
        hub.publish(&frame(1));
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.dropped(), 1);
        assert_eq!(keep.rx.try_recv().map(|f| f.sequence).ok(), Some(1));
    }

    #[test]
    fn stalled_subscriber_is_dropped() {
        let hub = StreamHub::new(1);
        let slow = hub.subscribe();
        hub.publish(&frame(1));
        hub.publish(&frame(2));
        assert_eq!(hub.subscriber_count(), 0);
        // It still drains what it was given, then ends.
        let rest: Vec<u64> = slow.map(|f| f.sequence).collect();
        assert_eq!(rest, vec![1]);
    }

    #[test]
    fn unsubscribe_removes_the_slot() {
        let hub = StreamHub::default();
        let sub = hub.subscribe();
        hub.unsubscribe(sub.id());
        assert_eq!(hub.subscriber_count(), 0);
        assert!(sub.recv_timeout(Duration::from_millis(10)).is_err());
    }
}
