//! Bounded outbound audio queue.
//!
//! Every frame is tagged with the response that produced it, so a cancel can
//! remove exactly that response's audio and nothing else.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::audio::FRAME_BYTES;

/// One paced 20 ms frame waiting for the telephony writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub response_id: String,
    pub payload: [u8; FRAME_BYTES],
}

/// Queue shared between the call task and its writer.
pub type SharedOutboundQueue = Arc<Mutex<OutboundQueue>>;

#[derive(Debug)]
pub struct OutboundQueue {
    call_id: String,
    capacity: usize,
    frames: VecDeque<OutboundFrame>,
    discarded: HashSet<String>,
    overflow_drops: u64,
}

impl OutboundQueue {
    pub fn new(call_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            call_id: call_id.into(),
            capacity: capacity.max(1),
            frames: VecDeque::with_capacity(capacity.max(1)),
            discarded: HashSet::new(),
            overflow_drops: 0,
        }
    }

    pub fn shared(call_id: impl Into<String>, capacity: usize) -> SharedOutboundQueue {
        Arc::new(Mutex::new(Self::new(call_id, capacity)))
    }

    /// Enqueue a frame. Returns false when the frame was not queued.
    ///
    /// Frames of a discarded response are refused. When full, the oldest frame
    /// of the same response is dropped to make room; if the queue holds only
    /// other responses' audio the new frame is dropped instead.
    pub fn push(&mut self, frame: OutboundFrame) -> bool {
        if self.discarded.contains(&frame.response_id) {
            return false;
        }

        if self.frames.len() >= self.capacity {
            self.overflow_drops += 1;
            let same = self
                .frames
                .iter()
                .position(|f| f.response_id == frame.response_id);
            match same {
                Some(index) => {
                    self.frames.remove(index);
                    warn!(
                        call_id = %self.call_id,
                        response_id = %frame.response_id,
                        overflow_drops = self.overflow_drops,
                        "OUTBOUND_OVERFLOW: dropped oldest queued frame"
                    );
                }
                None => {
                    warn!(
                        call_id = %self.call_id,
                        response_id = %frame.response_id,
                        overflow_drops = self.overflow_drops,
                        "OUTBOUND_OVERFLOW: dropped incoming frame"
                    );
                    return false;
                }
            }
        }

        self.frames.push_back(frame);
        true
    }

    pub fn pop(&mut self) -> Option<OutboundFrame> {
        self.frames.pop_front()
    }

    /// Remove every queued frame of `response_id` and refuse its future frames.
    pub fn discard_response(&mut self, response_id: &str) -> usize {
        self.discarded.insert(response_id.to_string());
        let before = self.frames.len();
        self.frames.retain(|f| f.response_id != response_id);
        before - self.frames.len()
    }

    pub fn has_response(&self, response_id: &str) -> bool {
        self.frames.iter().any(|f| f.response_id == response_id)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(response_id: &str, marker: u8) -> OutboundFrame {
        OutboundFrame {
            response_id: response_id.to_string(),
            payload: [marker; FRAME_BYTES],
        }
    }

    #[test]
    fn test_discard_isolates_responses() {
        let mut queue = OutboundQueue::new("call", 64);
        for i in 0..5 {
            queue.push(frame("r1", i));
            queue.push(frame("r2", 100 + i));
        }

        assert_eq!(queue.discard_response("r1"), 5);
        // late r1 audio is refused
        assert!(!queue.push(frame("r1", 9)));
        assert!(queue.push(frame("r2", 105)));

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert!(drained.iter().all(|f| f.response_id == "r2"));
        let markers: Vec<u8> = drained.iter().map(|f| f.payload[0]).collect();
        assert_eq!(markers, vec![100, 101, 102, 103, 104, 105]);
    }

    #[test]
    fn test_overflow_drops_oldest_of_same_response() {
        let mut queue = OutboundQueue::new("call", 3);
        queue.push(frame("r1", 1));
        queue.push(frame("r1", 2));
        queue.push(frame("r1", 3));
        assert!(queue.push(frame("r1", 4)));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.overflow_drops(), 1);
        assert_eq!(queue.pop().unwrap().payload[0], 2);
    }

    #[test]
    fn test_overflow_with_foreign_audio_drops_new_frame() {
        let mut queue = OutboundQueue::new("call", 2);
        queue.push(frame("r1", 1));
        queue.push(frame("r1", 2));
        assert!(!queue.push(frame("r2", 3)));
        assert_eq!(queue.len(), 2);
        assert!(!queue.has_response("r2"));
    }
}
