// src/evidence.rs
//
// Ring buffer of the most recent frames. When an episode fires we copy
// out whatever it holds so the alert carries the frames that led up to
// the trigger, not whatever the driver pushes afterwards.

use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

pub const DEFAULT_CAPACITY: usize = 3;

pub struct EvidenceBuffer {
    frames: Mutex<VecDeque<Arc<Frame>>>,
    capacity: usize,
}

impl EvidenceBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A capacity of zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, frame: Arc<Frame>) {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Copy of the current contents, oldest first.
    ///
    /// Frames are immutable and shared by `Arc`, so the returned vector is
    /// independent of every later `push`.
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EvidenceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64) -> Arc<Frame> {
        Arc::new(Frame::new(vec![index as u8; 3], 1, 1, index, index as f64 * 33.3))
    }

    fn indices(frames: &[Arc<Frame>]) -> Vec<u64> {
        frames.iter().map(|f| f.index).collect()
    }

    #[test]
    fn test_overflow_keeps_latest() {
        let buffer = EvidenceBuffer::with_capacity(3);
        for i in 1..=4 {
            buffer.push(frame(i));
        }
        assert_eq!(indices(&buffer.snapshot()), vec![2, 3, 4]);
    }

    #[test]
    fn test_partial_fill_returns_everything() {
        let buffer = EvidenceBuffer::with_capacity(3);
        buffer.push(frame(1));
        buffer.push(frame(2));
        assert_eq!(indices(&buffer.snapshot()), vec![1, 2]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_pushes() {
        let buffer = EvidenceBuffer::with_capacity(2);
        buffer.push(frame(1));
        buffer.push(frame(2));
        let captured = buffer.snapshot();

        buffer.push(frame(3));
        buffer.push(frame(4));

        assert_eq!(indices(&captured), vec![1, 2]);
        assert_eq!(indices(&buffer.snapshot()), vec![3, 4]);
    }

    #[test]
    fn test_last_capacity_frames_for_long_streams() {
        for capacity in 1..6 {
            let buffer = EvidenceBuffer::with_capacity(capacity);
            for i in 0..20 {
                buffer.push(frame(i));
            }
            let expected: Vec<u64> = (20 - capacity as u64..20).collect();
            assert_eq!(indices(&buffer.snapshot()), expected);
        }
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = EvidenceBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(frame(7));
        buffer.push(frame(8));
        assert_eq!(indices(&buffer.snapshot()), vec![8]);
    }

    #[test]
    fn test_concurrent_snapshots_are_never_torn() {
        let buffer = Arc::new(EvidenceBuffer::with_capacity(3));
        let writer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    buffer.push(frame(i));
                }
            })
        };

        for _ in 0..500 {
            let snap = buffer.snapshot();
            assert!(snap.len() <= 3);
            // Always consecutive frames in arrival order
            for pair in snap.windows(2) {
                assert_eq!(pair[1].index, pair[0].index + 1);
            }
        }
        writer.join().unwrap();
    }
}
