use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::protocol::Opcode;
use crate::{Error, Result};

/// A frame that passed length and terminator checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerifiedFrame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Bounded FIFO between the inbound path and the scheduler.
///
/// A full queue is not a reason to drop frames: [FrameQueue::push] fails
/// instead, and the link treats that as fatal.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<VerifiedFrame>>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Add a frame at the back. Fails, without adding, when full.
    pub fn push(&self, frame: VerifiedFrame) -> Result<()> {
        let mut frames = self.lock();
        if frames.len() >= self.capacity {
            return Err(Error::QueueOverflow {
                capacity: self.capacity,
            });
        }
        frames.push_back(frame);
        Ok(())
    }

    pub fn pop(&self) -> Option<VerifiedFrame> {
        self.lock().pop_front()
    }

    /// Take every queued frame, oldest first.
    pub fn drain(&self) -> Vec<VerifiedFrame> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<VerifiedFrame>> {
        // frames are plain data, a panic elsewhere cannot leave them torn
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
