use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::{self, Desync, FrameResult, Marker};
use crate::{LinkConfig, VerifiedFrame};

/// Fixed-capacity byte accumulator. Never grows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Accumulator {
    len: usize,
    buffer: Box<[u8]>,
}

impl Accumulator {
    fn new(capacity: usize) -> Self {
        Self {
            len: 0,
            buffer: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append as much of `data` as fits. Returns how much was taken.
    fn extend(&mut self, data: &[u8]) -> usize {
        let amt = data.len().min(self.remaining());
        self.buffer[self.len..self.len + amt].copy_from_slice(&data[..amt]);
        self.len += amt;
        amt
    }

    /// Remove the first `n` bytes.
    fn skip(&mut self, n: usize) {
        let n = n.min(self.len);
        self.buffer.copy_within(n..self.len, 0);
        self.len -= n;
    }

    fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

/// Counters describing the inbound byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkHealth {
    /// Frames emitted.
    pub frames: u64,
    /// Frame candidates discarded, overflows included.
    pub desyncs: u64,
    /// Desyncs since the last good frame or escalation.
    pub consecutive_bad: u32,
    /// Times `consecutive_bad` reached the threshold.
    pub escalations: u64,
    /// Batches that did not fit in the accumulator.
    pub overflows: u64,
    /// Emitted frames whose payload contains marker bytes.
    pub ambiguous: u64,
    /// Bytes currently waiting in the accumulator.
    pub buffered: usize,
}

/// What one call to [Resynchronizer::feed] produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Feed {
    /// Verified frames, in arrival order.
    pub frames: Vec<VerifiedFrame>,
    /// Set if the bad packet threshold was reached during this batch.
    pub escalated: bool,
}

#[derive(Debug)]
struct State {
    buffer: Accumulator,
    health: LinkHealth,
    max_payload: usize,
    threshold: u32,
}

impl State {
    fn bad_packet(&mut self, why: Desync) -> bool {
        self.health.desyncs += 1;
        self.health.consecutive_bad += 1;
        log::warn!("inbound desync: {}", why);

        if self.health.consecutive_bad >= self.threshold {
            self.health.escalations += 1;
            self.health.consecutive_bad = 0;
            log::error!(
                "persistent desync: {} bad packets in a row, link may be unusable",
                self.threshold
            );
            true
        } else {
            false
        }
    }

    fn good_packet(&mut self, frame: &VerifiedFrame) {
        self.health.frames += 1;
        self.health.consecutive_bad = 0;
        if Marker::any_in(&frame.payload) {
            self.health.ambiguous += 1;
            log::debug!(
                "{} frame payload contains marker bytes ({} bytes)",
                frame.opcode,
                frame.payload.len()
            );
        }
    }
}

/// Turns arbitrary byte batches into verified frames.
///
/// All buffer and counter state lives behind one lock, so [Self::feed] may
/// be called from whatever context delivers bytes.
#[derive(Debug)]
pub struct Resynchronizer {
    state: Mutex<State>,
}

impl Resynchronizer {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            state: Mutex::new(State {
                buffer: Accumulator::new(config.accumulator_capacity),
                health: LinkHealth::default(),
                max_payload: config.max_payload,
                threshold: config.bad_packet_threshold,
            }),
        }
    }

    /// Append a batch of received bytes and pull out every complete frame.
    ///
    /// Corruption is handled here and never returned as an error.
    pub fn feed(&self, data: &[u8]) -> Feed {
        let mut state = self.lock();
        let mut feed = Feed::default();

        if data.len() > state.buffer.remaining() {
            // no room: drop what we have and restart from this batch
            state.health.overflows += 1;
            feed.escalated |= state.bad_packet(Desync::Overflow);
            state.buffer.clear();
            let cap = state.buffer.capacity();
            let tail = &data[data.len().saturating_sub(cap)..];
            state.buffer.extend(tail);
        } else {
            state.buffer.extend(data);
        }

        loop {
            let (skip, res) = protocol::parse(state.buffer.data(), state.max_payload);
            let (done, emitted, bad) = match res {
                FrameResult::Ok(_, opcode, payload) => (
                    false,
                    Some(VerifiedFrame {
                        opcode,
                        payload: payload.to_vec(),
                    }),
                    None,
                ),
                FrameResult::Desync(_, why) => (false, None, Some(why)),
                FrameResult::None => (true, None, None),
            };

            state.buffer.skip(skip);

            if let Some(frame) = emitted {
                log::trace!("frame {} ({} bytes)", frame.opcode, frame.payload.len());
                state.good_packet(&frame);
                feed.frames.push(frame);
            }
            if let Some(why) = bad {
                feed.escalated |= state.bad_packet(why);
            }
            if done {
                break;
            }
        }

        state.health.buffered = state.buffer.data().len();
        feed
    }

    /// A copy of the current counters.
    pub fn health(&self) -> LinkHealth {
        let state = self.lock();
        LinkHealth {
            buffered: state.buffer.data().len(),
            ..state.health
        }
    }

    /// Drop any partial data and zero the counters.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.health = LinkHealth::default();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
