//! Receive-side reordering buffer.
//!
//! [`ReceiveBuffer`] holds segments that arrived ahead of a gap and hands
//! back the in-order stream once the gap closes:
//!
//! - Segments inside `[expected_base, expected_base + size)` are stored, one
//!   slot per seqnum.  Anything else is refused with
//!   [`BufferError::OutOfWindow`]; the caller still acknowledges it.
//! - A second copy of a stored seqnum is a no-op.
//! - [`ReceiveBuffer::flush`] drains the contiguous run starting at
//!   `expected_base` and advances it.
//!
//! Slots form a ring whose head always corresponds to `expected_base`, so a
//! seqnum maps to `head + (seq - expected_base)`.  This keeps slot indices
//! distinct across the 255 → 0 wrap for every window size.

use thiserror::Error;

use crate::packet::MAX_WINDOW;
use crate::window::in_window;

/// Outcome of a successful [`ReceiveBuffer::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// The payload now occupies its slot.
    Stored,
    /// The slot was already occupied; the new copy was dropped.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("seqnum {seq} outside the receive window starting at {expected_base}")]
    OutOfWindow { seq: u8, expected_base: u8 },
}

/// Bounded reordering store for one flow.
#[derive(Debug)]
pub struct ReceiveBuffer {
    expected_base: u8,
    slots: Vec<Option<Vec<u8>>>,
    /// Slot index holding `expected_base`.
    head: usize,
    occupied: usize,
}

impl ReceiveBuffer {
    /// Create an empty buffer expecting `expected_base` first.
    ///
    /// `size` must be in `1..=31`.
    pub fn new(expected_base: u8, size: u8) -> Self {
        assert!(
            (1..=MAX_WINDOW).contains(&size),
            "receive window must be in 1..={MAX_WINDOW}, got {size}"
        );
        Self {
            expected_base,
            slots: vec![None; usize::from(size)],
            head: 0,
            occupied: 0,
        }
    }

    /// Next seqnum due for delivery.
    pub fn expected_base(&self) -> u8 {
        self.expected_base
    }

    /// Number of slots, which is also the window advertised to the sender.
    pub fn capacity(&self) -> u8 {
        self.slots.len() as u8
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// `true` when no slot is free for another out-of-order arrival.
    pub fn is_full(&self) -> bool {
        self.occupied == self.slots.len()
    }

    fn slot_index(&self, seq: u8) -> usize {
        let offset = usize::from(seq.wrapping_sub(self.expected_base));
        (self.head + offset) % self.slots.len()
    }

    /// Store `payload` under `seq` if it is admissible and new.
    pub fn accept(&mut self, seq: u8, payload: Vec<u8>) -> Result<Accepted, BufferError> {
        if !in_window(seq, self.expected_base, self.capacity()) {
            return Err(BufferError::OutOfWindow {
                seq,
                expected_base: self.expected_base,
            });
        }
        let idx = self.slot_index(seq);
        if self.slots[idx].is_some() {
            return Ok(Accepted::Duplicate);
        }
        self.slots[idx] = Some(payload);
        self.occupied += 1;
        Ok(Accepted::Stored)
    }

    /// Remove and return the contiguous run of payloads at `expected_base`.
    ///
    /// Returns an empty vector while the segment at `expected_base` is still
    /// missing.
    pub fn flush(&mut self) -> Vec<Vec<u8>> {
        let mut delivered = Vec::new();
        while let Some(payload) = self.slots[self.head].take() {
            delivered.push(payload);
            self.occupied -= 1;
            self.head = (self.head + 1) % self.slots.len();
            self.expected_base = self.expected_base.wrapping_add(1);
        }
        delivered
    }
}
