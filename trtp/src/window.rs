//! Send-side sliding window.
//!
//! [`SendWindow`] tracks every DATA segment that has been transmitted but not
//! yet acknowledged.  Sequence numbers live in an 8-bit space and every
//! comparison is made relative to `base` with wrapping arithmetic, see
//! [`in_window`].
//!
//! # Protocol contract
//!
//! - At most `size` segments (further capped by the peer's advertised window)
//!   may be outstanding at once; [`SendWindow::submit`] refuses more.
//! - Acknowledgements are recorded per seqnum and `base` slides over every
//!   contiguous acknowledged seqnum starting at `base`.  A seqnum acked ahead
//!   of a gap stays in the window until the gap closes.
//! - NACKs and timeouts never move `base`; they hand the stored payload back
//!   to the caller for retransmission.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::HashMap;

use thiserror::Error;
use tokio::time::Instant;

use crate::packet::MAX_WINDOW;

/// Returns `true` when `seq` falls in `[base, base + size)` modulo 256.
#[inline]
pub fn in_window(seq: u8, base: u8, size: u8) -> bool {
    seq.wrapping_sub(base) < size
}

/// Reasons [`SendWindow::submit`] refuses a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    /// The window already holds as many segments as it may.
    #[error("send window full ({0} segments outstanding)")]
    Full(usize),
    /// The seqnum is not admissible relative to the current base.
    #[error("seqnum {seq} outside the send window starting at {base}")]
    OutOfWindow { seq: u8, base: u8 },
    /// The seqnum is already outstanding.
    #[error("seqnum {0} is already outstanding")]
    Duplicate(u8),
}

/// A single in-flight segment.
#[derive(Debug, Clone)]
pub struct Outstanding {
    /// Payload kept for retransmission.
    pub payload: Vec<u8>,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// Total number of transmissions (1 = sent once).
    pub transmissions: u32,
    /// Acknowledged, but waiting for a gap before it to close.
    pub acked: bool,
}

/// Send-side window state for one flow.
///
/// ```text
///  base                       base + size
///   │                              │
///  ─┼──────────────────────────────┼──────▶ seqnum (mod 256)
///   │ <─── outstanding / free ───▶ │
/// ```
#[derive(Debug)]
pub struct SendWindow {
    base: u8,
    size: u8,
    /// Admission cap, `1..=size`; lowered by the peer's advertised window.
    limit: u8,
    outstanding: HashMap<u8, Outstanding>,
}

impl SendWindow {
    /// Create a window whose first admissible seqnum is `base`.
    ///
    /// `size` must be in `1..=31`.
    pub fn new(base: u8, size: u8) -> Self {
        assert!(
            (1..=MAX_WINDOW).contains(&size),
            "window size must be in 1..={MAX_WINDOW}, got {size}"
        );
        Self {
            base,
            size,
            limit: size,
            outstanding: HashMap::with_capacity(usize::from(size)),
        }
    }

    /// Oldest unacknowledged seqnum.
    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    /// Current admission cap.
    pub fn limit(&self) -> u8 {
        self.limit
    }

    /// Number of segments still held, acknowledged-ahead-of-a-gap included.
    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// `true` when [`SendWindow::submit`] would accept another segment.
    pub fn can_submit(&self) -> bool {
        self.outstanding.len() < usize::from(self.limit)
    }

    pub fn contains(&self, seq: u8) -> bool {
        self.outstanding.contains_key(&seq)
    }

    /// How many times `seq` has been put on the wire, if it is outstanding.
    pub fn transmissions(&self, seq: u8) -> Option<u32> {
        self.outstanding.get(&seq).map(|e| e.transmissions)
    }

    /// Apply the window advertised by the peer.
    ///
    /// Only ever narrows admission; the window never grows past `size` and
    /// never closes completely.
    pub fn set_peer_window(&mut self, advertised: u8) {
        self.limit = advertised.clamp(1, self.size);
    }

    /// Record a first transmission of `seq` at `now`.
    pub fn submit(&mut self, seq: u8, payload: Vec<u8>, now: Instant) -> Result<(), WindowError> {
        if !self.can_submit() {
            return Err(WindowError::Full(self.outstanding.len()));
        }
        if !in_window(seq, self.base, self.size) {
            return Err(WindowError::OutOfWindow {
                seq,
                base: self.base,
            });
        }
        if self.outstanding.contains_key(&seq) {
            return Err(WindowError::Duplicate(seq));
        }
        self.outstanding.insert(
            seq,
            Outstanding {
                payload,
                sent_at: now,
                transmissions: 1,
                acked: false,
            },
        );
        Ok(())
    }

    /// Mark `seq` acknowledged and slide `base` as far as possible.
    ///
    /// Stale, duplicate and out-of-window acknowledgements are no-ops.
    /// Returns the number of segments released from the window.
    pub fn on_ack(&mut self, seq: u8) -> usize {
        if !in_window(seq, self.base, self.size) {
            return 0;
        }
        match self.outstanding.get_mut(&seq) {
            Some(entry) => entry.acked = true,
            None => return 0,
        }

        let mut released = 0;
        while self.outstanding.get(&self.base).is_some_and(|e| e.acked) {
            self.outstanding.remove(&self.base);
            self.base = self.base.wrapping_add(1);
            released += 1;
        }
        released
    }

    /// Acknowledge every seqnum before `next_expected`.
    ///
    /// This is how a receiver's cumulative ACK (which carries the next
    /// seqnum it still needs) maps onto [`SendWindow::on_ack`].  A value that
    /// would reach past the window is treated as stale and ignored.
    pub fn ack_before(&mut self, next_expected: u8) -> usize {
        let span = next_expected.wrapping_sub(self.base);
        if span == 0 || span > self.size {
            return 0;
        }
        let start = self.base;
        (0..span)
            .map(|offset| self.on_ack(start.wrapping_add(offset)))
            .sum()
    }

    /// Peer reported `seq` as corrupt or truncated.
    ///
    /// Returns the payload to resend, or `None` if `seq` is not waiting for
    /// an acknowledgement.
    pub fn on_nack(&mut self, seq: u8, now: Instant) -> Option<&[u8]> {
        self.retransmit(seq, now)
    }

    /// The retransmission timer for `seq` fired.
    pub fn on_timeout(&mut self, seq: u8, now: Instant) -> Option<&[u8]> {
        self.retransmit(seq, now)
    }

    fn retransmit(&mut self, seq: u8, now: Instant) -> Option<&[u8]> {
        let entry = self.outstanding.get_mut(&seq).filter(|e| !e.acked)?;
        entry.transmissions += 1;
        entry.sent_at = now;
        Some(&entry.payload)
    }

    /// Unacknowledged segments, oldest seqnum first.
    pub fn unacked(&self) -> impl Iterator<Item = (u8, &Outstanding)> {
        let base = self.base;
        let mut entries: Vec<_> = self
            .outstanding
            .iter()
            .filter(|(_, e)| !e.acked)
            .map(|(&seq, e)| (seq, e))
            .collect();
        entries.sort_by_key(|(seq, _)| seq.wrapping_sub(base));
        entries.into_iter()
    }
}
