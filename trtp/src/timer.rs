//! Retransmission timer.
//!
//! Every outstanding segment carries its own deadline: the time of its most
//! recent transmission plus a fixed retransmission timeout (RTO).
//! [`RetransmitTimer`] answers the two questions the sender's event loop
//! needs: when must I wake up next, and which segments are overdue now.

use std::time::Duration;

use tokio::time::Instant;

use crate::window::SendWindow;

/// Fixed-interval, per-segment retransmission timer.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitTimer {
    rto: Duration,
}

impl RetransmitTimer {
    pub fn new(rto: Duration) -> Self {
        Self { rto }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Earliest deadline among unacknowledged segments.
    ///
    /// Returns `None` when nothing is waiting (the timer is disarmed).
    pub fn next_deadline(&self, window: &SendWindow) -> Option<Instant> {
        window
            .unacked()
            .map(|(_, entry)| entry.sent_at + self.rto)
            .min()
    }

    /// Seqnums whose deadline is at or before `now`, oldest first.
    pub fn expired(&self, window: &SendWindow, now: Instant) -> Vec<u8> {
        window
            .unacked()
            .filter(|(_, entry)| entry.sent_at + self.rto <= now)
            .map(|(seq, _)| seq)
            .collect()
    }
}
