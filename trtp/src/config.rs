//! Tunable transfer parameters.
//!
//! Both roles share one [`TransportConfig`].  The defaults are what the
//! `sender` and `receiver` binaries run with; tests shrink the timeouts and
//! chunk size to exercise retransmission quickly.

use std::time::Duration;

use crate::connection::TransferError;
use crate::packet::{MAX_PAYLOAD, MAX_WINDOW};

/// Retransmission timeout used when nothing else is configured.
pub const DEFAULT_RTO: Duration = Duration::from_millis(1000);

/// Transmissions allowed per segment before the flow is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// Silence tolerated from an already-active peer.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Send window (sender) or reorder capacity (receiver), `1..=31`.
    pub window_size: u8,
    /// Fixed per-segment retransmission timeout.
    pub retransmit_timeout: Duration,
    /// Retransmissions allowed per segment; one more is fatal.
    pub max_retries: u32,
    /// Bytes read from the input per DATA packet, `1..=512`.
    pub chunk_size: usize,
    /// Receiver only: give up after this long without a datagram once the
    /// transfer has started.
    pub idle_timeout: Duration,
    /// How many times the end-of-stream sentinel is sent.
    pub stop_repeats: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            window_size: MAX_WINDOW,
            retransmit_timeout: DEFAULT_RTO,
            max_retries: DEFAULT_MAX_RETRIES,
            chunk_size: MAX_PAYLOAD,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            stop_repeats: 3,
        }
    }
}

impl TransportConfig {
    pub fn with_window_size(mut self, window_size: u8) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_retransmit_timeout(mut self, rto: Duration) -> Self {
        self.retransmit_timeout = rto;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_stop_repeats(mut self, stop_repeats: u8) -> Self {
        self.stop_repeats = stop_repeats;
        self
    }

    /// Reject values the wire format or the event loop cannot honour.
    pub fn validate(&self) -> Result<(), TransferError> {
        if !(1..=MAX_WINDOW).contains(&self.window_size) {
            return Err(TransferError::Config("window_size must be in 1..=31"));
        }
        if !(1..=MAX_PAYLOAD).contains(&self.chunk_size) {
            return Err(TransferError::Config("chunk_size must be in 1..=512"));
        }
        if self.retransmit_timeout.is_zero() {
            return Err(TransferError::Config("retransmit_timeout must be non-zero"));
        }
        if self.idle_timeout.is_zero() {
            return Err(TransferError::Config("idle_timeout must be non-zero"));
        }
        if self.stop_repeats == 0 {
            return Err(TransferError::Config("stop_repeats must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TransportConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.window_size, 31);
        assert_eq!(cfg.chunk_size, 512);
    }

    #[test]
    fn out_of_range_values_rejected() {
        assert!(TransportConfig::default().with_window_size(0).validate().is_err());
        assert!(TransportConfig::default().with_window_size(32).validate().is_err());
        assert!(TransportConfig::default().with_chunk_size(0).validate().is_err());
        assert!(TransportConfig::default().with_chunk_size(513).validate().is_err());
        assert!(TransportConfig::default()
            .with_retransmit_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn stop_sentinel_must_be_sent_at_least_once() {
        let err = TransportConfig::default()
            .with_stop_repeats(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
        assert!(TransportConfig::default().with_stop_repeats(1).validate().is_ok());
    }
}
