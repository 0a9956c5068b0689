//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To
//! exercise the recovery paths without a real network, [`Simulator::pair`]
//! returns two connected [`Datagram`] endpoints backed by channels.  Faults
//! are applied on the sending side of each direction:
//!
//! | Fault        | Effect                                                  |
//! |--------------|---------------------------------------------------------|
//! | `drop_nth`   | The n-th datagram sent (1-based) is dropped.            |
//! | `loss_rate`  | Any datagram is dropped with this probability.          |
//! | `corrupt_rate` | One byte of the datagram is flipped.                  |
//! | `duplicate_rate` | The datagram is delivered twice.                    |
//! | `reorder_rate` | The datagram is held back until after the next one.   |
//!
//! Every direction has its own seeded RNG so a failing run is reproducible.

use std::io;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::Datagram;

/// Fault model for one direction of a simulated link.
///
/// Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub corrupt_rate: f64,
    /// 1-based indices of datagrams to drop unconditionally.
    pub drop_nth: Vec<usize>,
    pub seed: u64,
}

impl SimulatorConfig {
    /// A perfect link that drops exactly the listed datagrams.
    pub fn dropping(drop_nth: &[usize]) -> Self {
        Self {
            drop_nth: drop_nth.to_vec(),
            ..Self::default()
        }
    }
}

/// Counters for what the simulator did to outgoing datagrams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Datagrams handed to `send`.
    pub sent: usize,
    /// Datagrams placed on the wire, duplicates included.
    pub delivered: usize,
    pub dropped: usize,
    pub duplicated: usize,
    pub reordered: usize,
    pub corrupted: usize,
}

/// One endpoint of a simulated link.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    rng: StdRng,
    /// Datagram waiting to be delivered after the next one.
    held: Option<Vec<u8>>,
    stats: SimStats,
}

impl Simulator {
    /// Two connected endpoints.
    ///
    /// `a_to_b` governs datagrams sent by the first endpoint, `b_to_a` those
    /// sent by the second.
    pub fn pair(a_to_b: SimulatorConfig, b_to_a: SimulatorConfig) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();
        (Self::new(a_to_b, tx_ab, rx_ba), Self::new(b_to_a, tx_ba, rx_ab))
    }

    fn new(
        config: SimulatorConfig,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            tx,
            rx,
            held: None,
            stats: SimStats::default(),
        }
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random_bool(p.min(1.0))
    }

    fn deliver(&mut self, datagram: Vec<u8>) {
        // A peer that has gone away just never hears the datagram.
        if self.tx.send(datagram).is_ok() {
            self.stats.delivered += 1;
        }
    }
}

impl Datagram for Simulator {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stats.sent += 1;
        let nth = self.stats.sent;

        if self.config.drop_nth.contains(&nth) || self.roll(self.config.loss_rate) {
            log::debug!("[sim] dropping datagram #{nth} ({} bytes)", bytes.len());
            self.stats.dropped += 1;
            return Ok(());
        }

        let mut datagram = bytes.to_vec();
        if !datagram.is_empty() && self.roll(self.config.corrupt_rate) {
            let idx = self.rng.random_range(0..datagram.len());
            datagram[idx] ^= self.rng.random_range(1..=u8::MAX);
            log::debug!("[sim] corrupting byte {idx} of datagram #{nth}");
            self.stats.corrupted += 1;
        }

        // A held datagram is delivered once, never duplicated.
        if self.held.is_none() && self.roll(self.config.reorder_rate) {
            log::debug!("[sim] holding back datagram #{nth}");
            self.stats.reordered += 1;
            self.held = Some(datagram);
            return Ok(());
        }

        if self.roll(self.config.duplicate_rate) {
            log::debug!("[sim] duplicating datagram #{nth}");
            self.stats.duplicated += 1;
            self.deliver(datagram.clone());
        }
        self.deliver(datagram);
        if let Some(late) = self.held.take() {
            self.deliver(late);
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let datagram = self.rx.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "simulated peer closed")
        })?;
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}
