//! Sending side of a transfer.
//!
//! [`Sender`] reads its input in chunks, wraps each chunk in a DATA packet
//! under the next seqnum and keeps up to a window's worth of them in flight.
//! One `select!` loop reacts to three event sources:
//!
//! ```text
//!            ┌──────────── inbound ACK / NACK ◀──── link
//!            │
//!  input ──▶ Sender ──▶ SendWindow ──▶ DATA ──▶ link
//!            │              ▲
//!            └── timer ─────┘ (retransmit overdue seqnums)
//! ```
//!
//! Once the input is exhausted and every segment is acknowledged, the
//! end-of-stream sentinel is sent and [`Sender::run`] returns a
//! [`SendReport`].

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{sleep_until, Instant};

use crate::config::TransportConfig;
use crate::connection::{Connection, Inbound, TransferError};
use crate::packet::{Packet, PacketError, PacketType};
use crate::socket::Datagram;
use crate::state::SenderState;
use crate::timer::RetransmitTimer;
use crate::window::SendWindow;

/// Stand-in deadline for a disarmed timer branch, which is never polled.
const FAR_FUTURE: Duration = Duration::from_secs(86_400);

/// What a finished transfer cost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// DATA packets put on the link, retransmissions included.
    pub packets_sent: u64,
    /// Payload bytes put on the link, retransmissions included.
    pub bytes_sent: u64,
    pub retransmissions: u64,
    /// Retransmissions per seqnum.  Seqnums are reused every 256 packets,
    /// so long transfers fold several segments into one entry.
    pub retransmissions_by_seq: BTreeMap<u8, u32>,
    pub nacks_received: u64,
}

#[derive(Debug, Clone, Copy)]
enum Resend {
    Nack,
    Timeout,
}

/// Reliable sender over a [`Datagram`] link.
pub struct Sender<D> {
    conn: Connection<D>,
    window: SendWindow,
    timer: RetransmitTimer,
    config: TransportConfig,
    state: SenderState,
    next_seq: u8,
    report: SendReport,
}

impl<D: Datagram> Sender<D> {
    pub fn new(link: D, config: TransportConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            conn: Connection::new(link),
            window: SendWindow::new(0, config.window_size),
            timer: RetransmitTimer::new(config.retransmit_timeout),
            config,
            state: SenderState::Idle,
            next_seq: 0,
            report: SendReport::default(),
        })
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn link(&self) -> &D {
        self.conn.link()
    }

    pub fn report(&self) -> &SendReport {
        &self.report
    }

    /// Send everything `input` yields, then the end-of-stream sentinel.
    ///
    /// Fails if a segment exceeds its retransmission budget or the link
    /// reports an I/O error.  Inbound datagrams that do not decode are never
    /// fatal.
    pub async fn run<R: AsyncRead + Unpin>(
        &mut self,
        mut input: R,
    ) -> Result<SendReport, TransferError> {
        let mut chunk = vec![0u8; self.config.chunk_size];
        let mut input_done = false;

        while !(self.state.is_terminal() && self.window.is_empty()) {
            let deadline = self.timer.next_deadline(&self.window);
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE);
            let want_input = !input_done && self.state.accepts_input() && self.window.can_submit();

            tokio::select! {
                biased;

                inbound = self.conn.recv() => {
                    self.on_inbound(inbound?).await?;
                }

                _ = sleep_until(wake_at), if deadline.is_some() => {
                    self.on_timer().await?;
                }

                read = input.read(&mut chunk), if want_input => {
                    match read? {
                        0 => {
                            log::debug!("[sender] input exhausted");
                            input_done = true;
                        }
                        n => self.send_new(chunk[..n].to_vec()).await?,
                    }
                }
            }

            self.update_state(input_done);
        }

        for _ in 0..self.config.stop_repeats {
            self.conn.send_stop().await?;
        }
        log::info!(
            "[sender] done: {} packets, {} retransmissions",
            self.report.packets_sent,
            self.report.retransmissions
        );
        Ok(self.report.clone())
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    async fn on_inbound(&mut self, inbound: Inbound) -> Result<(), TransferError> {
        match inbound {
            Inbound::Packet(pkt) => match pkt.ptype() {
                PacketType::Ack => {
                    self.window.set_peer_window(pkt.window());
                    let released = self.window.ack_before(pkt.seqnum());
                    log::debug!(
                        "[sender] ← ACK next={} win={} (released {released}, base={})",
                        pkt.seqnum(),
                        pkt.window(),
                        self.window.base()
                    );
                }
                PacketType::Nack => {
                    self.report.nacks_received += 1;
                    self.window.set_peer_window(pkt.window());
                    log::debug!("[sender] ← NACK seq={}", pkt.seqnum());
                    self.resend(pkt.seqnum(), Resend::Nack).await?;
                }
                PacketType::Data => {
                    log::debug!("[sender] ignoring DATA seq={}", pkt.seqnum());
                }
            },
            Inbound::Invalid {
                error: PacketError::CrcMismatch | PacketError::InvalidType | PacketError::Length,
                seqnum: Some(seq),
            } => {
                // The header verified, so the peer was talking about `seq`.
                log::debug!("[sender] ← damaged reply for seq={seq}");
                self.resend(seq, Resend::Nack).await?;
            }
            Inbound::Invalid { error, .. } => {
                log::debug!("[sender] ignoring invalid datagram: {error}");
            }
            Inbound::Stop => log::debug!("[sender] ignoring STOP from receiver"),
        }
        Ok(())
    }

    async fn on_timer(&mut self) -> Result<(), TransferError> {
        let overdue = self.timer.expired(&self.window, Instant::now());
        if !overdue.is_empty() {
            log::debug!("[sender] timeout: retransmitting {overdue:?}");
        }
        for seq in overdue {
            self.resend(seq, Resend::Timeout).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transmission
    // -----------------------------------------------------------------------

    async fn send_new(&mut self, payload: Vec<u8>) -> Result<(), TransferError> {
        let seq = self.next_seq;
        let pkt = self.data_packet(seq, &payload)?;
        self.window.submit(seq, payload, Instant::now())?;
        self.conn.send_packet(&pkt).await?;
        self.next_seq = seq.wrapping_add(1);
        self.count_sent(&pkt);
        log::debug!(
            "[sender] → DATA seq={seq} len={} in_flight={}",
            pkt.length(),
            self.window.in_flight()
        );
        Ok(())
    }

    /// Retransmit `seq` if it is still waiting for an acknowledgement.
    async fn resend(&mut self, seq: u8, why: Resend) -> Result<(), TransferError> {
        let now = Instant::now();
        let payload = match why {
            Resend::Nack => self.window.on_nack(seq, now),
            Resend::Timeout => self.window.on_timeout(seq, now),
        };
        let Some(payload) = payload.map(<[u8]>::to_vec) else {
            return Ok(());
        };

        let transmissions = self.window.transmissions(seq).unwrap_or(1);
        if transmissions - 1 > self.config.max_retries {
            log::warn!("[sender] seq={seq} exceeded {} retries", self.config.max_retries);
            return Err(TransferError::MaxRetriesExceeded {
                seq,
                attempts: transmissions - 1,
            });
        }

        let pkt = self.data_packet(seq, &payload)?;
        self.conn.send_packet(&pkt).await?;
        self.count_sent(&pkt);
        self.report.retransmissions += 1;
        *self.report.retransmissions_by_seq.entry(seq).or_default() += 1;
        log::debug!("[sender] → DATA seq={seq} (retransmission {why:?})");
        Ok(())
    }

    fn data_packet(&self, seq: u8, payload: &[u8]) -> Result<Packet, PacketError> {
        let mut pkt = Packet::data(seq, payload)?;
        pkt.set_window(self.config.window_size)?;
        pkt.set_timestamp(self.conn.timestamp());
        Ok(pkt)
    }

    fn count_sent(&mut self, pkt: &Packet) {
        self.report.packets_sent += 1;
        self.report.bytes_sent += u64::from(pkt.length());
    }

    fn update_state(&mut self, input_done: bool) {
        // Stay idle until the first segment goes out.
        if self.state == SenderState::Idle && self.report.packets_sent == 0 && !input_done {
            return;
        }
        let next = self.state.after(input_done, self.window.can_submit());
        if next != self.state {
            log::debug!("[sender] {} → {next}", self.state);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MAX_PACKET_LEN;
    use crate::simulator::{Simulator, SimulatorConfig};
    use tokio::time::timeout;

    const RTO: Duration = Duration::from_millis(100);

    fn config() -> TransportConfig {
        TransportConfig::default()
            .with_retransmit_timeout(RTO)
            .with_chunk_size(1)
    }

    async fn next_packet(peer: &mut Connection<Simulator>) -> Packet {
        match peer.recv().await.unwrap() {
            Inbound::Packet(pkt) => pkt,
            other => panic!("expected a packet, got {other:?}"),
        }
    }

    async fn raw_packet(peer: &mut Simulator) -> Packet {
        let mut buf = [0u8; MAX_PACKET_LEN];
        let n = peer.recv(&mut buf).await.unwrap();
        Packet::decode(&buf[..n]).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (a, _b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        assert!(matches!(
            Sender::new(a, config().with_window_size(0)),
            Err(TransferError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn window_limits_segments_in_flight() {
        let (a, b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        let mut sender = Sender::new(a, config().with_window_size(2)).unwrap();
        let mut peer = Connection::new(b);

        let (report, ()) = tokio::join!(sender.run(&b"abc"[..]), async {
            assert_eq!(next_packet(&mut peer).await.payload(), b"a");
            assert_eq!(next_packet(&mut peer).await.payload(), b"b");
            // Window of two is full: nothing new until an ACK arrives.
            assert!(timeout(RTO / 2, peer.recv()).await.is_err());

            peer.send_packet(&Packet::ack(2, 2, 0).unwrap()).await.unwrap();
            let third = next_packet(&mut peer).await;
            assert_eq!((third.seqnum(), third.payload()), (2, &b"c"[..]));

            peer.send_packet(&Packet::ack(3, 2, 0).unwrap()).await.unwrap();
            for _ in 0..3 {
                assert_eq!(peer.recv().await.unwrap(), Inbound::Stop);
            }
        });

        let report = report.unwrap();
        assert_eq!(report.packets_sent, 3);
        assert_eq!(report.retransmissions, 0);
        assert_eq!(sender.state(), SenderState::Draining);
    }

    #[tokio::test(start_paused = true)]
    async fn nack_triggers_immediate_retransmission() {
        let (a, b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        let mut sender = Sender::new(a, config()).unwrap();
        let mut peer = Connection::new(b);

        let (report, ()) = tokio::join!(sender.run(&b"z"[..]), async {
            let first = next_packet(&mut peer).await;
            peer.send_packet(&Packet::nack(first.seqnum(), 31, 0).unwrap())
                .await
                .unwrap();
            // Well before the RTO.
            let again = timeout(RTO / 2, next_packet(&mut peer)).await.unwrap();
            assert_eq!(again.payload(), b"z");
            peer.send_packet(&Packet::ack(1, 31, 0).unwrap()).await.unwrap();
        });

        let report = report.unwrap();
        assert_eq!(report.nacks_received, 1);
        assert_eq!(report.retransmissions_by_seq.get(&0), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn damaged_reply_with_verified_header_acts_as_nack() {
        let (a, mut peer) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        let mut sender = Sender::new(a, config()).unwrap();

        let (report, ()) = tokio::join!(sender.run(&b"q"[..]), async {
            assert_eq!(raw_packet(&mut peer).await.seqnum(), 0);

            // Header CRC verifies, but a trailing byte breaks the length.
            let mut damaged = Packet::ack(0, 31, 0).unwrap().to_bytes().unwrap();
            damaged.push(0xAA);
            peer.send(&damaged).await.unwrap();

            let again = timeout(RTO / 2, raw_packet(&mut peer)).await.unwrap();
            assert_eq!((again.seqnum(), again.payload()), (0, &b"q"[..]));

            let ack = Packet::ack(1, 31, 0).unwrap().to_bytes().unwrap();
            peer.send(&ack).await.unwrap();
        });

        let report = report.unwrap();
        assert_eq!(report.retransmissions_by_seq.get(&0), Some(&1));
        assert_eq!(report.nacks_received, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_exhausts_retries() {
        let (a, _b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        let mut sender = Sender::new(a, config().with_max_retries(2)).unwrap();

        let err = sender.run(&b"x"[..]).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::MaxRetriesExceeded { seq: 0, attempts: 3 }
        ));
        assert_eq!(sender.report().retransmissions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_only_sends_stop() {
        let (a, b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        let mut sender = Sender::new(a, config()).unwrap();

        let report = sender.run(&b""[..]).await.unwrap();
        assert_eq!(report.packets_sent, 0);
        assert_eq!(sender.link().stats().sent, 3);

        let mut peer = Connection::new(b);
        assert_eq!(peer.recv().await.unwrap(), Inbound::Stop);
    }
}
