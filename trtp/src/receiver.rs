//! Receiving side of a transfer.
//!
//! [`Receiver`] answers every datagram it gets:
//!
//! - DATA that decodes is offered to the [`ReceiveBuffer`], whatever is now
//!   contiguous is written to the sink, and a cumulative ACK carrying the
//!   next seqnum still needed goes back.  Duplicates and out-of-window
//!   segments are re-acknowledged the same way.
//! - Truncated DATA and datagrams that fail to decode get a NACK.
//! - The end-of-stream sentinel ends the loop without a reply.
//!
//! Every ACK and NACK advertises the buffer's capacity as the window and
//! echoes the timestamp of the most recent DATA packet.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::TransportConfig;
use crate::connection::{Connection, Inbound, TransferError};
use crate::packet::{Packet, PacketError, PacketType};
use crate::recv_buffer::{Accepted, BufferError, ReceiveBuffer};
use crate::socket::Datagram;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    pub bytes_delivered: u64,
    pub packets_delivered: u64,
    pub acks_sent: u64,
    pub nacks_sent: u64,
    /// DATA segments that were already buffered.
    pub duplicates: u64,
    /// DATA segments outside the receive window, usually already delivered.
    pub out_of_window: u64,
    /// Datagrams that failed to decode, plus truncated DATA.
    pub corrupt: u64,
}

/// Reliable receiver over a [`Datagram`] link.
pub struct Receiver<D> {
    conn: Connection<D>,
    buffer: ReceiveBuffer,
    config: TransportConfig,
    report: ReceiveReport,
    /// Timestamp of the last DATA packet seen, echoed in replies.
    last_timestamp: u32,
    /// Set by the first datagram; the idle timeout only applies after it.
    active: bool,
}

impl<D: Datagram> Receiver<D> {
    pub fn new(link: D, config: TransportConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            conn: Connection::new(link),
            buffer: ReceiveBuffer::new(0, config.window_size),
            config,
            report: ReceiveReport::default(),
            last_timestamp: 0,
            active: false,
        })
    }

    pub fn link(&self) -> &D {
        self.conn.link()
    }

    pub fn report(&self) -> ReceiveReport {
        self.report
    }

    /// Next seqnum the receiver is waiting for.
    pub fn expected_base(&self) -> u8 {
        self.buffer.expected_base()
    }

    /// Write the in-order stream to `sink` until the sender signals the end.
    ///
    /// Waits indefinitely for the first datagram; after that, silence longer
    /// than the configured idle timeout is an error.
    pub async fn run<W: AsyncWrite + Unpin>(
        &mut self,
        sink: &mut W,
    ) -> Result<ReceiveReport, TransferError> {
        loop {
            let inbound = if self.active {
                let idle = self.config.idle_timeout;
                match timeout(idle, self.conn.recv()).await {
                    Ok(inbound) => inbound?,
                    Err(_) => {
                        log::warn!("[receiver] peer silent for {idle:?}");
                        return Err(TransferError::IdleTimeout(idle));
                    }
                }
            } else {
                self.conn.recv().await?
            };
            self.active = true;

            match inbound {
                Inbound::Stop => {
                    log::debug!("[receiver] ← STOP");
                    break;
                }
                Inbound::Invalid { error, seqnum } => self.on_invalid(error, seqnum).await?,
                Inbound::Packet(pkt) if pkt.ptype() != PacketType::Data => {
                    log::debug!("[receiver] ignoring {} seq={}", pkt.ptype(), pkt.seqnum());
                }
                Inbound::Packet(pkt) if pkt.truncated() => {
                    self.last_timestamp = pkt.timestamp();
                    self.report.corrupt += 1;
                    log::debug!("[receiver] ← truncated DATA seq={}", pkt.seqnum());
                    self.reply(PacketType::Nack, pkt.seqnum()).await?;
                }
                Inbound::Packet(pkt) => self.on_data(pkt, sink).await?,
            }
        }

        sink.flush().await?;
        log::info!(
            "[receiver] done: {} bytes in {} packets",
            self.report.bytes_delivered,
            self.report.packets_delivered
        );
        Ok(self.report)
    }

    async fn on_data<W: AsyncWrite + Unpin>(
        &mut self,
        pkt: Packet,
        sink: &mut W,
    ) -> Result<(), TransferError> {
        let seq = pkt.seqnum();
        self.last_timestamp = pkt.timestamp();

        match self.buffer.accept(seq, pkt.into_payload()) {
            Ok(Accepted::Stored) => log::debug!("[receiver] ← DATA seq={seq}"),
            Ok(Accepted::Duplicate) => {
                self.report.duplicates += 1;
                log::debug!("[receiver] ← duplicate DATA seq={seq}");
            }
            Err(e @ BufferError::OutOfWindow { .. }) => {
                self.report.out_of_window += 1;
                log::debug!("[receiver] {e}");
            }
        }

        let ready = self.buffer.flush();
        if !ready.is_empty() {
            for payload in &ready {
                sink.write_all(payload).await?;
                self.report.bytes_delivered += payload.len() as u64;
            }
            sink.flush().await?;
            self.report.packets_delivered += ready.len() as u64;
        }

        self.reply(PacketType::Ack, self.buffer.expected_base()).await
    }

    async fn on_invalid(
        &mut self,
        error: PacketError,
        seqnum: Option<u8>,
    ) -> Result<(), TransferError> {
        self.report.corrupt += 1;
        log::debug!("[receiver] invalid datagram ({error}), seq={seqnum:?}");
        self.reply(PacketType::Nack, seqnum.unwrap_or(0)).await
    }

    async fn reply(&mut self, ptype: PacketType, seq: u8) -> Result<(), TransferError> {
        let window = self.buffer.capacity();
        let pkt = match ptype {
            PacketType::Nack => {
                self.report.nacks_sent += 1;
                Packet::nack(seq, window, self.last_timestamp)?
            }
            _ => {
                self.report.acks_sent += 1;
                Packet::ack(seq, window, self.last_timestamp)?
            }
        };
        log::debug!("[receiver] → {ptype} seq={seq} win={window}");
        self.conn.send_packet(&pkt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::connection::STOP_SENTINEL;
    use crate::packet::{CRC_LEN, HEADER_LEN, MAX_PACKET_LEN};
    use crate::simulator::{Simulator, SimulatorConfig};

    fn setup(window: u8) -> (Receiver<Simulator>, Connection<Simulator>) {
        let (a, b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        let config = TransportConfig::default()
            .with_window_size(window)
            .with_idle_timeout(Duration::from_secs(1));
        (Receiver::new(a, config).unwrap(), Connection::new(b))
    }

    fn data(seq: u8, payload: &[u8], timestamp: u32) -> Packet {
        let mut pkt = Packet::data(seq, payload).unwrap();
        pkt.set_timestamp(timestamp);
        pkt
    }

    /// Receiver plus a bare link for sending hand-damaged datagrams.
    fn setup_raw(window: u8) -> (Receiver<Simulator>, Simulator) {
        let (a, b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
        let config = TransportConfig::default().with_window_size(window);
        (Receiver::new(a, config).unwrap(), b)
    }

    async fn raw_reply(peer: &mut Simulator) -> Packet {
        let mut buf = [0u8; MAX_PACKET_LEN];
        let n = peer.recv(&mut buf).await.unwrap();
        Packet::decode(&buf[..n]).unwrap()
    }

    async fn reply(peer: &mut Connection<Simulator>) -> Packet {
        match peer.recv().await.unwrap() {
            Inbound::Packet(pkt) => pkt,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reorders_and_acks_cumulatively() {
        let (mut receiver, mut peer) = setup(4);
        let mut sink = Vec::new();

        let (result, ()) = tokio::join!(receiver.run(&mut sink), async {
            peer.send_packet(&data(1, b"world", 11)).await.unwrap();
            let ack = reply(&mut peer).await;
            assert_eq!(ack.ptype(), PacketType::Ack);
            assert_eq!((ack.seqnum(), ack.window(), ack.timestamp()), (0, 4, 11));

            peer.send_packet(&data(0, b"hello ", 12)).await.unwrap();
            let ack = reply(&mut peer).await;
            assert_eq!((ack.seqnum(), ack.timestamp()), (2, 12));

            peer.send_packet(&data(0, b"hello ", 13)).await.unwrap();
            assert_eq!(reply(&mut peer).await.seqnum(), 2);

            peer.send_stop().await.unwrap();
        });

        let report = result.unwrap();
        assert_eq!(sink, b"hello world");
        assert_eq!(report.packets_delivered, 2);
        assert_eq!(report.acks_sent, 3);
        assert_eq!(report.out_of_window, 1);
    }

    #[tokio::test]
    async fn corrupt_and_truncated_data_are_nacked() {
        let (mut receiver, mut peer) = setup(4);
        let mut sink = Vec::new();

        let (result, ()) = tokio::join!(receiver.run(&mut sink), async {
            let mut truncated = data(0, b"abc", 5);
            truncated.set_tr(1).unwrap();
            peer.send_packet(&truncated).await.unwrap();
            let nack = reply(&mut peer).await;
            assert_eq!((nack.ptype(), nack.seqnum()), (PacketType::Nack, 0));

            peer.send_packet(&data(3, b"ok", 6)).await.unwrap();
            assert_eq!(reply(&mut peer).await.ptype(), PacketType::Ack);

            peer.send_stop().await.unwrap();
        });

        let report = result.unwrap();
        assert!(sink.is_empty());
        assert_eq!(report.nacks_sent, 1);
        assert_eq!(report.corrupt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out_after_first_datagram() {
        let (mut receiver, mut peer) = setup(4);
        let mut sink = Vec::new();

        let (result, ()) = tokio::join!(receiver.run(&mut sink), async {
            peer.send_packet(&data(0, b"x", 0)).await.unwrap();
            reply(&mut peer).await;
        });

        assert!(matches!(result, Err(TransferError::IdleTimeout(_))));
        assert_eq!(sink, b"x");
    }

    #[tokio::test]
    async fn payload_corruption_is_nacked_by_seqnum() {
        let (mut receiver, mut peer) = setup_raw(31);
        let mut sink = Vec::new();

        let (result, ()) = tokio::join!(receiver.run(&mut sink), async {
            let mut bytes = data(9, b"abcd", 21).to_bytes().unwrap();
            bytes[HEADER_LEN + CRC_LEN + 1] ^= 0x01;
            peer.send(&bytes).await.unwrap();

            let nack = raw_reply(&mut peer).await;
            assert_eq!(nack.ptype(), PacketType::Nack);
            assert_eq!((nack.seqnum(), nack.window()), (9, 31));

            peer.send(STOP_SENTINEL).await.unwrap();
        });

        let report = result.unwrap();
        assert!(sink.is_empty());
        assert_eq!((report.corrupt, report.nacks_sent, report.acks_sent), (1, 1, 0));
    }

    #[tokio::test]
    async fn header_corruption_is_nacked_with_seqnum_zero() {
        let (mut receiver, mut peer) = setup_raw(4);
        let mut sink = Vec::new();

        let (result, ()) = tokio::join!(receiver.run(&mut sink), async {
            let mut bytes = data(9, b"abcd", 21).to_bytes().unwrap();
            bytes[1] ^= 0x01;
            peer.send(&bytes).await.unwrap();

            let nack = raw_reply(&mut peer).await;
            assert_eq!(nack.ptype(), PacketType::Nack);
            assert_eq!((nack.seqnum(), nack.window()), (0, 4));

            peer.send(STOP_SENTINEL).await.unwrap();
        });

        let report = result.unwrap();
        assert!(sink.is_empty());
        assert_eq!((report.corrupt, report.nacks_sent), (1, 1));
    }
}
