//! Packet-level I/O shared by both ends of a transfer.
//!
//! A [`Connection`] wraps a [`Datagram`] link and turns it into a stream of
//! [`Inbound`] events: decoded packets, the end-of-stream sentinel, or
//! datagrams that failed to decode (with the seqnum salvaged from the
//! header when the header itself verified).  It also owns the encode buffer
//! and the clock used for packet timestamps.
//!
//! Neither orchestrator touches raw bytes; they only see [`Packet`]s.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::packet::{Packet, PacketError, MAX_PACKET_LEN};
use crate::socket::Datagram;
use crate::window::WindowError;

/// Datagram the sender emits after the last acknowledgement arrives.
///
/// Four bytes can never decode as a packet (a header needs twelve), so the
/// sentinel is unambiguous.
pub const STOP_SENTINEL: &[u8] = b"STOP";

/// Everything that can end a transfer early.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An outbound packet could not be built or encoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("send window error: {0}")]
    Window(#[from] WindowError),

    /// A segment was retransmitted more times than allowed.
    #[error("seqnum {seq} not acknowledged after {attempts} transmissions")]
    MaxRetriesExceeded { seq: u8, attempts: u32 },

    /// The peer went silent mid-transfer.
    #[error("no datagram from peer for {0:?}")]
    IdleTimeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

/// One event read off the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The peer finished sending.
    Stop,
    Packet(Packet),
    /// The datagram did not decode.
    ///
    /// `seqnum` is set when the header CRC verified, so the failure lies in
    /// the type, length or payload and the seqnum can be trusted.
    Invalid {
        error: PacketError,
        seqnum: Option<u8>,
    },
}

/// Encode/decode layer over a [`Datagram`] link.
#[derive(Debug)]
pub struct Connection<D> {
    link: D,
    /// One byte larger than any valid packet so oversized datagrams are
    /// detected instead of silently cut to a valid length.
    rx_buf: Vec<u8>,
    tx_buf: Vec<u8>,
    started: Instant,
}

impl<D: Datagram> Connection<D> {
    pub fn new(link: D) -> Self {
        Self {
            link,
            rx_buf: vec![0; MAX_PACKET_LEN + 1],
            tx_buf: vec![0; MAX_PACKET_LEN],
            started: Instant::now(),
        }
    }

    pub fn link(&self) -> &D {
        &self.link
    }

    pub fn into_link(self) -> D {
        self.link
    }

    /// Milliseconds since this connection was created, wrapped to 32 bits.
    pub fn timestamp(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Encode `pkt` and send it as one datagram.
    pub async fn send_packet(&mut self, pkt: &Packet) -> Result<(), TransferError> {
        let n = pkt.encode(&mut self.tx_buf)?;
        self.link.send(&self.tx_buf[..n]).await?;
        Ok(())
    }

    pub async fn send_stop(&mut self) -> Result<(), TransferError> {
        self.link.send(STOP_SENTINEL).await?;
        Ok(())
    }

    /// Wait for the next datagram and classify it.
    ///
    /// Cancel-safe: nothing is consumed until the underlying receive
    /// completes.
    pub async fn recv(&mut self) -> Result<Inbound, TransferError> {
        let n = self.link.recv(&mut self.rx_buf).await?;
        let bytes = &self.rx_buf[..n];
        if bytes == STOP_SENTINEL {
            return Ok(Inbound::Stop);
        }
        Ok(match Packet::decode(bytes) {
            Ok(pkt) => Inbound::Packet(pkt),
            Err(error) => Inbound::Invalid {
                error,
                seqnum: Packet::peek_seqnum(bytes),
            },
        })
    }
}
