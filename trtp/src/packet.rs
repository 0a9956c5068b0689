//! Wire-format definitions for TRTP segments.
//!
//! Every datagram exchanged between the two endpoints is a [`Packet`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout (packed flags byte, header, CRCs).
//! - Serialising a [`Packet`] into a caller-owned byte buffer.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for empty, short, corrupt or inconsistent input.
//! - Validating every field mutation against the ranges the wire allows.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Window  |T|Ty |    Seqnum     |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Header CRC32                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Payload (Length bytes)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Payload CRC32 (if payload)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Byte 0 packs `window` in its five high bits, then the truncated flag
//! (`T`), then the two-bit type in the low bits.  The header CRC covers
//! bytes 0–7 with the truncated flag cleared, so a network element may set
//! the flag (and cut the payload) without invalidating the header.

use thiserror::Error;

/// Byte length of the fixed header, excluding its CRC.
pub const HEADER_LEN: usize = 8;

/// Byte length of each CRC32 trailer.
pub const CRC_LEN: usize = 4;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD: usize = 512;

/// Largest window the 5-bit field can advertise.
pub const MAX_WINDOW: u8 = 31;

/// Largest datagram the codec can ever produce or accept.
pub const MAX_PACKET_LEN: usize = HEADER_LEN + CRC_LEN + MAX_PAYLOAD + CRC_LEN;

// Byte offsets of each field within the serialised packet.
const OFF_FLAGS: usize = 0;
const OFF_SEQNUM: usize = 1;
const OFF_LENGTH: usize = 2;
const OFF_TIMESTAMP: usize = 4;
const OFF_HEADER_CRC: usize = 8;
const OFF_PAYLOAD: usize = 12;

// Layout of the packed flags byte.
const WINDOW_SHIFT: u8 = 3;
const TR_BIT: u8 = 0b0000_0100;
const TYPE_MASK: u8 = 0b0000_0011;

/// The three packet kinds the protocol knows about.
///
/// The wire value `0` is reserved and always rejected.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data = 1,
    Ack = 2,
    Nack = 3,
}

impl PacketType {
    fn from_wire(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Data),
            2 => Some(Self::Ack),
            3 => Some(Self::Nack),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_wire(value).ok_or(PacketError::Type)
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "DATA"),
            Self::Ack => write!(f, "ACK"),
            Self::Nack => write!(f, "NACK"),
        }
    }
}

/// Errors raised by the codec and by the field mutators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Zero-length datagram.
    #[error("empty datagram")]
    Inconsistent,
    /// Datagram too short to hold the header and its CRC.
    #[error("datagram too short to contain a header")]
    NoHeader,
    /// Header or payload CRC32 did not verify.
    #[error("CRC32 verification failed")]
    CrcMismatch,
    /// Decoded type bits are not DATA, ACK or NACK.
    #[error("invalid packet type on the wire")]
    InvalidType,
    /// Length field out of range or inconsistent with the bytes present.
    #[error("length field inconsistent with packet contents")]
    Length,
    /// Output buffer cannot hold the encoded packet.
    #[error("output buffer too small for encoded packet")]
    OutOfSpace,
    /// Window value does not fit in five bits.
    #[error("window must be at most {MAX_WINDOW}")]
    Window,
    /// Type value is not DATA, ACK or NACK.
    #[error("type must be DATA (1), ACK (2) or NACK (3)")]
    Type,
    /// Truncated flag is not a single bit.
    #[error("truncated flag must be 0 or 1")]
    Tr,
}

/// A single TRTP segment.
///
/// Fields are private so every mutation goes through a validating setter;
/// a failed setter never changes the packet.  The two CRCs are not stored:
/// they are a function of the other fields and are produced by
/// [`Packet::encode`] and checked by [`Packet::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    window: u8,
    truncated: bool,
    ptype: PacketType,
    seqnum: u8,
    length: u16,
    timestamp: u32,
    payload: Vec<u8>,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            window: 0,
            truncated: false,
            ptype: PacketType::Data,
            seqnum: 0,
            length: 0,
            timestamp: 0,
            payload: Vec::new(),
        }
    }
}

impl Packet {
    /// A DATA packet carrying `payload` under `seqnum`.
    pub fn data(seqnum: u8, payload: &[u8]) -> Result<Self, PacketError> {
        let mut pkt = Self::default();
        pkt.set_seqnum(seqnum);
        pkt.set_payload(payload)?;
        Ok(pkt)
    }

    /// A header-only ACK asking for `seqnum` next.
    pub fn ack(seqnum: u8, window: u8, timestamp: u32) -> Result<Self, PacketError> {
        Self::control(PacketType::Ack, seqnum, window, timestamp)
    }

    /// A header-only NACK requesting retransmission of `seqnum`.
    pub fn nack(seqnum: u8, window: u8, timestamp: u32) -> Result<Self, PacketError> {
        Self::control(PacketType::Nack, seqnum, window, timestamp)
    }

    fn control(
        ptype: PacketType,
        seqnum: u8,
        window: u8,
        timestamp: u32,
    ) -> Result<Self, PacketError> {
        let mut pkt = Self {
            ptype,
            ..Self::default()
        };
        pkt.set_window(window)?;
        pkt.set_seqnum(seqnum);
        pkt.set_timestamp(timestamp);
        Ok(pkt)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn window(&self) -> u8 {
        self.window
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn ptype(&self) -> PacketType {
        self.ptype
    }

    pub fn seqnum(&self) -> u8 {
        self.seqnum
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Payload bytes; empty when the packet is header-only.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// CRC32 of the header as it appears on the wire.
    pub fn header_crc(&self) -> u32 {
        header_crc(&self.header_bytes())
    }

    /// CRC32 of the payload, or `None` when no payload travels on the wire.
    pub fn payload_crc(&self) -> Option<u32> {
        self.carries_payload()
            .then(|| crc32fast::hash(&self.payload))
    }

    // -----------------------------------------------------------------------
    // Validating mutators
    // -----------------------------------------------------------------------

    pub fn set_window(&mut self, window: u8) -> Result<(), PacketError> {
        if window > MAX_WINDOW {
            return Err(PacketError::Window);
        }
        self.window = window;
        Ok(())
    }

    /// Set the type from its wire value (1 = DATA, 2 = ACK, 3 = NACK).
    pub fn set_type(&mut self, ptype: u8) -> Result<(), PacketError> {
        self.ptype = PacketType::try_from(ptype)?;
        Ok(())
    }

    /// Set the truncated flag from its wire value.
    pub fn set_tr(&mut self, tr: u8) -> Result<(), PacketError> {
        match tr {
            0 => self.truncated = false,
            1 => self.truncated = true,
            _ => return Err(PacketError::Tr),
        }
        Ok(())
    }

    pub fn set_seqnum(&mut self, seqnum: u8) {
        self.seqnum = seqnum;
    }

    /// Set the length field alone.
    ///
    /// Only meaningful for truncated packets; otherwise [`Packet::encode`]
    /// requires it to match the payload.
    pub fn set_length(&mut self, length: u16) -> Result<(), PacketError> {
        if usize::from(length) > MAX_PAYLOAD {
            return Err(PacketError::Length);
        }
        self.length = length;
        Ok(())
    }

    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    /// Replace the payload and update the length field to match.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<(), PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::Length);
        }
        self.payload = payload.to_vec();
        self.length = payload.len() as u16;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Codec
    // -----------------------------------------------------------------------

    /// `true` when payload and payload CRC travel on the wire.
    fn carries_payload(&self) -> bool {
        self.length > 0 && !self.truncated
    }

    /// Number of bytes [`Packet::encode`] will write.
    pub fn encoded_len(&self) -> usize {
        if self.carries_payload() {
            OFF_PAYLOAD + usize::from(self.length) + CRC_LEN
        } else {
            OFF_PAYLOAD
        }
    }

    fn header_bytes(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[OFF_FLAGS] = (self.window << WINDOW_SHIFT)
            | if self.truncated { TR_BIT } else { 0 }
            | self.ptype as u8;
        header[OFF_SEQNUM] = self.seqnum;
        header[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&self.length.to_be_bytes());
        header[OFF_TIMESTAMP..OFF_TIMESTAMP + 4].copy_from_slice(&self.timestamp.to_be_bytes());
        header
    }

    /// Serialise this packet into `out`, returning the number of bytes written.
    ///
    /// Returns [`Err`] if:
    /// - `out` is shorter than [`Packet::encoded_len`] ([`PacketError::OutOfSpace`]),
    /// - a non-truncated packet's payload disagrees with its length field, or
    /// - a non-truncated DATA packet has no payload ([`PacketError::Length`]).
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, PacketError> {
        if self.ptype == PacketType::Data && self.length == 0 && !self.truncated {
            return Err(PacketError::Length);
        }
        if self.carries_payload() && self.payload.len() != usize::from(self.length) {
            return Err(PacketError::Length);
        }
        let needed = self.encoded_len();
        if out.len() < needed {
            return Err(PacketError::OutOfSpace);
        }

        let header = self.header_bytes();
        out[..HEADER_LEN].copy_from_slice(&header);
        out[OFF_HEADER_CRC..OFF_PAYLOAD].copy_from_slice(&header_crc(&header).to_be_bytes());

        if self.carries_payload() {
            let end = OFF_PAYLOAD + self.payload.len();
            out[OFF_PAYLOAD..end].copy_from_slice(&self.payload);
            out[end..end + CRC_LEN].copy_from_slice(&crc32fast::hash(&self.payload).to_be_bytes());
        }
        Ok(needed)
    }

    /// Serialise into a newly allocated, exactly-sized vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = vec![0u8; self.encoded_len()];
        let n = self.encode(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Parse a [`Packet`] from one received datagram.
    ///
    /// Checks run in this order: emptiness, header presence, header CRC,
    /// type, length range, then payload presence and payload CRC.  Nothing
    /// past the header CRC is looked at until the header has verified.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.is_empty() {
            return Err(PacketError::Inconsistent);
        }
        if buf.len() < OFF_PAYLOAD {
            return Err(PacketError::NoHeader);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&buf[..HEADER_LEN]);
        if header_crc(&header) != read_u32(buf, OFF_HEADER_CRC) {
            return Err(PacketError::CrcMismatch);
        }

        let flags = header[OFF_FLAGS];
        let ptype = PacketType::from_wire(flags & TYPE_MASK).ok_or(PacketError::InvalidType)?;
        let truncated = flags & TR_BIT != 0;
        let length = u16::from_be_bytes([header[OFF_LENGTH], header[OFF_LENGTH + 1]]);
        if usize::from(length) > MAX_PAYLOAD {
            return Err(PacketError::Length);
        }

        let mut payload = Vec::new();
        if length > 0 && !truncated {
            let end = OFF_PAYLOAD + usize::from(length);
            if buf.len() != end + CRC_LEN {
                return Err(PacketError::Length);
            }
            let body = &buf[OFF_PAYLOAD..end];
            if crc32fast::hash(body) != read_u32(buf, end) {
                return Err(PacketError::CrcMismatch);
            }
            payload.extend_from_slice(body);
        } else {
            if buf.len() != OFF_PAYLOAD {
                return Err(PacketError::Length);
            }
            if length == 0 && !truncated && ptype == PacketType::Data {
                return Err(PacketError::Length);
            }
        }

        Ok(Self {
            window: flags >> WINDOW_SHIFT,
            truncated,
            ptype,
            seqnum: header[OFF_SEQNUM],
            length,
            timestamp: read_u32(buf, OFF_TIMESTAMP),
            payload,
        })
    }

    /// Seqnum of a datagram whose header verifies, even if the rest of the
    /// datagram does not decode.
    ///
    /// Used to aim a NACK at the right segment after a payload CRC or length
    /// failure.  Returns `None` when the header itself cannot be trusted.
    pub fn peek_seqnum(buf: &[u8]) -> Option<u8> {
        if buf.len() < OFF_PAYLOAD {
            return None;
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&buf[..HEADER_LEN]);
        (header_crc(&header) == read_u32(buf, OFF_HEADER_CRC)).then_some(header[OFF_SEQNUM])
    }
}

/// CRC32 over the header with the truncated flag cleared.
fn header_crc(header: &[u8; HEADER_LEN]) -> u32 {
    let mut masked = *header;
    masked[OFF_FLAGS] &= !TR_BIT;
    crc32fast::hash(&masked)
}

/// Read a big-endian u32; `off + 4` must be within `buf`.
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
