//! `trtp`: a reliable, ordered file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  input ──▶ ┌──────────┐     DATA      ┌──────────┐ ──▶ sink
//!            │  Sender  │──────────────▶│ Receiver │
//!            │          │◀──────────────│          │
//!            └────┬─────┘   ACK / NACK  └────┬─────┘
//!                 │ SendWindow               │ ReceiveBuffer
//!                 │ RetransmitTimer          │
//!            ┌────▼──────────────────────────▼────┐
//!            │            Connection              │
//!            │  (packet codec + STOP sentinel)    │
//!            └────┬───────────────────────────────┘
//!                 │ raw datagrams
//!            ┌────▼──────┐          ┌───────────┐
//!            │  Socket   │   or     │ Simulator │ (tests)
//!            └───────────┘          └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      wire format (encode / decode, CRC32 checks)
//! - [`window`]      send-side sliding window with selective acknowledgement
//! - [`recv_buffer`] receive-side reordering buffer
//! - [`timer`]       per-segment retransmission deadlines
//! - [`state`]       sender lifecycle states
//! - [`connection`]  packet-level I/O and the transfer error type
//! - [`sender`]      sending orchestrator
//! - [`receiver`]    receiving orchestrator
//! - [`config`]      tunable parameters
//! - [`socket`]      datagram abstraction and its UDP implementation
//! - [`simulator`]   lossy, reordering in-memory link for testing
//! - [`cli`]         arguments of the two binaries

pub mod cli;
pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod recv_buffer;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod window;

pub use config::TransportConfig;
pub use connection::TransferError;
pub use packet::{Packet, PacketError, PacketType};
pub use receiver::{ReceiveReport, Receiver};
pub use sender::{SendReport, Sender};
pub use socket::{Datagram, Socket};
