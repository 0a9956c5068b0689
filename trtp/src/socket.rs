//! Datagram transport abstraction.
//!
//! [`Datagram`] is the only thing the orchestrators know about the network:
//! send one datagram to the peer, receive the next one.  [`Socket`] is the
//! real implementation on top of `tokio::net::UdpSocket`;
//! [`crate::simulator::Simulator`] is the in-memory, fault-injecting one used
//! by the tests.  Both are exactly two-party: a socket answers only the peer
//! it was connected to, or the first one it heard from.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{lookup_host, UdpSocket};

/// An unreliable, message-oriented link to a single peer.
///
/// Implementations may lose, reorder and duplicate datagrams.  Both methods
/// must be cancel-safe: the orchestrators race them against timers.
#[allow(async_fn_in_trait)]
pub trait Datagram {
    /// Send `bytes` as one datagram.  Delivery is not confirmed.
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Wait for the next datagram and copy it into `buf`.
    ///
    /// Returns the datagram length; a datagram longer than `buf` is cut to
    /// `buf.len()`.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Resolve `host:port` to the first address the system resolver returns.
pub async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {host}:{port}"),
        )
    })
}

/// A UDP socket bound to one peer.
#[derive(Debug)]
pub struct Socket {
    inner: UdpSocket,
    /// Fixed at connect time, or learned from the first datagram.
    peer: Option<SocketAddr>,
    connected: bool,
}

impl Socket {
    /// Bind to `local` and wait for a peer to show up.
    ///
    /// The first datagram received fixes the peer; later datagrams from any
    /// other address are dropped.
    pub async fn bind(local: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local).await?;
        log::info!("[socket] listening on {}", inner.local_addr()?);
        Ok(Self {
            inner,
            peer: None,
            connected: false,
        })
    }

    /// Bind an ephemeral port of the same address family and connect to
    /// `peer`.
    pub async fn connect(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let inner = UdpSocket::bind(local).await?;
        inner.connect(peer).await?;
        log::info!("[socket] {} connected to {peer}", inner.local_addr()?);
        Ok(Self {
            inner,
            peer: Some(peer),
            connected: true,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Errors a connected UDP socket reports when the peer is not (yet)
/// listening.  The datagram is lost either way, which the protocol tolerates.
fn is_peer_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

impl Datagram for Socket {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let sent = match self.peer {
            Some(_) if self.connected => self.inner.send(bytes).await,
            Some(peer) => self.inner.send_to(bytes, peer).await,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no peer has contacted this socket yet",
                ))
            }
        };
        match sent {
            Ok(_) => Ok(()),
            Err(e) if is_peer_unreachable(&e) => {
                log::debug!("[socket] send: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (n, from) = match self.inner.recv_from(buf).await {
                Ok(v) => v,
                Err(e) if is_peer_unreachable(&e) => {
                    log::debug!("[socket] recv: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match self.peer {
                None => {
                    log::info!("[socket] peer is {from}");
                    self.peer = Some(from);
                    return Ok(n);
                }
                Some(peer) if peer == from => return Ok(n),
                Some(peer) => {
                    log::debug!("[socket] dropping {n} bytes from {from} (peer is {peer})");
                }
            }
        }
    }
}
