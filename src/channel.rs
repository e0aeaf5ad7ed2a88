//! Async UDP datagram channel.
//!
//! [`Channel`] is a thin wrapper around `tokio::net::UdpSocket` that moves
//! opaque byte blobs with no delivery, ordering, or duplication guarantee —
//! exactly the contract the protocol is built to survive.  Decoding (and the
//! silent-discard policy for corrupt datagrams) happens in the session layer,
//! not here; this module owns only byte I/O.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Largest datagram we will read (theoretical UDP limit; actual packets are
/// bounded by the session's segment size).
const MAX_DATAGRAM: usize = 65_535;

/// Errors that can arise from channel operations.
#[derive(Debug)]
pub struct ChannelError(pub std::io::Error);

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel I/O error: {}", self.0)
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self(e)
    }
}

/// An async, datagram-oriented channel endpoint.
///
/// All methods are `&self` so the channel can be shared across tasks.
#[derive(Debug)]
pub struct Channel {
    /// Address this endpoint is bound to (resolved after the OS assigns an
    /// ephemeral port).
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Channel {
    /// Bind a new endpoint to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` (or `127.0.0.1:0`) lets the OS choose a port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, ChannelError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// The resolved local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one opaque blob to `peer` as a single datagram.
    pub async fn send(&self, peer: SocketAddr, bytes: &[u8]) -> Result<(), ChannelError> {
        self.inner.send_to(bytes, peer).await?;
        Ok(())
    }

    /// Wait for the next datagram; yields `(sender_address, bytes)`.
    pub async fn recv(&self) -> Result<(SocketAddr, Vec<u8>), ChannelError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((addr, buf))
    }
}
