//! Non-blocking datagram endpoint.
//!
//! Thin wrapper over a UDP socket with the loss model every layer above
//! assumes: no retransmission, no ordering, sends are best-effort
//! drop-and-continue. `try_recv` returns `None` when no packet is waiting so
//! event loops can drain to empty and move on.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

pub struct Endpoint {
    socket: UdpSocket,
}

impl Endpoint {
    /// Bind a listening endpoint. Failure here is fatal to the service.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Bind an ephemeral-port endpoint for talking to another service.
    pub async fn bind_ephemeral() -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive one datagram if available. Returns `None` when the socket has
    /// nothing pending; receive errors other than would-block are logged and
    /// swallowed.
    pub fn try_recv(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        match self.socket.try_recv_from(buf) {
            Ok((len, from)) => Some((len, from)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                tracing::debug!(error = %e, "datagram receive error");
                None
            }
        }
    }

    /// Best-effort send. Transient failures (including full OS buffers) are
    /// dropped; the protocols above tolerate loss.
    pub fn try_send(&self, addr: SocketAddr, bytes: &[u8]) {
        match self.socket.try_send_to(bytes, addr) {
            Ok(sent) if sent != bytes.len() => {
                tracing::debug!(%addr, sent, expected = bytes.len(), "short datagram send");
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::trace!(%addr, "send buffer full, dropping datagram");
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "datagram send error");
            }
        }
    }
}
