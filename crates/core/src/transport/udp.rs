use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::{MediaTransport, TransportConnector};
use crate::StreamKind;
use crate::address::SignallingAddress;
use crate::error::Result;

/// Connects one UDP socket per stream to the signalling address.
///
/// The address is parsed as `host:port` text when the runtime starts. The
/// socket binds `bind_addr` (ephemeral by default) and is `connect`ed so
/// that ICMP errors from the peer surface as send failures.
#[derive(Debug, Clone)]
pub struct UdpConnector {
    bind_addr: String,
}

impl UdpConnector {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }
}

impl Default for UdpConnector {
    fn default() -> Self {
        Self::new("0.0.0.0:0")
    }
}

impl TransportConnector for UdpConnector {
    fn connect(
        &self,
        kind: StreamKind,
        address: &SignallingAddress,
    ) -> Result<Box<dyn MediaTransport>> {
        let peer = address.resolve()?;
        let transport = UdpTransport::connect(&self.bind_addr, peer)?;
        tracing::info!(
            kind = %kind,
            local = %transport.local_addr()?,
            peer = %peer,
            "UDP transport connected"
        );
        Ok(Box::new(transport))
    }
}

/// Connected UDP socket for outbound RTP.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind `bind_addr` and connect to `peer`.
    pub fn connect(bind_addr: &str, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(peer)?;
        Ok(Self { socket, peer })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl MediaTransport for UdpTransport {
    fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send(packet)
    }
}
