use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Loopback TCP transport.
///
/// Both sides of a link agree on a single port number; there is no
/// negotiation. Binding to port 0 picks an ephemeral port, reported by
/// [`TcpLoopback::port`] — used by tests and diagnostics.
pub struct TcpLoopback {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpLoopback {
    /// Bind and listen on a loopback port.
    pub fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            port,
            source: e,
        })?;
        let addr = listener.local_addr().map_err(|e| TransportError::Bind {
            port,
            source: e,
        })?;

        info!(%addr, "listening on loopback");

        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true).map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        Ok(LinkStream::from_tcp(stream))
    }

    /// Connect to a listening loopback port (blocking).
    pub fn connect(port: u16) -> Result<LinkStream> {
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            port,
            source: e,
        })?;
        stream.set_nodelay(true).map_err(|e| TransportError::Connect {
            port,
            source: e,
        })?;
        debug!(port, "connected to loopback");
        Ok(LinkStream::from_tcp(stream))
    }

    /// The port this transport is bound to.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The full local address this transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp-loopback"
    }
}
