//! Outbound dialing.
//!
//! The manager never opens sockets itself; it asks a [`Dialer`] for an
//! established stream. The loopback implementation is provided here; a
//! device-multiplexed transport (usbmuxd-style hub) supplies its own
//! `Dialer` and feeds attach/detach events through a
//! [`DiscoveryHandle`](crate::DiscoveryHandle).

use peerlink_transport::{LinkStream, Result, TcpLoopback, TransportError};

use crate::discovery::PeerId;

/// Establishes an outbound connection to a target peer (blocking).
///
/// Called from a short-lived worker thread, never from the manager's event
/// thread; implementations may block for as long as the underlying transport
/// does. There is no cancellation — a superseded dial's result is discarded
/// by the manager when it completes.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, target: PeerId) -> Result<LinkStream>;
}

/// Dials the fixed loopback port, ignoring device targets.
pub struct LoopbackDialer {
    port: u16,
}

impl LoopbackDialer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Dialer for LoopbackDialer {
    fn dial(&self, target: PeerId) -> Result<LinkStream> {
        match target {
            PeerId::Loopback(port) => TcpLoopback::connect(port),
            PeerId::Device(_) => Err(TransportError::Connect {
                port: self.port,
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "loopback dialer cannot reach hub devices",
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_dialer_connects() {
        let listener = TcpLoopback::bind(0).unwrap();
        let port = listener.port();

        let handle = std::thread::spawn(move || listener.accept().unwrap());

        let dialer = LoopbackDialer::new(port);
        let stream = dialer.dial(PeerId::Loopback(port)).unwrap();
        let _server = handle.join().unwrap();
        drop(stream);
    }

    #[test]
    fn loopback_dialer_rejects_device_targets() {
        let dialer = LoopbackDialer::new(1);
        let err = dialer.dial(PeerId::Device(42)).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
