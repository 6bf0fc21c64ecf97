//! Loopback transport for peerlink connections.
//!
//! Provides the socket plumbing the connection manager builds on:
//! - [`TcpLoopback`] — bind/accept/connect on 127.0.0.1
//! - [`LinkStream`] — a connected stream with timeouts and clean shutdown
//!
//! This is the lowest layer of peerlink. A device-multiplexed transport
//! (usbmuxd-style hub) plugs in at the same seam by producing `LinkStream`s.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::LinkStream;
pub use tcp::TcpLoopback;
