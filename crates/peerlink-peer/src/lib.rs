//! Self-healing peer link management.
//!
//! This is the "just works" layer. One [`LinkManager`] owns at most one
//! active link to a peer, dials or accepts as its role dictates, retries on
//! a fixed cadence while disconnected, and hands typed frames to a
//! [`LinkDelegate`].

pub mod channel;
pub mod connector;
pub mod delegate;
pub mod discovery;
pub mod error;
pub mod manager;

pub use connector::{Dialer, LoopbackDialer};
pub use delegate::LinkDelegate;
pub use discovery::{DiscoveryEvent, DiscoveryHandle, PeerId};
pub use error::{LinkError, Result};
pub use manager::{LinkConfig, LinkManager, SendTicket};
