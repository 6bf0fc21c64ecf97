//! Discovery events: peers attaching and detaching.
//!
//! A discovery source (a device hub, typically) posts attach/detach events
//! into the manager through a [`DiscoveryHandle`]. The static loopback mode
//! has no discovery source; the manager synthesizes a single always-attached
//! loopback target instead.

use std::fmt;

use crate::manager::Event;

/// Identity of a discovered candidate peer.
///
/// Stable for the lifetime of one physical attachment: two attach events for
/// the same physical peer carry equal identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerId {
    /// A device attached through a multiplexing hub, by hub-assigned id.
    Device(u64),
    /// The implicit loopback target on a fixed port.
    Loopback(u16),
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Device(id) => write!(f, "device-{id}"),
            PeerId::Loopback(port) => write!(f, "loopback:{port}"),
        }
    }
}

/// A peer became available or unavailable.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A candidate peer attached.
    Attached {
        peer: PeerId,
        /// Hub-reported device properties; an empty object when the hub
        /// reports none.
        properties: serde_json::Value,
    },
    /// A previously attached peer detached.
    Detached { peer: PeerId },
}

/// Posts discovery events into a manager's event queue.
///
/// Cloneable and safe to use from any thread; the manager serializes the
/// events with everything else it processes.
#[derive(Clone)]
pub struct DiscoveryHandle {
    tx: std::sync::mpsc::Sender<Event>,
}

impl DiscoveryHandle {
    pub(crate) fn new(tx: std::sync::mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Report that a peer attached.
    pub fn attached(&self, peer: PeerId, properties: serde_json::Value) {
        let _ = self
            .tx
            .send(Event::Discovery(DiscoveryEvent::Attached { peer, properties }));
    }

    /// Report that a peer detached.
    pub fn detached(&self, peer: PeerId) {
        let _ = self.tx.send(Event::Discovery(DiscoveryEvent::Detached { peer }));
    }
}

impl fmt::Debug for DiscoveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryHandle").finish()
    }
}
