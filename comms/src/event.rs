// Copyright 2021, The Lattice Developers
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Typed local event bus.
//!
//! One broadcast channel per event type. Publishing never blocks; subscribers that fall behind lose the
//! oldest events rather than stalling producers.

use crate::{peer_manager::NodeId, protocol::ProtocolId};
use multiaddr::Multiaddr;
use std::{fmt, sync::Arc};
use tokio::sync::broadcast;

/// Buffer size of each subscriber
pub const EVENT_BUS_BUFFER_SIZE: usize = 256;

/// The node's listen addresses changed.
#[derive(Debug, Clone)]
pub struct LocalAddressesUpdated {
    pub current: Vec<Multiaddr>,
}

/// The set of locally registered protocols changed.
#[derive(Debug, Clone)]
pub struct LocalProtocolsUpdated {
    pub added: Vec<ProtocolId>,
    pub removed: Vec<ProtocolId>,
}

/// A remote peer's advertised protocol set changed.
#[derive(Debug, Clone)]
pub struct PeerProtocolsUpdated {
    pub node_id: NodeId,
    pub added: Vec<ProtocolId>,
    pub removed: Vec<ProtocolId>,
}

/// Outcome of identifying a connection.
#[derive(Debug, Clone)]
pub enum PeerIdentificationEvent {
    Completed { node_id: NodeId },
    Failed { node_id: NodeId, error: String },
}

impl fmt::Display for PeerIdentificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PeerIdentificationEvent::*;
        match self {
            Completed { node_id } => write!(f, "PeerIdentificationCompleted({})", node_id.short_str()),
            Failed { node_id, error } => {
                write!(f, "PeerIdentificationFailed({}, {})", node_id.short_str(), error)
            },
        }
    }
}

struct EventBusInner {
    local_addresses_updated: broadcast::Sender<Arc<LocalAddressesUpdated>>,
    local_protocols_updated: broadcast::Sender<Arc<LocalProtocolsUpdated>>,
    peer_protocols_updated: broadcast::Sender<Arc<PeerProtocolsUpdated>>,
    peer_identification: broadcast::Sender<Arc<PeerIdentificationEvent>>,
}

/// Cheaply clonable handle to the event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

macro_rules! event_channel {
    ($publish:ident, $subscribe:ident, $field:ident, $ty:ty) => {
        pub fn $publish(&self, event: $ty) {
            // A send error means there are no subscribers, which is fine
            let _ = self.inner.$field.send(Arc::new(event));
        }

        pub fn $subscribe(&self) -> broadcast::Receiver<Arc<$ty>> {
            self.inner.$field.subscribe()
        }
    };
}

impl EventBus {
    pub fn new() -> Self {
        let (local_addresses_updated, _) = broadcast::channel(EVENT_BUS_BUFFER_SIZE);
        let (local_protocols_updated, _) = broadcast::channel(EVENT_BUS_BUFFER_SIZE);
        let (peer_protocols_updated, _) = broadcast::channel(EVENT_BUS_BUFFER_SIZE);
        let (peer_identification, _) = broadcast::channel(EVENT_BUS_BUFFER_SIZE);
        Self {
            inner: Arc::new(EventBusInner {
                local_addresses_updated,
                local_protocols_updated,
                peer_protocols_updated,
                peer_identification,
            }),
        }
    }

    event_channel!(
        publish_local_addresses_updated,
        subscribe_local_addresses_updated,
        local_addresses_updated,
        LocalAddressesUpdated
    );

    event_channel!(
        publish_local_protocols_updated,
        subscribe_local_protocols_updated,
        local_protocols_updated,
        LocalProtocolsUpdated
    );

    event_channel!(
        publish_peer_protocols_updated,
        subscribe_peer_protocols_updated,
        peer_protocols_updated,
        PeerProtocolsUpdated
    );

    event_channel!(
        publish_peer_identification,
        subscribe_peer_identification,
        peer_identification,
        PeerIdentificationEvent
    );
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio_macros::test_basic]
    async fn publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_local_addresses_updated();

        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/9000".parse().unwrap();
        bus.publish_local_addresses_updated(LocalAddressesUpdated {
            current: vec![addr.clone()],
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.current, vec![addr]);
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish_local_protocols_updated(LocalProtocolsUpdated {
            added: vec![],
            removed: vec![],
        });
    }
}
