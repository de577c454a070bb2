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

//! In-memory node harness used throughout this crate's tests.

use crate::{
    connection_manager::{
        self,
        create,
        ConnectionDirection,
        ConnectionManagerEventSender,
        LiveConnections,
        PeerConnection,
    },
    event::EventBus,
    memsocket::MemorySocket,
    multiplexing::{Substream, Yamux},
    peer_manager::{NodeId, NodeIdentity, PeerManager},
    protocol::Protocols,
};
use futures::channel::mpsc;
use multiaddr::Multiaddr;
use rand::rngs::OsRng;
use std::{convert::TryFrom, sync::Arc};

/// A deterministic node id for tests that do not need a real key
pub fn node_id(seed: u8) -> NodeId {
    NodeId::try_from(&[seed; 13][..]).unwrap()
}

pub fn node_identity(listen_addrs: &[&str]) -> Arc<NodeIdentity> {
    Arc::new(NodeIdentity::random(
        &mut OsRng,
        listen_addrs.iter().map(|a| a.parse().unwrap()).collect(),
    ))
}

/// Everything a node needs short of an actual network: identity, peer store, protocol registry, event bus
/// and live-connection tracking.
pub struct TestNode {
    pub identity: Arc<NodeIdentity>,
    pub peer_manager: Arc<PeerManager>,
    pub event_bus: EventBus,
    pub protocols: Protocols<Substream>,
    pub connections: Arc<LiveConnections>,
    pub connection_events: ConnectionManagerEventSender,
}

impl TestNode {
    pub fn new(listen_addrs: &[&str]) -> Self {
        Self::with_identity(node_identity(listen_addrs))
    }

    pub fn with_identity(identity: Arc<NodeIdentity>) -> Self {
        let event_bus = EventBus::new();
        Self {
            identity,
            peer_manager: Arc::new(PeerManager::new()),
            protocols: Protocols::new(event_bus.clone()),
            event_bus,
            connections: Arc::new(LiveConnections::new()),
            connection_events: connection_manager::event_channel(),
        }
    }

    fn first_listen_addr(&self) -> Multiaddr {
        self.identity
            .listen_addresses()
            .first()
            .cloned()
            .expect("test node has no listen address")
    }
}

/// Connect two test nodes over an in-memory socket. The first node is the dialer.
///
/// Each side's connection is registered in its `LiveConnections` and announced on its connection event
/// channel, exactly as a real transport would.
pub fn connect_nodes(a: &TestNode, b: &TestNode) -> (PeerConnection, PeerConnection) {
    let (socket_a, socket_b) = MemorySocket::new_pair();

    let yamux_a = Yamux::upgrade_connection(socket_a, ConnectionDirection::Outbound).unwrap();
    let yamux_b = Yamux::upgrade_connection(socket_b, ConnectionDirection::Inbound).unwrap();

    let conn_a = create(
        yamux_a,
        b.identity.node_id().clone(),
        b.first_listen_addr(),
        a.first_listen_addr(),
        ConnectionDirection::Outbound,
        a.protocols.clone(),
        Arc::clone(&a.connections),
        a.connection_events.clone(),
    );
    let conn_b = create(
        yamux_b,
        a.identity.node_id().clone(),
        a.first_listen_addr(),
        b.first_listen_addr(),
        ConnectionDirection::Inbound,
        b.protocols.clone(),
        Arc::clone(&b.connections),
        b.connection_events.clone(),
    );

    (conn_a, conn_b)
}

/// A `PeerConnection` handle that is not backed by an actor. Only its addressing/direction accessors may be
/// used; requests sent on it fail.
pub fn fake_connection(peer: NodeId, local: &str, remote: &str, direction: ConnectionDirection) -> PeerConnection {
    let (tx, _rx) = mpsc::channel(1);
    PeerConnection::new(
        crate::connection_manager::ConnectionId::next(),
        tx,
        peer,
        remote.parse().unwrap(),
        local.parse().unwrap(),
        direction,
    )
}
