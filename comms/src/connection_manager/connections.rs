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

use super::{peer_connection::PeerConnection, types::ConnectionId};
use crate::peer_manager::NodeId;
use std::{
    collections::HashMap,
    sync::RwLock,
};

/// Registry of the live transport connections, by remote peer. A peer is `Connected` while it has at least
/// one entry here.
#[derive(Default)]
pub struct LiveConnections {
    connections: RwLock<HashMap<NodeId, Vec<PeerConnection>>>,
}

impl LiveConnections {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn add(&self, conn: PeerConnection) {
        let mut lock = self.connections.write().unwrap();
        lock.entry(conn.peer_node_id().clone()).or_default().push(conn);
    }

    /// Remove the given connection. Returns true if this was the peer's last connection.
    pub(crate) fn remove(&self, node_id: &NodeId, conn_id: ConnectionId) -> bool {
        let mut lock = self.connections.write().unwrap();
        match lock.get_mut(node_id) {
            Some(conns) => {
                conns.retain(|c| c.id() != conn_id);
                if conns.is_empty() {
                    lock.remove(node_id);
                    true
                } else {
                    false
                }
            },
            None => true,
        }
    }

    /// Any one of the peer's live connections
    pub fn get_connection(&self, node_id: &NodeId) -> Option<PeerConnection> {
        self.connections
            .read()
            .unwrap()
            .get(node_id)
            .and_then(|conns| conns.first().cloned())
    }

    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        self.connections.read().unwrap().contains_key(node_id)
    }

    pub fn count(&self) -> usize {
        self.connections.read().unwrap().values().map(Vec::len).sum()
    }
}
