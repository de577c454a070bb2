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

mod connections;
mod error;
mod peer_connection;
mod types;

pub use connections::LiveConnections;
pub use error::PeerConnectionError;
pub use peer_connection::{create, NegotiatedSubstream, PeerConnection};
pub use types::{ConnectionDirection, ConnectionId};

use crate::peer_manager::NodeId;
use multiaddr::Multiaddr;
use std::{fmt, sync::Arc};
use tokio::sync::broadcast;

pub type ConnectionManagerEventSender = broadcast::Sender<Arc<ConnectionManagerEvent>>;
pub type ConnectionManagerEventReceiver = broadcast::Receiver<Arc<ConnectionManagerEvent>>;

const EVENT_CHANNEL_SIZE: usize = 32;

/// Create the channel on which connection lifecycle events are broadcast.
pub fn event_channel() -> ConnectionManagerEventSender {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
    tx
}

/// Connection lifecycle notifications.
#[derive(Debug)]
pub enum ConnectionManagerEvent {
    PeerConnected(PeerConnection),
    PeerDisconnected(Box<NodeId>, ConnectionId),
    Listening(Multiaddr),
    ListenClosed(Multiaddr),
}

impl fmt::Display for ConnectionManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConnectionManagerEvent::*;
        match self {
            PeerConnected(conn) => write!(f, "PeerConnected({})", conn),
            PeerDisconnected(node_id, conn_id) => {
                write!(f, "PeerDisconnected({}, {})", node_id.short_str(), conn_id)
            },
            Listening(addr) => write!(f, "Listening({})", addr),
            ListenClosed(addr) => write!(f, "ListenClosed({})", addr),
        }
    }
}
