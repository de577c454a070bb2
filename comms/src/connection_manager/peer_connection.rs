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

use super::{
    connections::LiveConnections,
    error::PeerConnectionError,
    types::{ConnectionDirection, ConnectionId},
    ConnectionManagerEvent,
    ConnectionManagerEventSender,
};
use crate::{
    multiplexing::{IncomingSubstreams, Substream, Yamux},
    peer_manager::NodeId,
    protocol::{ProtocolEvent, ProtocolId, ProtocolNegotiation, Protocols},
};
use futures::{
    channel::{mpsc, oneshot},
    stream::Fuse,
    SinkExt,
    StreamExt,
};
use log::*;
use multiaddr::Multiaddr;
use std::{fmt, sync::Arc};
use tokio::task;

const LOG_TARGET: &str = "comms::connection_manager::peer_connection";

const PEER_REQUEST_BUFFER_SIZE: usize = 64;

/// Upgrade a multiplexed socket into a managed peer connection.
///
/// The connection is registered as live and `PeerConnected` is broadcast before the actor starts; the actor
/// deregisters it and broadcasts `PeerDisconnected` when the connection ends.
pub fn create(
    connection: Yamux,
    peer_node_id: NodeId,
    peer_addr: Multiaddr,
    local_addr: Multiaddr,
    direction: ConnectionDirection,
    protocols: Protocols<Substream>,
    connections: Arc<LiveConnections>,
    event_tx: ConnectionManagerEventSender,
) -> PeerConnection
{
    let id = ConnectionId::next();
    trace!(
        target: LOG_TARGET,
        "({}) Socket for peer '{}' upgraded to multiplexed socket",
        id,
        peer_node_id.short_str()
    );
    let (peer_tx, peer_rx) = mpsc::channel(PEER_REQUEST_BUFFER_SIZE);
    let peer_conn = PeerConnection::new(id, peer_tx, peer_node_id.clone(), peer_addr, local_addr, direction);

    connections.add(peer_conn.clone());
    // No subscribers is not an error
    let _ = event_tx.send(Arc::new(ConnectionManagerEvent::PeerConnected(peer_conn.clone())));

    let actor = PeerConnectionActor::new(id, peer_node_id, connection, peer_rx, protocols, connections, event_tx);
    task::spawn(actor.run());

    peer_conn
}

#[derive(Debug)]
pub enum PeerConnectionRequest {
    /// Open a new substream, negotiating one of the given protocols
    OpenSubstream(
        Vec<ProtocolId>,
        oneshot::Sender<Result<NegotiatedSubstream, PeerConnectionError>>,
    ),
    /// Close all substreams and the underlying transport connection
    Disconnect(oneshot::Sender<()>),
}

/// Request handle for an active peer connection
#[derive(Clone, Debug)]
pub struct PeerConnection {
    id: ConnectionId,
    peer_node_id: NodeId,
    request_tx: mpsc::Sender<PeerConnectionRequest>,
    address: Multiaddr,
    local_address: Multiaddr,
    direction: ConnectionDirection,
}

impl PeerConnection {
    pub(crate) fn new(
        id: ConnectionId,
        request_tx: mpsc::Sender<PeerConnectionRequest>,
        peer_node_id: NodeId,
        address: Multiaddr,
        local_address: Multiaddr,
        direction: ConnectionDirection,
    ) -> Self
    {
        Self {
            id,
            request_tx,
            peer_node_id,
            address,
            local_address,
            direction,
        }
    }

    /// The stable identity of this connection
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_node_id(&self) -> &NodeId {
        &self.peer_node_id
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// The multiaddr of the remote end of this connection
    pub fn address(&self) -> &Multiaddr {
        &self.address
    }

    /// The local multiaddr this connection was established on
    pub fn local_address(&self) -> &Multiaddr {
        &self.local_address
    }

    /// Open a substream, negotiating the first mutually supported protocol of those given.
    pub async fn open_substream(
        &mut self,
        protocols: &[ProtocolId],
    ) -> Result<NegotiatedSubstream, PeerConnectionError>
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(PeerConnectionRequest::OpenSubstream(protocols.to_vec(), reply_tx))
            .await?;
        reply_rx
            .await
            .map_err(|_| PeerConnectionError::InternalReplyCancelled)?
    }

    pub async fn disconnect(&mut self) -> Result<(), PeerConnectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(PeerConnectionRequest::Disconnect(reply_tx))
            .await?;
        reply_rx
            .await
            .map_err(|_| PeerConnectionError::InternalReplyCancelled)
    }
}

impl fmt::Display for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PeerConnection({}, {}, {}, {})",
            self.id,
            self.peer_node_id.short_str(),
            self.address,
            self.direction
        )
    }
}

/// Actor for an active connection to a peer. Owns the muxer; all substream opening and inbound substream
/// negotiation happens here.
struct PeerConnectionActor {
    id: ConnectionId,
    peer_node_id: NodeId,
    request_rx: Fuse<mpsc::Receiver<PeerConnectionRequest>>,
    incoming_substreams: Fuse<IncomingSubstreams>,
    control: yamux::Control,
    protocols: Protocols<Substream>,
    connections: Arc<LiveConnections>,
    event_tx: ConnectionManagerEventSender,
    shutdown: bool,
}

impl PeerConnectionActor {
    fn new(
        id: ConnectionId,
        peer_node_id: NodeId,
        connection: Yamux,
        request_rx: mpsc::Receiver<PeerConnectionRequest>,
        protocols: Protocols<Substream>,
        connections: Arc<LiveConnections>,
        event_tx: ConnectionManagerEventSender,
    ) -> Self
    {
        Self {
            id,
            peer_node_id,
            control: connection.get_yamux_control(),
            incoming_substreams: connection.incoming().fuse(),
            request_rx: request_rx.fuse(),
            protocols,
            connections,
            event_tx,
            shutdown: false,
        }
    }

    async fn run(mut self) {
        loop {
            futures::select! {
                request = self.request_rx.select_next_some() => self.handle_request(request).await,

                maybe_substream = self.incoming_substreams.next() => {
                    match maybe_substream {
                        Some(substream) => {
                            if let Err(err) = self.handle_incoming_substream(substream).await {
                                debug!(
                                    target: LOG_TARGET,
                                    "({}) Inbound substream from peer '{}' failed to open: {}",
                                    self.id,
                                    self.peer_node_id.short_str(),
                                    err
                                )
                            }
                        },
                        None => {
                            debug!(
                                target: LOG_TARGET,
                                "({}) Peer '{}' closed the connection",
                                self.id,
                                self.peer_node_id.short_str()
                            );
                            self.disconnect().await;
                        },
                    }
                }
            }

            if self.shutdown {
                break;
            }
        }
    }

    async fn handle_request(&mut self, request: PeerConnectionRequest) {
        use PeerConnectionRequest::*;
        match request {
            OpenSubstream(protocols, reply_tx) => {
                let result = self.open_negotiated_protocol_stream(&protocols).await;
                log_if_error_fmt!(
                    target: LOG_TARGET,
                    reply_tx.send(result),
                    "Reply oneshot closed when sending open substream reply: {error}",
                );
            },
            Disconnect(reply_tx) => {
                debug!(
                    target: LOG_TARGET,
                    "({}) Disconnect requested for peer '{}'",
                    self.id,
                    self.peer_node_id.short_str()
                );
                self.disconnect().await;
                let _ = reply_tx.send(());
            },
        }
    }

    async fn handle_incoming_substream(&mut self, mut substream: Substream) -> Result<(), PeerConnectionError> {
        let supported_protocols = self.protocols.protocol_ids();
        let selected_protocol = ProtocolNegotiation::new(&mut substream)
            .negotiate_protocol_inbound(&supported_protocols)
            .await?;

        self.protocols
            .notify(
                &selected_protocol,
                ProtocolEvent::NewInboundSubstream(Box::new(self.peer_node_id.clone()), substream),
            )
            .await?;

        Ok(())
    }

    async fn open_negotiated_protocol_stream(
        &mut self,
        protocols: &[ProtocolId],
    ) -> Result<NegotiatedSubstream, PeerConnectionError>
    {
        debug!(
            target: LOG_TARGET,
            "({}) Negotiating one of {} protocol(s) on a new substream for peer '{}'",
            self.id,
            protocols.len(),
            self.peer_node_id.short_str()
        );
        let mut substream = self.control.open_stream().await?;
        let selected_protocol = ProtocolNegotiation::new(&mut substream)
            .negotiate_protocol_outbound(protocols)
            .await?;
        Ok(NegotiatedSubstream::new(selected_protocol, substream))
    }

    async fn disconnect(&mut self) {
        if self.shutdown {
            return;
        }

        if let Err(err) = self.control.close().await {
            debug!(
                target: LOG_TARGET,
                "({}) Failed to politely close connection to peer '{}': {}",
                self.id,
                self.peer_node_id.short_str(),
                err
            );
        }
        trace!(target: LOG_TARGET, "({}) Connection closed", self.id);

        self.shutdown = true;
        self.connections.remove(&self.peer_node_id, self.id);
        let _ = self.event_tx.send(Arc::new(ConnectionManagerEvent::PeerDisconnected(
            Box::new(self.peer_node_id.clone()),
            self.id,
        )));
    }
}

/// A substream together with the protocol that was negotiated on it
pub struct NegotiatedSubstream {
    pub protocol: ProtocolId,
    pub stream: Substream,
}

impl NegotiatedSubstream {
    pub fn new(protocol: ProtocolId, stream: Substream) -> Self {
        Self { protocol, stream }
    }
}

impl fmt::Debug for NegotiatedSubstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NegotiatedSubstream {{ protocol: {:?}, stream: ... }}", self.protocol)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{connect_nodes, TestNode};
    use futures::{channel::mpsc, io::AsyncReadExt, AsyncWriteExt};
    use std::time::Duration;
    use tokio::time;

    #[tokio_macros::test_basic]
    async fn open_substream_negotiates_protocol() {
        let proto = ProtocolId::from_static(b"/lattice/test/1.0");

        let node_a = TestNode::new(&["/ip4/127.0.0.1/tcp/9001"]);
        let node_b = TestNode::new(&["/ip4/127.0.0.1/tcp/9002"]);

        let (notify_tx, mut notify_rx) = mpsc::channel(1);
        node_b.protocols.add_protocols(&[proto.clone()], notify_tx);

        let (mut conn_a, _conn_b) = connect_nodes(&node_a, &node_b);

        let mut negotiated = conn_a.open_substream(&[proto.clone()]).await.unwrap();
        assert_eq!(negotiated.protocol, proto);
        negotiated.stream.write_all(b"over").await.unwrap();
        negotiated.stream.flush().await.unwrap();
        negotiated.stream.close().await.unwrap();

        let notification = notify_rx.next().await.unwrap();
        assert_eq!(notification.protocol, proto);
        match notification.event {
            ProtocolEvent::NewInboundSubstream(node_id, mut substream) => {
                assert_eq!(*node_id, *node_a.identity.node_id());
                let mut buf = Vec::new();
                substream.read_to_end(&mut buf).await.unwrap();
                assert_eq!(buf, b"over");
            },
        }
    }

    #[tokio_macros::test_basic]
    async fn open_substream_fails_when_protocol_unsupported() {
        let node_a = TestNode::new(&["/ip4/127.0.0.1/tcp/9001"]);
        let node_b = TestNode::new(&["/ip4/127.0.0.1/tcp/9002"]);
        let (mut conn_a, _conn_b) = connect_nodes(&node_a, &node_b);

        let err = conn_a
            .open_substream(&[ProtocolId::from_static(b"/lattice/unknown/1.0")])
            .await
            .unwrap_err();
        match err {
            PeerConnectionError::ProtocolError(_) => {},
            err => panic!("unexpected error {:?}", err),
        }
    }

    #[tokio_macros::test_basic]
    async fn disconnect_deregisters_and_notifies() {
        let node_a = TestNode::new(&["/ip4/127.0.0.1/tcp/9001"]);
        let node_b = TestNode::new(&["/ip4/127.0.0.1/tcp/9002"]);

        let mut events = node_a.connection_events.subscribe();
        let (mut conn_a, _conn_b) = connect_nodes(&node_a, &node_b);
        assert!(node_a.connections.is_connected(node_b.identity.node_id()));

        // Consume the PeerConnected event
        let event = time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match &*event {
            ConnectionManagerEvent::PeerConnected(_) => {},
            event => panic!("unexpected event {}", event),
        }

        conn_a.disconnect().await.unwrap();

        let event = time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match &*event {
            ConnectionManagerEvent::PeerDisconnected(node_id, conn_id) => {
                assert_eq!(**node_id, *node_b.identity.node_id());
                assert_eq!(*conn_id, conn_a.id());
            },
            event => panic!("unexpected event {}", event),
        }
        assert!(!node_a.connections.is_connected(node_b.identity.node_id()));
    }
}
