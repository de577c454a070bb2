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
    config::IdentifyConfig,
    delimited::{read_message, write_message},
    error::IdentifyError,
    messages::{consume_delta, consume_message, populate_message},
    obsaddr::ObservedAddrManager,
    peer_handler::PeerIdentifyHandler,
    protocol_supports_peer_records,
    IDENTIFY_DELTA_PROTOCOL,
    IDENTIFY_PROTOCOL,
    IDENTIFY_PROTOCOL_LEGACY,
    IDENTIFY_PUSH_PROTOCOL,
    IDENTIFY_PUSH_PROTOCOL_LEGACY,
    MAX_IDENTIFY_MSG_SIZE,
};
use futures::AsyncWriteExt;
use crate::{
    connection_manager::{
        ConnectionId,
        ConnectionManagerEvent,
        ConnectionManagerEventReceiver,
        LiveConnections,
        PeerConnection,
        PeerConnectionError,
    },
    event::{EventBus, LocalAddressesUpdated, LocalProtocolsUpdated, PeerIdentificationEvent},
    multiplexing::Substream,
    peer_manager::{NodeId, NodeIdentity, PeerManager, CONNECTED_ADDR_TTL, PERMANENT_ADDR_TTL, RECENTLY_CONNECTED_ADDR_TTL},
    proto::identify as proto,
    protocol::{ProtocolEvent, ProtocolId, ProtocolNotification, Protocols},
};
use futures::{
    channel::{mpsc, oneshot},
    pin_mut,
    stream::Fuse,
    FutureExt,
    SinkExt,
    StreamExt,
};
use lattice_shutdown::{OneshotSignal, OneshotTrigger, Shutdown, ShutdownSignal};
use log::*;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};
use tokio::{sync::broadcast, task, task::JoinHandle};

const LOG_TARGET: &str = "comms::identify::service";

const NOTIFICATION_BUFFER_SIZE: usize = 32;
const REQUEST_BUFFER_SIZE: usize = 32;

/// Shared state every part of the identify subsystem works against.
pub(super) struct IdentifyContext {
    pub config: IdentifyConfig,
    pub node_identity: Arc<NodeIdentity>,
    pub peer_manager: Arc<PeerManager>,
    pub protocols: Protocols<Substream>,
    pub connections: Arc<LiveConnections>,
    pub event_bus: EventBus,
    pub observed_addrs: ObservedAddrManager,
    /// Serialises identify's address promotion with disconnect-driven demotion for a peer
    pub addr_lock: Mutex<()>,
}

/// Service requests handled by the event loop
#[derive(Debug)]
enum IdentifyRequest {
    /// Broadcast a push request to every per-peer handler
    PushAll,
}

pub(super) struct PeerHandlerRequest {
    node_id: NodeId,
    use_peer_records: bool,
    reply: oneshot::Sender<Option<PeerIdentifyHandler>>,
}

/// The identify service: identifies every new connection, answers inbound identify streams and keeps
/// connected peers up to date through per-peer push/delta handlers.
///
/// This handle is cheap to clone. The service runs until [close](IdentifyService::close) is called.
#[derive(Clone)]
pub struct IdentifyService {
    context: Arc<IdentifyContext>,
    conns: Arc<RwLock<HashMap<ConnectionId, OneshotSignal<()>>>>,
    request_tx: mpsc::Sender<IdentifyRequest>,
    handler_request_tx: mpsc::Sender<PeerHandlerRequest>,
    shutdown: Arc<Mutex<Shutdown>>,
    shutdown_signal: ShutdownSignal,
    join_handles: Arc<Mutex<Option<Vec<JoinHandle<()>>>>>,
}

impl IdentifyService {
    /// Start the identify service: registers the identify protocols on the given registry, spawns the
    /// observed-address worker and the event loop, and begins identifying connections as they are
    /// announced on `connection_events`.
    pub fn spawn(
        config: IdentifyConfig,
        node_identity: Arc<NodeIdentity>,
        peer_manager: Arc<PeerManager>,
        protocols: Protocols<Substream>,
        connections: Arc<LiveConnections>,
        event_bus: EventBus,
        connection_events: ConnectionManagerEventReceiver,
    ) -> Self
    {
        let shutdown = Shutdown::new();
        let shutdown_signal = shutdown.to_signal();

        let (observed_addrs, obsaddr_handle) = ObservedAddrManager::spawn(
            Arc::clone(&node_identity),
            event_bus.subscribe_local_addresses_updated(),
            shutdown.to_signal(),
        );

        let address_events = event_bus.subscribe_local_addresses_updated();
        let protocol_events = event_bus.subscribe_local_protocols_updated();

        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_BUFFER_SIZE);
        protocols.add_protocols(
            &[
                IDENTIFY_PROTOCOL,
                IDENTIFY_PROTOCOL_LEGACY,
                IDENTIFY_PUSH_PROTOCOL,
                IDENTIFY_PUSH_PROTOCOL_LEGACY,
                IDENTIFY_DELTA_PROTOCOL,
            ],
            notification_tx,
        );

        let context = Arc::new(IdentifyContext {
            config,
            node_identity,
            peer_manager,
            protocols,
            connections,
            event_bus,
            observed_addrs,
            addr_lock: Mutex::new(()),
        });

        refresh_own_peer_record(&context);

        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER_SIZE);
        let (handler_request_tx, handler_request_rx) = mpsc::channel(REQUEST_BUFFER_SIZE);

        let service = Self {
            context: Arc::clone(&context),
            conns: Arc::new(RwLock::new(HashMap::new())),
            request_tx,
            handler_request_tx,
            shutdown: Arc::new(Mutex::new(shutdown)),
            shutdown_signal: shutdown_signal.clone(),
            join_handles: Arc::new(Mutex::new(None)),
        };

        let (handler_closed_tx, handler_closed_rx) = mpsc::channel(REQUEST_BUFFER_SIZE);
        let event_loop = IdentifyEventLoop {
            context,
            service: service.clone(),
            handlers: HashMap::new(),
            request_rx: request_rx.fuse(),
            handler_request_rx: handler_request_rx.fuse(),
            notification_rx: notification_rx.fuse(),
            connection_events: connection_events.fuse(),
            address_events: address_events.fuse(),
            protocol_events: protocol_events.fuse(),
            handler_closed_tx,
            handler_closed_rx: handler_closed_rx.fuse(),
            shutdown_signal,
        };
        let loop_handle = task::spawn(event_loop.run());

        *service.join_handles.lock().unwrap() = Some(vec![loop_handle, obsaddr_handle]);

        service
    }

    /// Begin identifying the connection unless an identification already ran or is running, and return a
    /// signal that resolves when the identification terminates. Every caller for the same connection gets
    /// the same signal; a signal for a finished identification resolves immediately.
    pub fn identify_wait(&self, conn: &PeerConnection) -> OneshotSignal<()> {
        {
            let conns = self.conns.read().unwrap();
            if let Some(signal) = conns.get(&conn.id()) {
                return signal.clone();
            }
        }

        let mut conns = self.conns.write().unwrap();
        // Double check: another caller may have won the race for the write lock
        if let Some(signal) = conns.get(&conn.id()) {
            return signal.clone();
        }

        let trigger = OneshotTrigger::new();
        let signal = trigger.to_signal();
        conns.insert(conn.id(), signal.clone());

        // The connection may already be closed; the identification will fail to open a stream and forget
        // the connection, which is fine.
        task::spawn(identify_connection(
            Arc::clone(&self.context),
            Arc::clone(&self.conns),
            conn.clone(),
            trigger,
            self.shutdown_signal.clone(),
        ));

        signal
    }

    /// Identify the connection, waiting for completion.
    pub async fn identify_conn(&self, conn: &PeerConnection) {
        self.identify_wait(conn).await;
    }

    /// The addresses remote peers have reported observing us on, where enough distinct observers agree.
    pub async fn own_observed_addrs(&self) -> Vec<multiaddr::Multiaddr> {
        self.context.observed_addrs.addrs().await
    }

    pub async fn observed_addrs_for(&self, local: &multiaddr::Multiaddr) -> Vec<multiaddr::Multiaddr> {
        self.context.observed_addrs.addrs_for(local).await
    }

    /// Request an identify push to every connected peer.
    pub async fn push_all(&self) {
        if self.request_tx.clone().send(IdentifyRequest::PushAll).await.is_err() {
            debug!(target: LOG_TARGET, "Push request dropped: identify service is shut down");
        }
    }

    /// Shut the service down and wait for its tasks to exit. Idempotent.
    pub async fn close(&self) {
        self.shutdown.lock().unwrap().trigger();
        let join_handles = self.join_handles.lock().unwrap().take();
        if let Some(handles) = join_handles {
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}

/// Sign a fresh record of our listen addresses and store it where outgoing identify messages pick it up.
fn refresh_own_peer_record(context: &IdentifyContext) {
    let record = context.node_identity.sign_peer_record();
    log_if_error!(
        target: LOG_TARGET,
        context.peer_manager.consume_peer_record(record, PERMANENT_ADDR_TTL),
        "Failed to store own peer record: {error}",
    );
}

struct IdentifyEventLoop {
    context: Arc<IdentifyContext>,
    service: IdentifyService,
    handlers: HashMap<NodeId, PeerIdentifyHandler>,
    request_rx: Fuse<mpsc::Receiver<IdentifyRequest>>,
    handler_request_rx: Fuse<mpsc::Receiver<PeerHandlerRequest>>,
    notification_rx: Fuse<mpsc::Receiver<ProtocolNotification<Substream>>>,
    connection_events: Fuse<ConnectionManagerEventReceiver>,
    address_events: Fuse<broadcast::Receiver<Arc<LocalAddressesUpdated>>>,
    protocol_events: Fuse<broadcast::Receiver<Arc<LocalProtocolsUpdated>>>,
    handler_closed_tx: mpsc::Sender<(NodeId, u64)>,
    handler_closed_rx: Fuse<mpsc::Receiver<(NodeId, u64)>>,
    shutdown_signal: ShutdownSignal,
}

impl IdentifyEventLoop {
    async fn run(mut self) {
        let mut shutdown_signal = self.shutdown_signal.clone();
        loop {
            futures::select! {
                request = self.request_rx.select_next_some() => {
                    match request {
                        IdentifyRequest::PushAll => {
                            for handler in self.handlers.values() {
                                handler.request_push();
                            }
                        },
                    }
                },

                request = self.handler_request_rx.select_next_some() => {
                    self.handle_handler_request(request);
                },

                notification = self.notification_rx.select_next_some() => {
                    self.handle_notification(notification);
                },

                event = self.connection_events.select_next_some() => {
                    if let Ok(event) = event {
                        self.handle_connection_event(&event).await;
                    }
                },

                event = self.address_events.select_next_some() => {
                    if event.is_ok() {
                        refresh_own_peer_record(&self.context);
                        for handler in self.handlers.values() {
                            handler.request_push();
                        }
                    }
                },

                event = self.protocol_events.select_next_some() => {
                    if event.is_ok() {
                        for handler in self.handlers.values() {
                            handler.request_delta();
                        }
                    }
                },

                closed = self.handler_closed_rx.select_next_some() => {
                    let (node_id, handler_id) = closed;
                    // Only remove the handler that actually closed; the peer may have reconnected and
                    // received a new handler in the meantime
                    if self.handlers.get(&node_id).map(|h| h.id()) == Some(handler_id) {
                        self.handlers.remove(&node_id);
                    }
                },

                _ = shutdown_signal => {
                    info!(target: LOG_TARGET, "Identify service shutting down");
                    for (_, handler) in self.handlers.drain() {
                        handler.close().await;
                    }
                    break;
                },
            }
        }
    }

    /// Get or create the per-peer handler. A handler is only created while the peer is connected.
    fn handle_handler_request(&mut self, request: PeerHandlerRequest) {
        if let Some(handler) = self.handlers.get(&request.node_id) {
            let _ = request.reply.send(Some(handler.clone()));
            return;
        }

        let handler = self
            .context
            .connections
            .get_connection(&request.node_id)
            .map(|conn| {
                let initial = populate_message(&self.context, &conn, request.use_peer_records);
                PeerIdentifyHandler::spawn(Arc::clone(&self.context), request.node_id.clone(), initial)
            });
        if let Some(handler) = handler.as_ref() {
            self.handlers.insert(request.node_id, handler.clone());
        }
        let _ = request.reply.send(handler);
    }

    fn handle_notification(&mut self, notification: ProtocolNotification<Substream>) {
        let ProtocolNotification { protocol, event } = notification;
        let (node_id, substream) = match event {
            ProtocolEvent::NewInboundSubstream(node_id, substream) => (node_id, substream),
        };
        debug!(
            target: LOG_TARGET,
            "New inbound substream from peer '{}' for protocol '{}'",
            node_id.short_str(),
            String::from_utf8_lossy(&protocol)
        );

        if protocol == IDENTIFY_PROTOCOL || protocol == IDENTIFY_PROTOCOL_LEGACY {
            task::spawn(handle_identify_request(
                self.service.handler_request_tx.clone(),
                *node_id,
                protocol,
                substream,
            ));
        } else if protocol == IDENTIFY_PUSH_PROTOCOL || protocol == IDENTIFY_PUSH_PROTOCOL_LEGACY {
            task::spawn(handle_identify_push(
                Arc::clone(&self.context),
                *node_id,
                protocol,
                substream,
            ));
        } else if protocol == IDENTIFY_DELTA_PROTOCOL {
            task::spawn(handle_identify_delta(Arc::clone(&self.context), *node_id, substream));
        } else {
            warn!(
                target: LOG_TARGET,
                "Notification for unexpected protocol '{}'",
                String::from_utf8_lossy(&protocol)
            );
        }
    }

    async fn handle_connection_event(&mut self, event: &ConnectionManagerEvent) {
        use ConnectionManagerEvent::*;
        match event {
            PeerConnected(conn) => {
                let _ = self.service.identify_wait(conn);
            },
            PeerDisconnected(node_id, conn_id) => {
                self.handle_disconnect(node_id, *conn_id).await;
            },
            _ => {},
        }
    }

    async fn handle_disconnect(&mut self, node_id: &NodeId, conn_id: ConnectionId) {
        // Stop tracking the connection's identification
        self.service.conns.write().unwrap().remove(&conn_id);

        if self.context.connections.is_connected(node_id) {
            // Another connection to this peer is still up
            return;
        }

        // Last disconnect: undo the setting of addresses to the connected TTL
        {
            let _guard = self.context.addr_lock.lock().unwrap();
            self.context
                .peer_manager
                .update_addrs(node_id, CONNECTED_ADDR_TTL, RECENTLY_CONNECTED_ADDR_TTL);
        }

        if let Some(handler) = self.handlers.get(node_id).cloned() {
            // The handler must have fully stopped before it is dropped from the map, otherwise a message
            // from the old handler could overwrite state synchronised with a handler for a new connection
            let mut closed_tx = self.handler_closed_tx.clone();
            let node_id = node_id.clone();
            task::spawn(async move {
                handler.close().await;
                let _ = closed_tx.send((node_id, handler.id())).await;
            });
        }
    }
}

/// One transient task per connection identification.
async fn identify_connection(
    context: Arc<IdentifyContext>,
    conns: Arc<RwLock<HashMap<ConnectionId, OneshotSignal<()>>>>,
    mut conn: PeerConnection,
    mut trigger: OneshotTrigger<()>,
    shutdown_signal: ShutdownSignal,
)
{
    let node_id = conn.peer_node_id().clone();
    let mut shutdown_signal = shutdown_signal;

    let result = {
        let identify = run_identify(&context, &conns, &mut conn).fuse();
        pin_mut!(identify);
        futures::select! {
            result = identify => result,
            _ = shutdown_signal => Err(IdentifyError::ServiceShutDown),
        }
    };

    // The completion signal fires exactly once, on every exit path
    trigger.fire(());

    match result {
        Ok(()) => {
            debug!(
                target: LOG_TARGET,
                "Identification of peer '{}' complete",
                node_id.short_str()
            );
            context
                .event_bus
                .publish_peer_identification(PeerIdentificationEvent::Completed { node_id });
        },
        Err(err) => {
            debug!(
                target: LOG_TARGET,
                "Identification of peer '{}' failed: {}",
                node_id.short_str(),
                err
            );
            context
                .event_bus
                .publish_peer_identification(PeerIdentificationEvent::Failed {
                    node_id,
                    error: err.to_string(),
                });
        },
    }
}

async fn run_identify(
    context: &IdentifyContext,
    conns: &RwLock<HashMap<ConnectionId, OneshotSignal<()>>>,
    conn: &mut PeerConnection,
) -> Result<(), IdentifyError>
{
    let negotiated = match conn
        .open_substream(&[IDENTIFY_PROTOCOL, IDENTIFY_PROTOCOL_LEGACY])
        .await
    {
        Ok(negotiated) => negotiated,
        Err(err @ PeerConnectionError::ProtocolError(_)) => {
            // The substream opened but no identify protocol was agreed; the substream is abandoned and the
            // connection left up
            debug!(
                target: LOG_TARGET,
                "Identify protocol negotiation with '{}' failed: {}",
                conn.peer_node_id().short_str(),
                err
            );
            return Err(err.into());
        },
        Err(err) => {
            debug!(
                target: LOG_TARGET,
                "Error opening identify stream on {}: {}", conn, err
            );
            // The connection is probably already closed; make sure, and forget it. Usually the disconnect
            // event does this but it may already have been processed.
            let conn_id = conn.id();
            let _ = conn.disconnect().await;
            conns.write().unwrap().remove(&conn_id);
            return Err(err.into());
        },
    };

    let use_peer_records = protocol_supports_peer_records(&negotiated.protocol);
    let mut stream = negotiated.stream;

    let msg: proto::Identify = match read_message(&mut stream, MAX_IDENTIFY_MSG_SIZE).await {
        Ok(msg) => msg,
        Err(err) => {
            warn!(
                target: LOG_TARGET,
                "Error reading identify message from '{}': {}",
                conn.peer_node_id().short_str(),
                err
            );
            return Err(err);
        },
    };

    consume_message(context, msg, conn, use_peer_records);

    let _ = stream.close().await;
    Ok(())
}

/// Serve an inbound identify request stream: write the current snapshot and close.
async fn handle_identify_request(
    mut handler_request_tx: mpsc::Sender<PeerHandlerRequest>,
    node_id: NodeId,
    protocol: ProtocolId,
    mut stream: Substream,
)
{
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = PeerHandlerRequest {
        node_id: node_id.clone(),
        use_peer_records: protocol_supports_peer_records(&protocol),
        reply: reply_tx,
    };
    if handler_request_tx.send(request).await.is_err() {
        // Service shut down
        return;
    }

    let handler = match reply_rx.await {
        Ok(Some(handler)) => handler,
        // No handler is created for a peer that is no longer connected
        _ => {
            let _ = stream.close().await;
            return;
        },
    };

    let msg = handler.snapshot();
    if let Err(err) = write_message(&mut stream, &msg).await {
        debug!(
            target: LOG_TARGET,
            "Failed to write identify response to '{}': {}",
            node_id.short_str(),
            err
        );
        return;
    }
    let _ = stream.close().await;
    debug!(
        target: LOG_TARGET,
        "Sent identify response to '{}'",
        node_id.short_str()
    );
}

/// Consume an inbound push stream. Uses the same consume path as the initial identify response.
async fn handle_identify_push(
    context: Arc<IdentifyContext>,
    node_id: NodeId,
    protocol: ProtocolId,
    mut stream: Substream,
)
{
    let msg: proto::Identify = match read_message(&mut stream, MAX_IDENTIFY_MSG_SIZE).await {
        Ok(msg) => msg,
        Err(err) => {
            warn!(
                target: LOG_TARGET,
                "Error reading identify push from '{}': {}",
                node_id.short_str(),
                err
            );
            return;
        },
    };

    match context.connections.get_connection(&node_id) {
        Some(conn) => consume_message(&context, msg, &conn, protocol_supports_peer_records(&protocol)),
        None => debug!(
            target: LOG_TARGET,
            "Dropping identify push from disconnected peer '{}'",
            node_id.short_str()
        ),
    }
    let _ = stream.close().await;
}

/// Consume an inbound delta stream.
async fn handle_identify_delta(context: Arc<IdentifyContext>, node_id: NodeId, mut stream: Substream) {
    let msg: proto::Identify = match read_message(&mut stream, MAX_IDENTIFY_MSG_SIZE).await {
        Ok(msg) => msg,
        Err(err) => {
            warn!(
                target: LOG_TARGET,
                "Error reading identify delta from '{}': {}",
                node_id.short_str(),
                err
            );
            return;
        },
    };

    match msg.delta {
        Some(delta) => consume_delta(&context, &node_id, &delta),
        None => debug!(
            target: LOG_TARGET,
            "Identify delta message from '{}' carries no delta",
            node_id.short_str()
        ),
    }
    let _ = stream.close().await;
}

/// A bare context for unit tests of the message builder/consumer.
#[cfg(test)]
pub(super) fn test_context(listen_addrs: &[&str]) -> Arc<IdentifyContext> {
    use crate::test_utils::TestNode;

    let node = TestNode::new(listen_addrs);
    let shutdown = Shutdown::new();
    let (observed_addrs, _) = ObservedAddrManager::spawn(
        Arc::clone(&node.identity),
        node.event_bus.subscribe_local_addresses_updated(),
        shutdown.to_signal(),
    );
    // Keep the worker alive for the duration of the test process
    std::mem::forget(shutdown);

    let context = Arc::new(IdentifyContext {
        config: IdentifyConfig::default(),
        node_identity: node.identity,
        peer_manager: node.peer_manager,
        protocols: node.protocols,
        connections: node.connections,
        event_bus: node.event_bus,
        observed_addrs,
        addr_lock: Mutex::new(()),
    });
    refresh_own_peer_record(&context);
    context
}
