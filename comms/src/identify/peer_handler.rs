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

//! Per-peer actor owning the outbound push and delta streams.
//!
//! Triggers arrive on capacity-1 channels: if a push is already pending when another is requested, the two
//! coalesce into one. The current outgoing identify snapshot lives behind a read/write lock so that inbound
//! identify streams can serve it while the handler regenerates it on each send.

use super::{
    delimited::write_message,
    error::IdentifyError,
    messages::populate_message,
    service::IdentifyContext,
    IDENTIFY_DELTA_PROTOCOL,
    IDENTIFY_PUSH_PROTOCOL,
    IDENTIFY_PUSH_PROTOCOL_LEGACY,
};
use crate::{peer_manager::NodeId, proto::identify as proto};
use futures::{channel::mpsc, stream::Fuse, AsyncWriteExt, StreamExt};
use lattice_shutdown::Shutdown;
use log::*;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
    Mutex,
    RwLock,
};
use tokio::{task, task::JoinHandle};

const LOG_TARGET: &str = "comms::identify::peer_handler";

/// Handle to the per-peer identify handler. Exists while the peer is connected; destroyed on its last
/// disconnect.
#[derive(Clone)]
pub struct PeerIdentifyHandler {
    id: u64,
    node_id: NodeId,
    push_tx: mpsc::Sender<()>,
    delta_tx: mpsc::Sender<()>,
    snapshot: Arc<RwLock<proto::Identify>>,
    shutdown: Arc<Mutex<Shutdown>>,
    join_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PeerIdentifyHandler {
    pub(super) fn spawn(context: Arc<IdentifyContext>, node_id: NodeId, initial: proto::Identify) -> Self {
        static HANDLER_ID: AtomicU64 = AtomicU64::new(0);

        let (push_tx, push_rx) = mpsc::channel(1);
        let (delta_tx, delta_rx) = mpsc::channel(1);
        let snapshot = Arc::new(RwLock::new(initial));
        let shutdown = Shutdown::new();

        let worker = PeerIdentifyHandlerWorker {
            context,
            node_id: node_id.clone(),
            snapshot: Arc::clone(&snapshot),
            push_rx: push_rx.fuse(),
            delta_rx: delta_rx.fuse(),
            shutdown_signal: shutdown.to_signal(),
        };
        let join_handle = task::spawn(worker.run());

        Self {
            id: HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            node_id,
            push_tx,
            delta_tx,
            snapshot,
            shutdown: Arc::new(Mutex::new(shutdown)),
            join_handle: Arc::new(Mutex::new(Some(join_handle))),
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Ask the handler to push a full identify snapshot to the peer. If a push is already pending the two
    /// requests coalesce.
    pub fn request_push(&self) {
        if self.push_tx.clone().try_send(()).is_err() {
            trace!(
                target: LOG_TARGET,
                "Push already pending for peer '{}'",
                self.node_id.short_str()
            );
        }
    }

    /// As `request_push`, for a protocol delta.
    pub fn request_delta(&self) {
        if self.delta_tx.clone().try_send(()).is_err() {
            trace!(
                target: LOG_TARGET,
                "Delta already pending for peer '{}'",
                self.node_id.short_str()
            );
        }
    }

    /// The current outgoing identify snapshot for this peer
    pub fn snapshot(&self) -> proto::Identify {
        self.snapshot.read().unwrap().clone()
    }

    /// Stop the worker and wait for it to exit. The first caller does the waiting; later calls return
    /// immediately.
    pub async fn close(&self) {
        self.shutdown.lock().unwrap().trigger();
        let join_handle = self.join_handle.lock().unwrap().take();
        if let Some(join_handle) = join_handle {
            let _ = join_handle.await;
        }
    }
}

struct PeerIdentifyHandlerWorker {
    context: Arc<IdentifyContext>,
    node_id: NodeId,
    snapshot: Arc<RwLock<proto::Identify>>,
    push_rx: Fuse<mpsc::Receiver<()>>,
    delta_rx: Fuse<mpsc::Receiver<()>>,
    shutdown_signal: lattice_shutdown::ShutdownSignal,
}

impl PeerIdentifyHandlerWorker {
    async fn run(mut self) {
        let mut shutdown_signal = self.shutdown_signal.clone();
        loop {
            futures::select! {
                _ = self.push_rx.select_next_some() => {
                    if let Err(err) = self.send_push().await {
                        // The next address change will push again; nothing to do now
                        debug!(
                            target: LOG_TARGET,
                            "Failed to send identify push to peer '{}': {}",
                            self.node_id.short_str(),
                            err
                        );
                    }
                },
                _ = self.delta_rx.select_next_some() => {
                    if let Err(err) = self.send_delta().await {
                        debug!(
                            target: LOG_TARGET,
                            "Failed to send identify delta to peer '{}': {}",
                            self.node_id.short_str(),
                            err
                        );
                    }
                },
                _ = shutdown_signal => {
                    trace!(
                        target: LOG_TARGET,
                        "Identify handler for peer '{}' shutting down",
                        self.node_id.short_str()
                    );
                    break;
                },
            }
        }
    }

    async fn send_push(&mut self) -> Result<(), IdentifyError> {
        let mut conn = self
            .context
            .connections
            .get_connection(&self.node_id)
            .ok_or(IdentifyError::PeerNotConnected)?;

        let negotiated = conn
            .open_substream(&[IDENTIFY_PUSH_PROTOCOL, IDENTIFY_PUSH_PROTOCOL_LEGACY])
            .await?;
        let use_peer_records = negotiated.protocol == IDENTIFY_PUSH_PROTOCOL;
        let mut stream = negotiated.stream;

        // Regenerate the snapshot while sending the push so inbound identify responses stay in sync with
        // what the peer last saw
        let msg = {
            let mut snapshot = self.snapshot.write().unwrap();
            *snapshot = populate_message(&self.context, &conn, use_peer_records);
            snapshot.clone()
        };

        write_message(&mut stream, &msg).await?;
        stream.close().await?;
        debug!(
            target: LOG_TARGET,
            "Sent identify push to peer '{}'",
            self.node_id.short_str()
        );
        Ok(())
    }

    async fn send_delta(&mut self) -> Result<(), IdentifyError> {
        // Peers that predate the delta protocol get a full push instead
        if !self
            .context
            .peer_manager
            .supports_protocols(&self.node_id, &[IDENTIFY_DELTA_PROTOCOL])
        {
            debug!(
                target: LOG_TARGET,
                "Peer '{}' does not support the delta protocol; sending a push",
                self.node_id.short_str()
            );
            return self.send_push().await;
        }

        let delta = match self.next_delta() {
            Some(delta) => delta,
            None => return Ok(()),
        };

        let mut conn = self
            .context
            .connections
            .get_connection(&self.node_id)
            .ok_or(IdentifyError::PeerNotConnected)?;

        let negotiated = conn.open_substream(&[IDENTIFY_DELTA_PROTOCOL]).await?;
        let mut stream = negotiated.stream;

        let msg = proto::Identify {
            delta: Some(delta),
            ..Default::default()
        };
        write_message(&mut stream, &msg).await?;
        stream.close().await?;
        debug!(
            target: LOG_TARGET,
            "Sent identify delta to peer '{}'",
            self.node_id.short_str()
        );
        Ok(())
    }

    /// Diff the currently registered protocols against those in the last-sent snapshot, updating the
    /// snapshot's protocol list. Returns None when nothing changed.
    fn next_delta(&mut self) -> Option<proto::Delta> {
        let current: Vec<String> = self
            .context
            .protocols
            .protocol_ids()
            .iter()
            .map(|p| String::from_utf8_lossy(p).to_string())
            .collect();

        let mut snapshot = self.snapshot.write().unwrap();
        let old = &snapshot.protocols;

        let added: Vec<String> = current.iter().filter(|p| !old.contains(p)).cloned().collect();
        let removed: Vec<String> = old.iter().filter(|p| !current.contains(p)).cloned().collect();

        if added.is_empty() && removed.is_empty() {
            return None;
        }

        snapshot.protocols = current;
        Some(proto::Delta {
            added_protocols: added,
            rm_protocols: removed,
        })
    }
}
