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

use super::{ProtocolError, ProtocolId};
use crate::{
    event::{EventBus, LocalProtocolsUpdated},
    peer_manager::NodeId,
};
use futures::{channel::mpsc, SinkExt};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Notification of an event on a registered protocol.
#[derive(Debug)]
pub enum ProtocolEvent<TSubstream> {
    /// The peer negotiated the protocol on a substream it opened
    NewInboundSubstream(Box<NodeId>, TSubstream),
}

#[derive(Debug)]
pub struct ProtocolNotification<TSubstream> {
    pub protocol: ProtocolId,
    pub event: ProtocolEvent<TSubstream>,
}

impl<TSubstream> ProtocolNotification<TSubstream> {
    pub fn new(protocol: ProtocolId, event: ProtocolEvent<TSubstream>) -> Self {
        Self { protocol, event }
    }
}

/// The set of protocols this node speaks.
///
/// Each registered protocol has a notification sender which receives inbound substreams negotiated for it.
/// The registry can be mutated at runtime; mutations are announced on the event bus as
/// `LocalProtocolsUpdated` so that interested parties (e.g. identify) can inform connected peers.
pub struct Protocols<TSubstream> {
    notifiers: Arc<RwLock<HashMap<ProtocolId, mpsc::Sender<ProtocolNotification<TSubstream>>>>>,
    event_bus: EventBus,
}

impl<TSubstream> Clone for Protocols<TSubstream> {
    fn clone(&self) -> Self {
        Self {
            notifiers: Arc::clone(&self.notifiers),
            event_bus: self.event_bus.clone(),
        }
    }
}

impl<TSubstream> Protocols<TSubstream> {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            notifiers: Arc::new(RwLock::new(HashMap::new())),
            event_bus,
        }
    }

    /// Register protocols, directing their inbound substreams at the given notifier.
    pub fn add_protocols(&self, protocols: &[ProtocolId], notifier: mpsc::Sender<ProtocolNotification<TSubstream>>) {
        {
            let mut lock = self.notifiers.write().unwrap();
            lock.extend(protocols.iter().map(|p| (p.clone(), notifier.clone())));
        }
        self.event_bus.publish_local_protocols_updated(LocalProtocolsUpdated {
            added: protocols.to_vec(),
            removed: Vec::new(),
        });
    }

    /// Deregister protocols. Unknown protocols are ignored.
    pub fn remove_protocols(&self, protocols: &[ProtocolId]) {
        let removed = {
            let mut lock = self.notifiers.write().unwrap();
            protocols
                .iter()
                .filter(|p| lock.remove(*p).is_some())
                .cloned()
                .collect::<Vec<_>>()
        };
        if !removed.is_empty() {
            self.event_bus.publish_local_protocols_updated(LocalProtocolsUpdated {
                added: Vec::new(),
                removed,
            });
        }
    }

    /// The identifiers of all currently registered protocols.
    pub fn protocol_ids(&self) -> Vec<ProtocolId> {
        self.notifiers.read().unwrap().keys().cloned().collect()
    }

    pub async fn notify(
        &self,
        protocol: &ProtocolId,
        event: ProtocolEvent<TSubstream>,
    ) -> Result<(), ProtocolError>
    {
        let notifier = self.notifiers.read().unwrap().get(protocol).cloned();
        match notifier {
            Some(mut sender) => {
                sender.send(ProtocolNotification::new(protocol.clone(), event)).await?;
                Ok(())
            },
            None => Err(ProtocolError::ProtocolNotRegistered),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{event::EventBus, test_utils::node_id};
    use futures::StreamExt;

    #[test]
    fn add_and_list() {
        let protocols = Protocols::<()>::new(EventBus::new());
        let (tx, _rx) = mpsc::channel(1);
        let ids = [
            ProtocolId::from_static(b"/lattice/test/1"),
            ProtocolId::from_static(b"/lattice/test/2"),
        ];
        protocols.add_protocols(&ids, tx);

        let mut registered = protocols.protocol_ids();
        registered.sort();
        assert_eq!(registered, ids.to_vec());
    }

    #[test]
    fn mutations_are_announced() {
        let event_bus = EventBus::new();
        let mut events = event_bus.subscribe_local_protocols_updated();
        let protocols = Protocols::<()>::new(event_bus);

        let (tx, _rx) = mpsc::channel(1);
        let ids = [ProtocolId::from_static(b"/lattice/test/1")];
        protocols.add_protocols(&ids, tx);
        protocols.remove_protocols(&ids);

        let added = events.try_recv().unwrap();
        assert_eq!(added.added, ids.to_vec());
        let removed = events.try_recv().unwrap();
        assert_eq!(removed.removed, ids.to_vec());
    }

    #[tokio_macros::test_basic]
    async fn notify() {
        let protocols = Protocols::<()>::new(EventBus::new());
        let (tx, mut rx) = mpsc::channel(1);
        let ids = [ProtocolId::from_static(b"/lattice/test/1")];
        protocols.add_protocols(&ids, tx);

        let peer = node_id(1);
        protocols
            .notify(&ids[0], ProtocolEvent::NewInboundSubstream(Box::new(peer.clone()), ()))
            .await
            .unwrap();

        let notification = rx.next().await.unwrap();
        assert_eq!(notification.protocol, ids[0]);
        match notification.event {
            ProtocolEvent::NewInboundSubstream(node_id, _) => assert_eq!(*node_id, peer),
        }
    }

    #[tokio_macros::test_basic]
    async fn notify_fail_not_registered() {
        let protocols = Protocols::<()>::new(EventBus::new());

        let err = protocols
            .notify(
                &ProtocolId::from_static(b"/lattice/test/0"),
                ProtocolEvent::NewInboundSubstream(Box::new(node_id(0)), ()),
            )
            .await
            .unwrap_err();

        match err {
            ProtocolError::ProtocolNotRegistered => {},
            err => panic!("unexpected error {:?}", err),
        }
    }
}
