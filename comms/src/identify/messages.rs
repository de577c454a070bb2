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

//! Building the outgoing identify message from local state, and applying a received one to the peer store.

use super::{config::PROTOCOL_VERSION, service::IdentifyContext, TRANSIENT_TTL};
use crate::{
    connection_manager::PeerConnection,
    event::PeerProtocolsUpdated,
    peer_manager::{NodeId, SignedPeerRecord, CONNECTED_ADDR_TTL, RECENTLY_CONNECTED_ADDR_TTL},
    proto::identify as proto,
    protocol::ProtocolId,
    utils::multiaddr::is_ip_loopback,
};
use ed25519_dalek::PublicKey;
use log::*;
use multiaddr::Multiaddr;
use std::convert::TryFrom;

const LOG_TARGET: &str = "comms::identify::messages";

/// Build the identify message describing this node, as seen from the given connection.
pub(super) fn populate_message(context: &IdentifyContext, conn: &PeerConnection, use_peer_records: bool) -> proto::Identify {
    let mut msg = proto::Identify::default();

    msg.protocols = context
        .protocols
        .protocol_ids()
        .iter()
        .map(|p| String::from_utf8_lossy(p).to_string())
        .collect();

    // Tell the other side what "public" address they are dialing from, at least in relation to us
    msg.observed_addr = conn.address().to_vec();

    if use_peer_records {
        match context.peer_manager.get_peer_record(context.node_identity.node_id()) {
            Some(record) => {
                msg.signed_peer_record = record.encode_to_vec();
            },
            None => {
                error!(
                    target: LOG_TARGET,
                    "Own peer record does not exist; identify message incomplete"
                );
            },
        }
    } else {
        // Loopback addresses are useless to anyone not on this host
        let via_loopback = is_ip_loopback(conn.local_address()) || is_ip_loopback(conn.address());
        msg.listen_addrs = context
            .node_identity
            .listen_addresses()
            .iter()
            .filter(|addr| via_loopback || !is_ip_loopback(addr))
            .map(|addr| addr.to_vec())
            .collect();
    }

    msg.public_key = context.node_identity.public_key().as_bytes().to_vec();
    msg.protocol_version = PROTOCOL_VERSION.to_string();
    msg.agent_version = context.config.user_agent.clone();

    msg
}

/// Apply a received identify message (initial response or push) to local state.
pub(super) fn consume_message(
    context: &IdentifyContext,
    msg: proto::Identify,
    conn: &PeerConnection,
    use_peer_records: bool,
)
{
    let node_id = conn.peer_node_id();

    context.peer_manager.set_protocols(
        node_id,
        msg.protocols
            .iter()
            .map(|p| ProtocolId::from(p.clone().into_bytes()))
            .collect(),
    );

    if !msg.observed_addr.is_empty() {
        match Multiaddr::try_from(msg.observed_addr.clone()) {
            Ok(observed) => context.observed_addrs.record(conn, observed),
            Err(err) => debug!(
                target: LOG_TARGET,
                "Failed to parse observed address from '{}': {}",
                node_id.short_str(),
                err
            ),
        }
    }

    let mut listen_addrs = Vec::with_capacity(msg.listen_addrs.len());
    for bytes in &msg.listen_addrs {
        match Multiaddr::try_from(bytes.clone()) {
            Ok(addr) => listen_addrs.push(addr),
            Err(err) => {
                debug!(
                    target: LOG_TARGET,
                    "Failed to parse listen address from '{}': {}",
                    node_id.short_str(),
                    err
                );
            },
        }
    }

    // NOTE: conn.address() is deliberately never added unless the peer advertised it itself. Observed but
    // unadvertised addresses gossip through the network and, behind a NAT with random source ports, leave
    // everyone holding piles of undialable addresses for this peer.

    let signed_record = if use_peer_records && !msg.signed_peer_record.is_empty() {
        match SignedPeerRecord::decode(&msg.signed_peer_record) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    "Failed to decode signed peer record from '{}': {}",
                    node_id.short_str(),
                    err
                );
                None
            },
        }
    } else {
        None
    };

    {
        // Serialise with disconnect-driven address demotion
        let _guard = context.addr_lock.lock().unwrap();

        let ttl = if context.connections.is_connected(node_id) {
            CONNECTED_ADDR_TTL
        } else {
            RECENTLY_CONNECTED_ADDR_TTL
        };

        // Invalidate previous addresses with a transient ttl rather than dropping them, so there is no
        // window with no good addresses at all
        context.peer_manager.update_addrs(node_id, CONNECTED_ADDR_TTL, TRANSIENT_TTL);

        let mut record_consumed = false;
        if let Some(record) = signed_record {
            match context.peer_manager.consume_peer_record(record, ttl) {
                Ok(true) => record_consumed = true,
                Ok(false) => {
                    debug!(
                        target: LOG_TARGET,
                        "Ignoring stale signed peer record from '{}'",
                        node_id.short_str()
                    );
                    record_consumed = true;
                },
                Err(err) => {
                    // Fall back to the unsigned addresses
                    warn!(
                        target: LOG_TARGET,
                        "Signed peer record from '{}' failed verification: {}",
                        node_id.short_str(),
                        err
                    );
                },
            }
        }
        if !record_consumed {
            context.peer_manager.add_addrs(node_id, &listen_addrs, ttl);
        }
    }

    context
        .peer_manager
        .put_metadata(node_id, "ProtocolVersion", &msg.protocol_version);
    context.peer_manager.put_metadata(node_id, "AgentVersion", &msg.agent_version);

    consume_public_key(context, conn, &msg.public_key);
}

/// Apply a received protocol delta to the peer store and announce it.
pub(super) fn consume_delta(context: &IdentifyContext, node_id: &NodeId, delta: &proto::Delta) {
    let added: Vec<ProtocolId> = delta
        .added_protocols
        .iter()
        .map(|p| ProtocolId::from(p.clone().into_bytes()))
        .collect();
    let removed: Vec<ProtocolId> = delta
        .rm_protocols
        .iter()
        .map(|p| ProtocolId::from(p.clone().into_bytes()))
        .collect();

    context.peer_manager.add_protocols(node_id, &added);
    context.peer_manager.remove_protocols(node_id, &removed);

    context.event_bus.publish_peer_protocols_updated(PeerProtocolsUpdated {
        node_id: node_id.clone(),
        added,
        removed,
    });
}

/// Reconcile a public key received over identify with what the peer store holds.
///
/// A key that does not hash to the connection's peer id is discarded: the peer is lying about its identity.
/// A stored key is never overwritten.
fn consume_public_key(context: &IdentifyContext, conn: &PeerConnection, key_bytes: &[u8]) {
    let node_id = conn.peer_node_id();

    if key_bytes.is_empty() {
        // Insecure transport; nothing to verify
        debug!(
            target: LOG_TARGET,
            "No public key received for peer '{}'",
            node_id.short_str()
        );
        return;
    }

    let new_key = match PublicKey::from_bytes(key_bytes) {
        Ok(key) => key,
        Err(err) => {
            warn!(
                target: LOG_TARGET,
                "Cannot unmarshal public key from peer '{}': {}",
                node_id.short_str(),
                err
            );
            return;
        },
    };

    let derived = NodeId::from_key(&new_key);
    if derived != *node_id {
        error!(
            target: LOG_TARGET,
            "Received key for peer '{}' derives a different id '{}'; discarding",
            node_id.short_str(),
            derived.short_str()
        );
        return;
    }

    match context.peer_manager.pub_key(node_id) {
        None => {
            context.peer_manager.add_pub_key(node_id, new_key);
        },
        Some(current) if current == new_key => {},
        Some(_) => {
            // Two different keys both matching the peer id should be impossible; leave the stored key alone
            error!(
                target: LOG_TARGET,
                "Identify got a different key for peer '{}'; keeping the stored key",
                node_id.short_str()
            );
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        identify::service::test_context,
        test_utils::{fake_connection, node_identity},
    };
    use crate::connection_manager::ConnectionDirection;

    fn connection_for(peer: &NodeId) -> PeerConnection {
        fake_connection(
            peer.clone(),
            "/ip4/10.0.0.1/tcp/9000",
            "/ip4/44.44.44.44/tcp/9000",
            ConnectionDirection::Inbound,
        )
    }

    #[tokio_macros::test_basic]
    async fn populate_skips_loopback_unless_via_loopback() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000", "/ip4/127.0.0.1/tcp/9000"]);
        let peer = node_identity(&[]);

        let conn = connection_for(peer.node_id());
        let msg = populate_message(&context, &conn, false);
        assert_eq!(msg.listen_addrs, vec!["/ip4/10.0.0.1/tcp/9000"
            .parse::<Multiaddr>()
            .unwrap()
            .to_vec()]);

        // Over loopback, loopback listen addresses are useful
        let conn = fake_connection(
            peer.node_id().clone(),
            "/ip4/127.0.0.1/tcp/9000",
            "/ip4/127.0.0.1/tcp/41000",
            ConnectionDirection::Inbound,
        );
        let msg = populate_message(&context, &conn, false);
        assert_eq!(msg.listen_addrs.len(), 2);
    }

    #[tokio_macros::test_basic]
    async fn populate_uses_signed_record_when_supported() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000"]);
        let peer = node_identity(&[]);
        let conn = connection_for(peer.node_id());

        let msg = populate_message(&context, &conn, true);
        assert!(msg.listen_addrs.is_empty());
        let record = SignedPeerRecord::decode(&msg.signed_peer_record).unwrap();
        let contents = record.verify().unwrap();
        assert_eq!(&contents.node_id, context.node_identity.node_id());

        let msg = populate_message(&context, &conn, false);
        assert!(msg.signed_peer_record.is_empty());
        assert!(!msg.listen_addrs.is_empty());
    }

    #[tokio_macros::test_basic]
    async fn consume_stores_advertised_state() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000"]);
        let peer = node_identity(&["/ip4/88.88.88.88/tcp/9000"]);
        let conn = connection_for(peer.node_id());

        let msg = proto::Identify {
            protocols: vec!["/proto/a".to_string()],
            listen_addrs: vec![peer.listen_addresses()[0].to_vec()],
            public_key: peer.public_key().as_bytes().to_vec(),
            protocol_version: "lattice/0.1.0".to_string(),
            agent_version: "peer/1.2.3".to_string(),
            ..Default::default()
        };
        consume_message(&context, msg, &conn, false);

        let node_id = peer.node_id();
        assert_eq!(context.peer_manager.addrs(node_id), peer.listen_addresses());
        assert!(context
            .peer_manager
            .supports_protocols(node_id, &[ProtocolId::from_static(b"/proto/a")]));
        assert_eq!(
            context.peer_manager.get_metadata(node_id, "AgentVersion").unwrap(),
            "peer/1.2.3"
        );
        assert_eq!(context.peer_manager.pub_key(node_id).unwrap(), peer.public_key());
    }

    #[tokio_macros::test_basic]
    async fn consume_never_stores_the_connection_address() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000"]);
        let peer = node_identity(&[]);
        let conn = connection_for(peer.node_id());

        // Peer advertises nothing
        consume_message(&context, proto::Identify::default(), &conn, false);
        assert!(context.peer_manager.addrs(peer.node_id()).is_empty());
    }

    #[tokio_macros::test_basic]
    async fn consume_prefers_verified_record_over_listen_addrs() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000"]);
        let peer = node_identity(&["/ip4/88.88.88.88/tcp/9000"]);
        let conn = connection_for(peer.node_id());

        let msg = proto::Identify {
            // A conflicting unsigned address that must lose to the record
            listen_addrs: vec!["/ip4/99.99.99.99/tcp/1".parse::<Multiaddr>().unwrap().to_vec()],
            signed_peer_record: peer.sign_peer_record().encode_to_vec(),
            ..Default::default()
        };
        consume_message(&context, msg, &conn, true);

        assert_eq!(context.peer_manager.addrs(peer.node_id()), peer.listen_addresses());
    }

    #[tokio_macros::test_basic]
    async fn consume_falls_back_to_unsigned_on_bad_record() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000"]);
        let peer = node_identity(&["/ip4/88.88.88.88/tcp/9000"]);
        let conn = connection_for(peer.node_id());

        let msg = proto::Identify {
            listen_addrs: vec![peer.listen_addresses()[0].to_vec()],
            signed_peer_record: b"not a record".to_vec(),
            ..Default::default()
        };
        consume_message(&context, msg, &conn, true);

        assert_eq!(context.peer_manager.addrs(peer.node_id()), peer.listen_addresses());
    }

    #[tokio_macros::test_basic]
    async fn pubkey_mismatch_is_discarded() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000"]);
        let peer = node_identity(&[]);
        let liar = node_identity(&[]);
        let conn = connection_for(peer.node_id());

        // A key that does not derive the connection's peer id
        consume_public_key(&context, &conn, liar.public_key().as_bytes());
        assert!(context.peer_manager.pub_key(peer.node_id()).is_none());

        // The correct key is accepted
        consume_public_key(&context, &conn, peer.public_key().as_bytes());
        assert_eq!(context.peer_manager.pub_key(peer.node_id()).unwrap(), peer.public_key());

        // And is never overwritten afterwards
        consume_public_key(&context, &conn, liar.public_key().as_bytes());
        assert_eq!(context.peer_manager.pub_key(peer.node_id()).unwrap(), peer.public_key());
    }

    #[tokio_macros::test_basic]
    async fn delta_updates_peer_protocols_and_announces() {
        let context = test_context(&["/ip4/10.0.0.1/tcp/9000"]);
        let peer = node_identity(&[]);
        let mut events = context.event_bus.subscribe_peer_protocols_updated();

        let a = ProtocolId::from_static(b"/proto/a");
        let b = ProtocolId::from_static(b"/proto/b");
        context.peer_manager.set_protocols(peer.node_id(), vec![a.clone()]);

        let delta = proto::Delta {
            added_protocols: vec!["/proto/b".to_string()],
            rm_protocols: vec!["/proto/a".to_string()],
        };
        consume_delta(&context, peer.node_id(), &delta);

        assert!(!context.peer_manager.supports_protocols(peer.node_id(), &[a.clone()]));
        assert!(context.peer_manager.supports_protocols(peer.node_id(), &[b.clone()]));

        let event = events.try_recv().unwrap();
        assert_eq!(event.node_id, *peer.node_id());
        assert_eq!(event.added, vec![b]);
        assert_eq!(event.removed, vec![a]);
    }
}
