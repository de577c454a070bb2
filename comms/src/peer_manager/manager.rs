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
    error::PeerManagerError,
    node_id::NodeId,
    peer::Peer,
    peer_record::SignedPeerRecord,
};
use crate::protocol::ProtocolId;
use ed25519_dalek::PublicKey;
use multiaddr::Multiaddr;
use std::{
    collections::HashMap,
    sync::RwLock,
    time::Duration,
};

/// In-memory store of everything known about remote peers: addresses and their lifetimes, advertised
/// protocols, public keys, certified (signed) address records and free-form metadata.
///
/// All methods take `&self`; the store is internally synchronised and no lock is ever held across an await
/// point by callers.
#[derive(Default)]
pub struct PeerManager {
    peers: RwLock<HashMap<NodeId, Peer>>,
}

impl PeerManager {
    pub fn new() -> Self {
        Default::default()
    }

    fn with_peer_mut<F, T>(&self, node_id: &NodeId, f: F) -> T
    where F: FnOnce(&mut Peer) -> T {
        let mut lock = self.peers.write().unwrap();
        let peer = lock
            .entry(node_id.clone())
            .or_insert_with(|| Peer::new(node_id.clone()));
        f(peer)
    }

    fn with_peer<F, T>(&self, node_id: &NodeId, f: F) -> Option<T>
    where F: FnOnce(&Peer) -> T {
        self.peers.read().unwrap().get(node_id).map(f)
    }

    /// Replace the peer's advertised protocol set
    pub fn set_protocols(&self, node_id: &NodeId, protocols: Vec<ProtocolId>) {
        self.with_peer_mut(node_id, |peer| peer.supported_protocols = protocols);
    }

    pub fn add_protocols(&self, node_id: &NodeId, protocols: &[ProtocolId]) {
        self.with_peer_mut(node_id, |peer| {
            for protocol in protocols {
                if !peer.supported_protocols.contains(protocol) {
                    peer.supported_protocols.push(protocol.clone());
                }
            }
        });
    }

    pub fn remove_protocols(&self, node_id: &NodeId, protocols: &[ProtocolId]) {
        self.with_peer_mut(node_id, |peer| {
            peer.supported_protocols.retain(|p| !protocols.contains(p));
        });
    }

    pub fn protocols(&self, node_id: &NodeId) -> Vec<ProtocolId> {
        self.with_peer(node_id, |peer| peer.supported_protocols.clone())
            .unwrap_or_default()
    }

    /// true if the peer has advertised every one of the given protocols
    pub fn supports_protocols(&self, node_id: &NodeId, protocols: &[ProtocolId]) -> bool {
        self.with_peer(node_id, |peer| {
            protocols.iter().all(|p| peer.supported_protocols.contains(p))
        })
        .unwrap_or(false)
    }

    pub fn add_addrs(&self, node_id: &NodeId, addrs: &[Multiaddr], ttl: Duration) {
        self.with_peer_mut(node_id, |peer| peer.add_addrs(addrs, ttl, false));
    }

    /// Re-class the peer's addresses held at `from_ttl` to `to_ttl`
    pub fn update_addrs(&self, node_id: &NodeId, from_ttl: Duration, to_ttl: Duration) {
        self.with_peer_mut(node_id, |peer| peer.update_addrs(from_ttl, to_ttl));
    }

    pub fn addrs(&self, node_id: &NodeId) -> Vec<Multiaddr> {
        self.with_peer(node_id, |peer| peer.live_addrs()).unwrap_or_default()
    }

    pub fn put_metadata(&self, node_id: &NodeId, key: &str, value: &str) {
        self.with_peer_mut(node_id, |peer| {
            peer.metadata.insert(key.to_string(), value.to_string());
        });
    }

    pub fn get_metadata(&self, node_id: &NodeId, key: &str) -> Option<String> {
        self.with_peer(node_id, |peer| peer.metadata.get(key).cloned()).flatten()
    }

    pub fn pub_key(&self, node_id: &NodeId) -> Option<PublicKey> {
        self.with_peer(node_id, |peer| peer.public_key).flatten()
    }

    pub fn add_pub_key(&self, node_id: &NodeId, public_key: PublicKey) {
        self.with_peer_mut(node_id, |peer| peer.public_key = Some(public_key));
    }

    /// Verify and store a signed peer record, replacing the peer's certified address set.
    ///
    /// Returns `Ok(false)` without changing anything when the record's sequence number is older than one
    /// already stored for the peer.
    pub fn consume_peer_record(&self, record: SignedPeerRecord, ttl: Duration) -> Result<bool, PeerManagerError> {
        let contents = record.verify()?;
        Ok(self.with_peer_mut(&contents.node_id, |peer| {
            if let Some((stored_seq, _)) = &peer.certified_record {
                if contents.seq < *stored_seq {
                    return false;
                }
            }
            peer.replace_certified_addrs(&contents.addresses, ttl);
            peer.certified_record = Some((contents.seq, record));
            true
        }))
    }

    /// The latest verified signed record stored for the peer, if any
    pub fn get_peer_record(&self, node_id: &NodeId) -> Option<SignedPeerRecord> {
        self.with_peer(node_id, |peer| peer.certified_record.as_ref().map(|(_, r)| r.clone()))
            .flatten()
    }

    /// The TTL class of each of the peer's live addresses. Used by tests to assert lifetime transitions.
    #[cfg(test)]
    pub(crate) fn addr_ttls(&self, node_id: &NodeId) -> Vec<(Multiaddr, Duration)> {
        let now = std::time::Instant::now();
        self.with_peer(node_id, |peer| {
            peer.addresses
                .iter()
                .filter(|a| a.expires_at > now)
                .map(|a| (a.address.clone(), a.ttl))
                .collect()
        })
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        peer_manager::{NodeIdentity, CONNECTED_ADDR_TTL, RECENTLY_CONNECTED_ADDR_TTL},
        test_utils::node_id,
    };
    use rand::rngs::OsRng;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn protocol_set_operations() {
        let pm = PeerManager::new();
        let peer = node_id(1);
        let a = ProtocolId::from_static(b"/proto/a");
        let b = ProtocolId::from_static(b"/proto/b");

        pm.set_protocols(&peer, vec![a.clone()]);
        assert!(pm.supports_protocols(&peer, &[a.clone()]));
        assert!(!pm.supports_protocols(&peer, &[b.clone()]));

        pm.add_protocols(&peer, &[b.clone()]);
        assert!(pm.supports_protocols(&peer, &[a.clone(), b.clone()]));

        pm.remove_protocols(&peer, &[a.clone()]);
        assert!(!pm.supports_protocols(&peer, &[a]));
        assert!(pm.supports_protocols(&peer, &[b]));
    }

    #[test]
    fn unknown_peer_supports_nothing() {
        let pm = PeerManager::new();
        assert!(!pm.supports_protocols(&node_id(9), &[ProtocolId::from_static(b"/proto/a")]));
        assert!(pm.addrs(&node_id(9)).is_empty());
    }

    #[test]
    fn addr_demotion_keeps_addresses_resolvable() {
        let pm = PeerManager::new();
        let peer = node_id(1);
        let a = addr("/ip4/1.2.3.4/tcp/9000");

        pm.add_addrs(&peer, &[a.clone()], CONNECTED_ADDR_TTL);
        pm.update_addrs(&peer, CONNECTED_ADDR_TTL, RECENTLY_CONNECTED_ADDR_TTL);

        // Still resolvable at the demoted class
        assert_eq!(pm.addrs(&peer), vec![a.clone()]);
        let ttls = pm.addr_ttls(&peer);
        assert_eq!(ttls, vec![(a, RECENTLY_CONNECTED_ADDR_TTL)]);
    }

    #[test]
    fn consume_peer_record_rejects_stale_seq() {
        let pm = PeerManager::new();
        let identity = NodeIdentity::random(&mut OsRng, vec![addr("/ip4/1.2.3.4/tcp/9000")]);

        let first = identity.sign_peer_record();
        let second = identity.sign_peer_record();

        assert!(pm.consume_peer_record(second, Duration::from_secs(60)).unwrap());
        // An older record must not replace a newer one
        assert!(!pm.consume_peer_record(first, Duration::from_secs(60)).unwrap());
        assert!(pm.get_peer_record(identity.node_id()).is_some());
    }

    #[test]
    fn consume_peer_record_replaces_certified_addrs() {
        let pm = PeerManager::new();
        let identity = NodeIdentity::random(&mut OsRng, vec![addr("/ip4/1.2.3.4/tcp/9000")]);

        pm.consume_peer_record(identity.sign_peer_record(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(pm.addrs(identity.node_id()), vec![addr("/ip4/1.2.3.4/tcp/9000")]);

        identity.set_listen_addresses(vec![addr("/ip4/5.6.7.8/tcp/9000")]);
        pm.consume_peer_record(identity.sign_peer_record(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(pm.addrs(identity.node_id()), vec![addr("/ip4/5.6.7.8/tcp/9000")]);
    }
}
