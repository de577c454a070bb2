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

use super::{node_id::NodeId, peer_record::SignedPeerRecord};
use crate::protocol::ProtocolId;
use ed25519_dalek::PublicKey;
use multiaddr::Multiaddr;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// A known address of a peer. The TTL value doubles as the address's lifetime class: operations such as
/// "demote everything held at the connected TTL" match on it.
#[derive(Debug, Clone)]
pub(super) struct PeerAddress {
    pub address: Multiaddr,
    pub ttl: Duration,
    pub expires_at: Instant,
    pub certified: bool,
}

/// A single entry in the peer store.
#[derive(Debug, Default)]
pub struct Peer {
    pub node_id: NodeId,
    pub public_key: Option<PublicKey>,
    pub supported_protocols: Vec<ProtocolId>,
    pub(super) addresses: Vec<PeerAddress>,
    pub(super) metadata: HashMap<String, String>,
    pub(super) certified_record: Option<(u64, SignedPeerRecord)>,
}

impl Peer {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Add addresses at the given TTL. An existing address only has its lifetime extended, never shortened.
    pub(super) fn add_addrs(&mut self, addrs: &[Multiaddr], ttl: Duration, certified: bool) {
        let now = Instant::now();
        self.addresses.retain(|a| a.expires_at > now);

        for addr in addrs {
            let expires_at = now + ttl;
            match self.addresses.iter_mut().find(|a| &a.address == addr) {
                Some(existing) => {
                    if expires_at > existing.expires_at {
                        existing.ttl = ttl;
                        existing.expires_at = expires_at;
                    }
                    existing.certified |= certified;
                },
                None => {
                    self.addresses.push(PeerAddress {
                        address: addr.clone(),
                        ttl,
                        expires_at,
                        certified,
                    });
                },
            }
        }
    }

    /// Re-class every live address currently held at `from_ttl` to `to_ttl`.
    pub(super) fn update_addrs(&mut self, from_ttl: Duration, to_ttl: Duration) {
        let now = Instant::now();
        for addr in self.addresses.iter_mut().filter(|a| a.ttl == from_ttl) {
            addr.ttl = to_ttl;
            addr.expires_at = now + to_ttl;
        }
    }

    /// Replace the certified address set with the given addresses.
    pub(super) fn replace_certified_addrs(&mut self, addrs: &[Multiaddr], ttl: Duration) {
        self.addresses.retain(|a| !a.certified);
        self.add_addrs(addrs, ttl, true);
    }

    /// The peer's addresses that have not yet expired
    pub fn live_addrs(&self) -> Vec<Multiaddr> {
        let now = Instant::now();
        self.addresses
            .iter()
            .filter(|a| a.expires_at > now)
            .map(|a| a.address.clone())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::node_id;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn add_addrs_only_extends() {
        let mut peer = Peer::new(node_id(7));
        let a = addr("/ip4/1.2.3.4/tcp/9000");

        peer.add_addrs(&[a.clone()], Duration::from_secs(100), false);
        peer.add_addrs(&[a.clone()], Duration::from_secs(1), false);
        // The shorter TTL must not shorten the existing entry
        assert_eq!(peer.addresses[0].ttl, Duration::from_secs(100));

        peer.add_addrs(&[a], Duration::from_secs(500), false);
        assert_eq!(peer.addresses[0].ttl, Duration::from_secs(500));
    }

    #[test]
    fn update_addrs_reclasses_matching_ttl_only() {
        let mut peer = Peer::new(node_id(7));
        let a = addr("/ip4/1.2.3.4/tcp/9000");
        let b = addr("/ip4/1.2.3.4/tcp/9001");

        peer.add_addrs(&[a], Duration::from_secs(100), false);
        peer.add_addrs(&[b], Duration::from_secs(200), false);
        peer.update_addrs(Duration::from_secs(100), Duration::from_secs(5));

        assert_eq!(peer.addresses[0].ttl, Duration::from_secs(5));
        assert_eq!(peer.addresses[1].ttl, Duration::from_secs(200));
    }

    #[test]
    fn expired_addrs_are_not_reported() {
        let mut peer = Peer::new(node_id(7));
        let a = addr("/ip4/1.2.3.4/tcp/9000");
        peer.add_addrs(&[a.clone()], Duration::from_secs(0), false);
        assert!(peer.live_addrs().is_empty());

        peer.add_addrs(&[a.clone()], Duration::from_secs(60), false);
        assert_eq!(peer.live_addrs(), vec![a]);
    }

    #[test]
    fn replace_certified_keeps_uncertified() {
        let mut peer = Peer::new(node_id(7));
        let plain = addr("/ip4/1.2.3.4/tcp/9000");
        let old_cert = addr("/ip4/5.6.7.8/tcp/9000");
        let new_cert = addr("/ip4/9.9.9.9/tcp/9000");

        peer.add_addrs(&[plain.clone()], Duration::from_secs(60), false);
        peer.add_addrs(&[old_cert], Duration::from_secs(60), true);
        peer.replace_certified_addrs(&[new_cert.clone()], Duration::from_secs(60));

        let mut addrs = peer.live_addrs();
        addrs.sort_by_key(|a| a.to_string());
        let mut expected = vec![plain, new_cert];
        expected.sort_by_key(|a| a.to_string());
        assert_eq!(addrs, expected);
    }
}
