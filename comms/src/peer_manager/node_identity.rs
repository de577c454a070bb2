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
use ed25519_dalek::{Keypair, PublicKey, Signature, Signer};
use multiaddr::Multiaddr;
use rand::{CryptoRng, RngCore};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    RwLock,
};

/// The identity of this node: its keypair, derived node id and the addresses it listens on.
///
/// Listen addresses change at runtime (interfaces come and go); mutations here do not announce themselves, the
/// caller publishes `LocalAddressesUpdated` once the new set is in place.
pub struct NodeIdentity {
    node_id: NodeId,
    keypair: Keypair,
    listen_addresses: RwLock<Vec<Multiaddr>>,
    record_seq: AtomicU64,
}

impl NodeIdentity {
    pub fn new(keypair: Keypair, listen_addresses: Vec<Multiaddr>) -> Self {
        Self {
            node_id: NodeId::from_key(&keypair.public),
            keypair,
            listen_addresses: RwLock::new(listen_addresses),
            record_seq: AtomicU64::new(1),
        }
    }

    /// Generate a new random identity
    pub fn random<R>(rng: &mut R, listen_addresses: Vec<Multiaddr>) -> Self
    where R: CryptoRng + RngCore {
        Self::new(Keypair::generate(rng), listen_addresses)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.listen_addresses.read().unwrap().clone()
    }

    pub fn set_listen_addresses(&self, addresses: Vec<Multiaddr>) {
        *self.listen_addresses.write().unwrap() = addresses;
    }

    /// Produce a freshly signed record of this node's current listen addresses. Each record carries a
    /// sequence number greater than any previously produced by this identity.
    pub fn sign_peer_record(&self) -> SignedPeerRecord {
        let seq = self.record_seq.fetch_add(1, Ordering::SeqCst);
        SignedPeerRecord::sign(self, &self.listen_addresses(), seq)
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}
