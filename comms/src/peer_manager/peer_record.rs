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

use super::{error::PeerManagerError, node_id::NodeId, node_identity::NodeIdentity};
use crate::proto::identify as proto;
use ed25519_dalek::{PublicKey, Signature, Verifier};
use log::*;
use multiaddr::Multiaddr;
use prost::Message;
use std::convert::TryFrom;

const LOG_TARGET: &str = "comms::peer_manager::peer_record";

// Domain separator mixed into every peer record signature
const SIGNING_DOMAIN: &[u8] = b"lattice-signed-peer-record";
const PAYLOAD_TYPE: &[u8] = b"/lattice/peer-record/1.0.0";

/// An authenticated envelope binding a node id to a set of addresses.
///
/// The envelope is opaque on the wire; `verify` checks the signature and the binding between the signing key
/// and the claimed node id before any of the contents may be used.
#[derive(Debug, Clone)]
pub struct SignedPeerRecord {
    envelope: proto::Envelope,
}

/// The verified contents of a `SignedPeerRecord`.
#[derive(Debug, Clone)]
pub struct PeerRecordContents {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub seq: u64,
    pub addresses: Vec<Multiaddr>,
}

impl SignedPeerRecord {
    pub(crate) fn sign(identity: &NodeIdentity, addresses: &[Multiaddr], seq: u64) -> Self {
        let record = proto::PeerRecord {
            peer_id: identity.node_id().to_vec(),
            seq,
            addresses: addresses
                .iter()
                .map(|addr| proto::peer_record::AddressInfo {
                    multiaddr: addr.to_vec(),
                })
                .collect(),
        };
        let mut payload = Vec::with_capacity(record.encoded_len());
        record.encode(&mut payload).expect("Vec<u8> has unbounded capacity");

        let signature = identity.sign(&signing_message(&payload));

        Self {
            envelope: proto::Envelope {
                public_key: identity.public_key().as_bytes().to_vec(),
                payload_type: PAYLOAD_TYPE.to_vec(),
                payload,
                signature: signature.to_bytes().to_vec(),
            },
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PeerManagerError> {
        let envelope = proto::Envelope::decode(bytes)?;
        Ok(Self { envelope })
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.envelope.encoded_len());
        self.envelope.encode(&mut buf).expect("Vec<u8> has unbounded capacity");
        buf
    }

    /// Verify the envelope signature and the key/id binding, returning the record contents.
    pub fn verify(&self) -> Result<PeerRecordContents, PeerManagerError> {
        if self.envelope.payload_type != PAYLOAD_TYPE {
            return Err(PeerManagerError::UnrecognisedPayloadType);
        }

        let public_key =
            PublicKey::from_bytes(&self.envelope.public_key).map_err(|_| PeerManagerError::MalformedPublicKey)?;
        let signature = Signature::try_from(self.envelope.signature.as_slice())
            .map_err(|_| PeerManagerError::InvalidPeerRecordSignature)?;

        public_key
            .verify(&signing_message(&self.envelope.payload), &signature)
            .map_err(|_| PeerManagerError::InvalidPeerRecordSignature)?;

        let record = proto::PeerRecord::decode(self.envelope.payload.as_slice())?;

        let node_id = NodeId::from_key(&public_key);
        if node_id.as_bytes() != record.peer_id.as_slice() {
            return Err(PeerManagerError::PeerIdMismatch);
        }

        let mut addresses = Vec::with_capacity(record.addresses.len());
        for info in record.addresses {
            match Multiaddr::try_from(info.multiaddr) {
                Ok(addr) => addresses.push(addr),
                Err(err) => {
                    debug!(
                        target: LOG_TARGET,
                        "Discarding undecodable address in peer record for '{}': {}",
                        node_id.short_str(),
                        err
                    );
                },
            }
        }

        Ok(PeerRecordContents {
            node_id,
            public_key,
            seq: record.seq,
            addresses,
        })
    }
}

fn signing_message(payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGNING_DOMAIN.len() + PAYLOAD_TYPE.len() + payload.len() + 24);
    for part in &[SIGNING_DOMAIN, PAYLOAD_TYPE, payload] {
        msg.extend_from_slice(&(part.len() as u64).to_le_bytes());
        msg.extend_from_slice(part);
    }
    msg
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::OsRng;

    fn identity_with_addrs(addrs: &[&str]) -> NodeIdentity {
        NodeIdentity::random(&mut OsRng, addrs.iter().map(|a| a.parse().unwrap()).collect())
    }

    #[test]
    fn sign_verify_roundtrip() {
        let identity = identity_with_addrs(&["/ip4/10.1.1.1/tcp/9000", "/ip4/10.1.1.2/tcp/9001"]);
        let record = identity.sign_peer_record();

        let encoded = record.encode_to_vec();
        let decoded = SignedPeerRecord::decode(&encoded).unwrap();
        let contents = decoded.verify().unwrap();

        assert_eq!(&contents.node_id, identity.node_id());
        assert_eq!(contents.addresses, identity.listen_addresses());
    }

    #[test]
    fn rejects_tampered_payload() {
        let identity = identity_with_addrs(&["/ip4/10.1.1.1/tcp/9000"]);
        let mut record = identity.sign_peer_record();

        // Substitute another node's addresses into the payload
        let attacker = identity_with_addrs(&["/ip4/66.6.6.6/tcp/6666"]);
        let forged = attacker.sign_peer_record();
        record.envelope.payload = forged.envelope.payload;

        match record.verify() {
            Err(PeerManagerError::InvalidPeerRecordSignature) => {},
            other => panic!("expected signature failure, got {:?}", other),
        }
    }

    #[test]
    fn rejects_peer_id_not_matching_key() {
        let identity = identity_with_addrs(&["/ip4/10.1.1.1/tcp/9000"]);
        let attacker = identity_with_addrs(&[]);

        // An envelope signed by the attacker's key but claiming the victim's peer id
        let record = proto::PeerRecord {
            peer_id: identity.node_id().to_vec(),
            seq: 1,
            addresses: vec![],
        };
        let mut payload = Vec::new();
        record.encode(&mut payload).unwrap();
        let signature = attacker.sign(&signing_message(&payload));
        let forged = SignedPeerRecord {
            envelope: proto::Envelope {
                public_key: attacker.public_key().as_bytes().to_vec(),
                payload_type: PAYLOAD_TYPE.to_vec(),
                payload,
                signature: signature.to_bytes().to_vec(),
            },
        };

        match forged.verify() {
            Err(PeerManagerError::PeerIdMismatch) => {},
            other => panic!("expected peer id mismatch, got {:?}", other),
        }
    }
}
