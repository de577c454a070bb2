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

use blake2::{
    digest::{Input, VariableOutput},
    VarBlake2b,
};
use ed25519_dalek::PublicKey;
use std::{convert::TryFrom, fmt};
use thiserror::Error;

const NODE_ID_ARRAY_SIZE: usize = 13;
type NodeIdArray = [u8; NODE_ID_ARRAY_SIZE];

#[derive(Debug, Error, Clone)]
pub enum NodeIdError {
    #[error("Incorrect byte count (expected {} bytes)", NODE_ID_ARRAY_SIZE)]
    IncorrectByteCount,
}

/// A node's network identifier, derived from its identity public key.
#[derive(Clone, Default, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct NodeId(NodeIdArray);

impl NodeId {
    /// Derive a node id from the given identity public key
    pub fn from_key(key: &PublicKey) -> Self {
        let mut hasher = VarBlake2b::new(NODE_ID_ARRAY_SIZE).expect("node id digest size is valid");
        hasher.input(key.as_bytes());
        let mut id = [0u8; NODE_ID_ARRAY_SIZE];
        hasher.variable_result(|digest| id.copy_from_slice(digest));
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// A short hex prefix of the node id, for logging
    pub fn short_str(&self) -> String {
        self.0[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = NodeIdError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != NODE_ID_ARRAY_SIZE {
            return Err(NodeIdError::IncorrectByteCount);
        }
        let mut id = [0u8; NODE_ID_ARRAY_SIZE];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ed25519_dalek::Keypair;
    use rand::rngs::OsRng;

    #[test]
    fn derivation_is_deterministic() {
        let keypair = Keypair::generate(&mut OsRng);
        let a = NodeId::from_key(&keypair.public);
        let b = NodeId::from_key(&keypair.public);
        assert_eq!(a, b);

        let other = Keypair::generate(&mut OsRng);
        assert_ne!(a, NodeId::from_key(&other.public));
    }

    #[test]
    fn try_from_bytes() {
        let keypair = Keypair::generate(&mut OsRng);
        let id = NodeId::from_key(&keypair.public);
        let rt = NodeId::try_from(id.as_bytes()).unwrap();
        assert_eq!(id, rt);

        let err = NodeId::try_from(&[1u8, 2, 3][..]).unwrap_err();
        match err {
            NodeIdError::IncorrectByteCount => {},
        }
    }

    #[test]
    fn short_str_is_hex_prefix() {
        let keypair = Keypair::generate(&mut OsRng);
        let id = NodeId::from_key(&keypair.public);
        assert_eq!(id.short_str(), &id.to_string()[..8]);
    }
}
