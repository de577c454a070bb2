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

//! Peer-to-peer comms stack for the Lattice network.
//!
//! The centrepiece is the [identify](crate::identify) subsystem: peers exchange capability and addressing
//! information immediately after a connection is established, keep each other up to date with push/delta
//! messages, and the local node aggregates what remote peers report to infer its externally visible
//! addresses.

#[macro_use]
mod macros;

pub mod connection_manager;
pub mod event;
pub mod identify;
pub mod memsocket;
pub mod multiplexing;
pub mod peer_manager;
pub mod proto;
pub mod protocol;
mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use connection_manager::{ConnectionDirection, ConnectionId, ConnectionManagerEvent, LiveConnections, PeerConnection};
pub use event::EventBus;
pub use peer_manager::{NodeId, NodeIdentity, PeerManager};
