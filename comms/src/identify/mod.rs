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

//! # Peer Identify protocol
//!
//! A hello exchanged between peers right after a transport connection is established: the protocols each
//! side speaks, the addresses it listens on, its public key and what address it observed the other side
//! dialing from.
//!
//! Once identified, a per-peer handler keeps the remote up to date: a full snapshot is *pushed* when our
//! addresses change, and a protocol *delta* is sent when our protocol registry changes.
//!
//! Observed addresses reported by remotes are aggregated by [ObservedAddrManager]; an address is only
//! believed (and returned from [IdentifyService::own_observed_addrs]) once enough topologically distinct
//! observers vouch for it within a TTL window.

mod config;
mod delimited;
mod error;
mod messages;
mod obsaddr;
mod peer_handler;
mod service;


pub use config::IdentifyConfig;
pub use error::IdentifyError;
pub use obsaddr::{ObservedAddrManager, ACTIVATION_THRESH, DEFAULT_OBSERVED_ADDR_TTL};
pub use peer_handler::PeerIdentifyHandler;
pub use service::IdentifyService;

use crate::protocol::ProtocolId;
use std::time::Duration;

/// Current identify protocol. Carries a signed peer record in place of bare listen addresses.
pub const IDENTIFY_PROTOCOL: ProtocolId = ProtocolId::from_static(b"/p2p/id/1.1.0");
/// Legacy identify protocol. No signed peer record support.
pub const IDENTIFY_PROTOCOL_LEGACY: ProtocolId = ProtocolId::from_static(b"/ipfs/id/1.0.0");
/// Sender-initiated full snapshot, signed-peer-record capable.
pub const IDENTIFY_PUSH_PROTOCOL: ProtocolId = ProtocolId::from_static(b"/p2p/id/push/1.1.0");
/// Sender-initiated full snapshot, legacy.
pub const IDENTIFY_PUSH_PROTOCOL_LEGACY: ProtocolId = ProtocolId::from_static(b"/ipfs/id/push/1.0.0");
/// Sender-initiated protocol additions/removals.
pub const IDENTIFY_DELTA_PROTOCOL: ProtocolId = ProtocolId::from_static(b"/p2p/id/delta/1.0.0");

/// Hard cap on the size of a single identify message on the wire.
pub const MAX_IDENTIFY_MSG_SIZE: usize = 2048;

/// Short lifetime given to a peer's previously known addresses while an identify exchange replaces them, so
/// there is never a window in which the peer has no addresses at all.
const TRANSIENT_TTL: Duration = Duration::from_secs(10);

/// Whether the given identify protocol carries signed peer records
fn protocol_supports_peer_records(protocol: &ProtocolId) -> bool {
    *protocol == IDENTIFY_PROTOCOL || *protocol == IDENTIFY_PUSH_PROTOCOL
}
