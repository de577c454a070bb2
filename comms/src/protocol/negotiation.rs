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
use bytes::{Bytes, BytesMut};
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use log::*;
use std::convert::TryInto;

const LOG_TARGET: &str = "comms::protocol::negotiation";

const PROTOCOL_NOT_SUPPORTED: &[u8] = b"not-supported";
const PROTOCOL_NEGOTIATION_TERMINATED: &[u8] = b"negotiation-terminated";
const BUF_CAPACITY: usize = u8::max_value() as usize + 1;
const MAX_ROUNDS_ALLOWED: u8 = 10;

/// Select a protocol to speak on a fresh substream. Frames are a single u8 length followed by the protocol
/// identifier bytes.
pub struct ProtocolNegotiation<'a, TSocket> {
    buf: BytesMut,
    socket: &'a mut TSocket,
}

impl<'a, TSocket> ProtocolNegotiation<'a, TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    pub fn new(socket: &'a mut TSocket) -> Self {
        let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
        buf.resize(BUF_CAPACITY, 0);
        Self { socket, buf }
    }

    /// Propose each of the given protocols in order until the other side accepts one. The first accepted
    /// protocol wins.
    pub async fn negotiate_protocol_outbound(
        &mut self,
        proposed_protocols: &[ProtocolId],
    ) -> Result<ProtocolId, ProtocolError>
    {
        for protocol in proposed_protocols {
            self.write_frame_flush(protocol).await?;

            let reply = self.read_frame().await?;
            // The peer has given up on this negotiation session. This reply cannot be relied upon, so
            // negotiation should be used together with a timeout.
            if reply.as_ref() == PROTOCOL_NEGOTIATION_TERMINATED {
                return Err(ProtocolError::ProtocolNegotiationTerminatedByPeer);
            }
            if reply.as_ref() == protocol {
                return Ok(protocol.clone());
            }
        }

        // Nothing left to propose, let the peer know
        self.write_frame_flush(&PROTOCOL_NEGOTIATION_TERMINATED.into()).await?;

        Err(ProtocolError::ProtocolNegotiationFailed)
    }

    /// Wait for the initiating side to propose protocols and accept the first one found in the supported
    /// list.
    pub async fn negotiate_protocol_inbound(
        &mut self,
        supported_protocols: &[ProtocolId],
    ) -> Result<ProtocolId, ProtocolError>
    {
        for _ in 0..MAX_ROUNDS_ALLOWED {
            let proposed = self.read_frame().await?;

            if proposed.as_ref() == PROTOCOL_NEGOTIATION_TERMINATED {
                return Err(ProtocolError::ProtocolNegotiationTerminatedByPeer);
            }

            match supported_protocols.iter().find(|p| proposed == p) {
                Some(protocol) => {
                    self.write_frame_flush(protocol).await?;
                    return Ok(protocol.clone());
                },
                None => {
                    self.write_frame_flush(&PROTOCOL_NOT_SUPPORTED.into()).await?;
                },
            }
        }

        // Too many rounds, tell the peer to give up
        self.write_frame_flush(&PROTOCOL_NEGOTIATION_TERMINATED.into()).await?;

        Err(ProtocolError::ProtocolNegotiationFailed)
    }

    async fn read_frame(&mut self) -> Result<Bytes, ProtocolError> {
        self.socket.read_exact(&mut self.buf[..1]).await?;
        // The length delimiter is a u8 and the buffer holds u8::MAX + 1 bytes, so len can never overrun it
        let len = self.buf[0] as usize;
        self.socket.read_exact(&mut self.buf[1..len + 1]).await?;
        trace!(
            target: LOG_TARGET,
            "Read frame '{}' ({} byte(s))",
            String::from_utf8_lossy(&self.buf[1..len + 1]),
            len
        );
        Ok(Bytes::copy_from_slice(&self.buf[1..len + 1]))
    }

    async fn write_frame_flush(&mut self, protocol: &ProtocolId) -> Result<(), ProtocolError> {
        let len_byte: u8 = protocol
            .len()
            .try_into()
            .map_err(|_| ProtocolError::ProtocolIdTooLong)?;
        self.socket.write_all(&[len_byte]).await?;
        self.socket.write_all(protocol).await?;
        self.socket.flush().await?;
        trace!(
            target: LOG_TARGET,
            "Wrote frame '{}' ({} byte(s))",
            String::from_utf8_lossy(protocol),
            len_byte
        );
        Ok(())
    }
}
