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

//! Varint length-delimited message framing, as used by every identify stream: one varint byte count
//! followed by the encoded message.

use super::error::IdentifyError;
use bytes::BytesMut;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use prost::Message;

// A u32 varint fits in 5 bytes
const MAX_LENGTH_PREFIX_LEN: usize = 5;

/// Read a single delimited message, enforcing `max_size` on the encoded length.
pub async fn read_message<M, S>(stream: &mut S, max_size: usize) -> Result<M, IdentifyError>
where
    M: Message + Default,
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; MAX_LENGTH_PREFIX_LEN];
    let mut read = 0;
    loop {
        if read == MAX_LENGTH_PREFIX_LEN {
            return Err(IdentifyError::InvalidLengthPrefix);
        }
        stream.read_exact(&mut prefix[read..=read]).await?;
        let done = prefix[read] & 0x80 == 0;
        read += 1;
        if done {
            break;
        }
    }

    let len = prost::decode_length_delimiter(&prefix[..read]).map_err(|_| IdentifyError::InvalidLengthPrefix)?;
    if len > max_size {
        return Err(IdentifyError::MessageTooLarge { size: len });
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(M::decode(buf.as_slice())?)
}

/// Write a single delimited message and flush.
pub async fn write_message<M, S>(stream: &mut S, msg: &M) -> Result<(), IdentifyError>
where
    M: Message,
    S: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(msg.encoded_len() + MAX_LENGTH_PREFIX_LEN);
    msg.encode_length_delimited(&mut buf)
        .expect("BytesMut has unbounded capacity");
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{identify::MAX_IDENTIFY_MSG_SIZE, memsocket::MemorySocket, proto::identify as proto};

    #[tokio_macros::test_basic]
    async fn roundtrip() {
        let (mut a, mut b) = MemorySocket::new_pair();

        let msg = proto::Identify {
            agent_version: "test/1.0".to_string(),
            protocols: vec!["/proto/a".to_string(), "/proto/b".to_string()],
            ..Default::default()
        };
        write_message(&mut a, &msg).await.unwrap();

        let read: proto::Identify = read_message(&mut b, MAX_IDENTIFY_MSG_SIZE).await.unwrap();
        assert_eq!(read, msg);
    }

    #[tokio_macros::test_basic]
    async fn rejects_oversize_message() {
        let (mut a, mut b) = MemorySocket::new_pair();

        let msg = proto::Identify {
            agent_version: "x".repeat(MAX_IDENTIFY_MSG_SIZE),
            ..Default::default()
        };
        write_message(&mut a, &msg).await.unwrap();

        let err = read_message::<proto::Identify, _>(&mut b, MAX_IDENTIFY_MSG_SIZE)
            .await
            .unwrap_err();
        match err {
            IdentifyError::MessageTooLarge { .. } => {},
            err => panic!("unexpected error {:?}", err),
        }
    }

    #[tokio_macros::test_basic]
    async fn rejects_runaway_length_prefix() {
        let (mut a, mut b) = MemorySocket::new_pair();

        // Six continuation bytes never terminate a u32 varint
        futures::AsyncWriteExt::write_all(&mut a, &[0x80u8; 6]).await.unwrap();

        let err = read_message::<proto::Identify, _>(&mut b, MAX_IDENTIFY_MSG_SIZE)
            .await
            .unwrap_err();
        match err {
            IdentifyError::InvalidLengthPrefix => {},
            err => panic!("unexpected error {:?}", err),
        }
    }
}
