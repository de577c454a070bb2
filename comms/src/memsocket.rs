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

//! An in-memory duplex byte stream, used to drive the transport-facing parts of this crate in tests without
//! touching the network.

use bytes::{Buf, Bytes};
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    io::{AsyncRead, AsyncWrite},
    ready,
    stream::Stream,
    task::{Context, Poll},
};
use std::{io, pin::Pin};

/// One half of an in-memory connected socket pair.
#[derive(Debug)]
pub struct MemorySocket {
    incoming: UnboundedReceiver<Bytes>,
    outgoing: UnboundedSender<Bytes>,
    current_buffer: Bytes,
    seen_eof: bool,
}

impl MemorySocket {
    /// Create a pair of sockets; bytes written to one side are read from the other.
    pub fn new_pair() -> (MemorySocket, MemorySocket) {
        let (a_tx, a_rx) = mpsc::unbounded();
        let (b_tx, b_rx) = mpsc::unbounded();

        let a = MemorySocket {
            incoming: a_rx,
            outgoing: b_tx,
            current_buffer: Bytes::new(),
            seen_eof: false,
        };
        let b = MemorySocket {
            incoming: b_rx,
            outgoing: a_tx,
            current_buffer: Bytes::new(),
            seen_eof: false,
        };

        (a, b)
    }
}

impl AsyncRead for MemorySocket {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            // Serve any bytes left over from the previous chunk first
            if self.current_buffer.has_remaining() {
                let n = std::cmp::min(buf.len(), self.current_buffer.remaining());
                self.current_buffer.copy_to_slice(&mut buf[..n]);
                return Poll::Ready(Ok(n));
            }

            if self.seen_eof {
                return Poll::Ready(Ok(0));
            }

            match ready!(Pin::new(&mut self.incoming).poll_next(cx)) {
                Some(chunk) => {
                    self.current_buffer = chunk;
                },
                None => {
                    self.seen_eof = true;
                    return Poll::Ready(Ok(0));
                },
            }
        }
    }
}

impl AsyncWrite for MemorySocket {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.outgoing.is_closed() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }

        match self.outgoing.unbounded_send(Bytes::copy_from_slice(buf)) {
            Ok(_) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.outgoing.close_channel();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};
    use std::io;

    #[tokio_macros::test_basic]
    async fn simple_write_read() -> io::Result<()> {
        let (mut a, mut b) = MemorySocket::new_pair();

        a.write_all(b"ping").await?;
        a.flush().await?;
        a.close().await?;

        let mut buf = Vec::new();
        b.read_to_end(&mut buf).await?;
        assert_eq!(buf, b"ping");

        Ok(())
    }

    #[tokio_macros::test_basic]
    async fn partial_reads() -> io::Result<()> {
        let (mut a, mut b) = MemorySocket::new_pair();

        a.write_all(b"0123456789").await?;
        a.flush().await?;

        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"0123");
        b.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"4567");

        Ok(())
    }

    #[tokio_macros::test_basic]
    async fn write_after_peer_close_fails() -> io::Result<()> {
        let (mut a, b) = MemorySocket::new_pair();
        drop(b);

        let err = a.write_all(b"nope").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        Ok(())
    }

    #[tokio_macros::test_basic]
    async fn both_directions() -> io::Result<()> {
        let (mut a, mut b) = MemorySocket::new_pair();

        a.write_all(b"ping").await?;
        a.flush().await?;

        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").await?;
        b.flush().await?;

        a.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"pong");

        Ok(())
    }
}
