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

use crate::connection_manager::ConnectionDirection;
use futures::{
    channel::mpsc,
    io::{AsyncRead, AsyncWrite},
    SinkExt,
    Stream,
    StreamExt,
};
use lattice_shutdown::{Shutdown, ShutdownSignal};
use log::*;
use std::io;
use tokio::task;
use yamux::Mode;

const LOG_TARGET: &str = "comms::multiplexing::yamux";

/// A multiplexed substream. Re-exported so that the rest of the crate does not depend on the muxer crate
/// directly.
pub type Substream = yamux::Stream;

const MAX_BUFFER_SIZE: u32 = 8 * 1024 * 1024; // 8MiB
const RECEIVE_WINDOW: u32 = 4 * 1024 * 1024; // 4MiB

/// A socket upgraded to a yamux-multiplexed connection.
pub struct Yamux {
    control: yamux::Control,
    incoming: IncomingSubstreams,
}

impl Yamux {
    /// Upgrade the given socket. The connection direction decides which side acts as the yamux server.
    pub fn upgrade_connection<TSocket>(socket: TSocket, direction: ConnectionDirection) -> io::Result<Self>
    where TSocket: AsyncRead + AsyncWrite + Send + Unpin + 'static {
        let mode = match direction {
            ConnectionDirection::Inbound => Mode::Server,
            ConnectionDirection::Outbound => Mode::Client,
        };

        let mut config = yamux::Config::default();
        // Window updates on read rather than receive so that the sender sees backpressure
        config.set_window_update_mode(yamux::WindowUpdateMode::OnRead);
        config.set_max_buffer_size(MAX_BUFFER_SIZE as usize);
        config.set_receive_window(RECEIVE_WINDOW);

        let connection = yamux::Connection::new(socket, config, mode);
        let control = connection.control();
        let incoming = Self::spawn_incoming_worker(connection);

        Ok(Self { control, incoming })
    }

    // The stream of incoming substreams must be polled for the Control api to make progress, so it is
    // driven by a dedicated task from the moment the connection is upgraded.
    fn spawn_incoming_worker<TSocket>(connection: yamux::Connection<TSocket>) -> IncomingSubstreams
    where TSocket: AsyncRead + AsyncWrite + Send + Unpin + 'static {
        let shutdown = Shutdown::new();
        let (incoming_tx, incoming_rx) = mpsc::channel(10);
        let worker = IncomingWorker {
            inner: yamux::into_stream(connection).boxed(),
            sender: incoming_tx,
            shutdown_signal: shutdown.to_signal(),
        };
        task::spawn(worker.run());
        IncomingSubstreams {
            inner: incoming_rx,
            shutdown,
        }
    }

    /// The control handle used to open outbound substreams and close the connection.
    pub fn get_yamux_control(&self) -> yamux::Control {
        self.control.clone()
    }

    /// Consume this connection, returning the stream of substreams initiated by the remote.
    pub fn incoming(self) -> IncomingSubstreams {
        self.incoming
    }
}

/// Stream of substreams opened by the remote peer. Ends when the connection closes or errors.
pub struct IncomingSubstreams {
    inner: mpsc::Receiver<Substream>,
    shutdown: Shutdown,
}

impl Stream for IncomingSubstreams {
    type Item = Substream;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut futures::task::Context<'_>,
    ) -> futures::task::Poll<Option<Self::Item>>
    {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for IncomingSubstreams {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

struct IncomingWorker<S> {
    inner: S,
    sender: mpsc::Sender<Substream>,
    shutdown_signal: ShutdownSignal,
}

impl<S> IncomingWorker<S>
where S: Stream<Item = Result<yamux::Stream, yamux::ConnectionError>> + Unpin
{
    async fn run(mut self) {
        let mut inner = self.inner.fuse();
        let mut shutdown_signal = self.shutdown_signal;
        loop {
            futures::select! {
                maybe_stream = inner.next() => {
                    match maybe_stream {
                        Some(Ok(stream)) => {
                            if self.sender.send(stream).await.is_err() {
                                debug!(
                                    target: LOG_TARGET,
                                    "Incoming substream task shutting down because the receiver was dropped"
                                );
                                break;
                            }
                        },
                        Some(Err(err)) => {
                            debug!(
                                target: LOG_TARGET,
                                "Incoming substream task shutting down because of an error: {}", err
                            );
                            break;
                        },
                        None => {
                            debug!(
                                target: LOG_TARGET,
                                "Incoming substream task shutting down because the connection closed"
                            );
                            break;
                        },
                    }
                },
                _ = shutdown_signal => {
                    debug!(
                        target: LOG_TARGET,
                        "Incoming substream task shutting down because the shutdown signal was received"
                    );
                    break;
                },
            }
        }

        self.sender.close_channel();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{connection_manager::ConnectionDirection, memsocket::MemorySocket};
    use futures::{
        future,
        io::{AsyncReadExt, AsyncWriteExt},
        StreamExt,
    };
    use std::io;
    use tokio::task;

    #[tokio_macros::test_basic]
    async fn open_substream() -> io::Result<()> {
        let (dialer, listener) = MemorySocket::new_pair();
        let msg = b"hello from the other side";

        let dialer = Yamux::upgrade_connection(dialer, ConnectionDirection::Outbound)?;
        let mut control = dialer.get_yamux_control();

        task::spawn(async move {
            let mut substream = control.open_stream().await.unwrap();
            substream.write_all(msg).await.unwrap();
            substream.flush().await.unwrap();
            substream.close().await.unwrap();
        });

        let mut incoming = Yamux::upgrade_connection(listener, ConnectionDirection::Inbound)?.incoming();
        let mut substream = incoming
            .next()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no substream"))?;

        let mut buf = Vec::new();
        let _ = future::select(substream.read_to_end(&mut buf), incoming.next()).await;
        assert_eq!(buf, msg);

        Ok(())
    }

    #[tokio_macros::test_basic]
    async fn rejects_writes_after_close() -> io::Result<()> {
        let (dialer, listener) = MemorySocket::new_pair();
        let msg = b"one and done";

        let dialer = Yamux::upgrade_connection(dialer, ConnectionDirection::Outbound)?;
        let mut control = dialer.get_yamux_control();

        task::spawn(async move {
            let mut substream = control.open_stream().await.unwrap();
            substream.write_all(msg).await.unwrap();
            substream.flush().await.unwrap();

            let mut buf = Vec::new();
            substream.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"");
        });

        let mut incoming = Yamux::upgrade_connection(listener, ConnectionDirection::Inbound)?.incoming();
        let mut substream = incoming.next().await.unwrap();

        let mut buf = vec![0; msg.len()];
        substream.read_exact(&mut buf).await?;
        assert_eq!(buf, msg);

        substream.close().await?;
        let result = substream.write_all(b"after close").await;
        assert!(result.is_err());

        Ok(())
    }
}
