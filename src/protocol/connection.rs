// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Type-erased WebSocket connection split into a writer and a reader.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::TransportError;

/// How long a close handshake may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send + Sync>>;
type BoxedStream =
    Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send + Sync>>;

/// An open WebSocket connection.
///
/// The underlying transport is erased so the hub handles TCP sockets and
/// in-memory pipes alike.
pub struct Connection {
    writer: FrameWriter,
    reader: FrameReader,
}

impl Connection {
    /// Wraps an established WebSocket stream.
    pub fn new<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = stream.split();
        Self {
            writer: FrameWriter {
                sink: Box::pin(sink),
                closed: false,
            },
            reader: FrameReader {
                stream: Box::pin(stream),
            },
        }
    }

    /// Splits the connection into its write and read halves.
    #[must_use]
    pub fn into_split(self) -> (FrameWriter, FrameReader) {
        (self.writer, self.reader)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.writer.closed)
            .finish_non_exhaustive()
    }
}

/// Write half of a [`Connection`].
pub struct FrameWriter {
    sink: BoxedSink,
    closed: bool,
}

impl FrameWriter {
    /// Sends a text frame, failing if it is not written within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WriteTimeout`] when the deadline passes,
    /// [`TransportError::ConnectionClosed`] after [`FrameWriter::close`], and
    /// [`TransportError::WebSocket`] for protocol or socket failures.
    pub async fn send_text(&mut self, text: &str, deadline: Duration) -> Result<(), TransportError> {
        self.send(Message::text(text), deadline).await
    }

    /// Sends any frame with a write deadline.
    ///
    /// # Errors
    ///
    /// See [`FrameWriter::send_text`].
    pub async fn send(&mut self, message: Message, deadline: Duration) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        match tokio::time::timeout(deadline, self.sink.send(message)).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::WriteTimeout(
                u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    /// Sends a close frame and shuts the sink. Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, self.sink.close()).await {
            tracing::trace!(error = %e, "Close handshake failed");
        }
    }

    /// Returns true once [`FrameWriter::close`] has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Read half of a [`Connection`].
pub struct FrameReader {
    stream: BoxedStream,
}

impl FrameReader {
    /// Reads the next frame; `None` once the stream has ended.
    pub async fn next_message(&mut self) -> Option<Result<Message, tungstenite::Error>> {
        self.stream.next().await
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// Two connected WebSocket endpoints over an in-memory pipe: the server
    /// side (what the hub owns) and the peer side.
    pub(crate) async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, peer) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let peer = WebSocketStream::from_raw_socket(peer, Role::Client, None).await;
        (server, peer)
    }
}
