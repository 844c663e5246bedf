// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Browser clients subscribed to the metric stream.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::TransportError;
use crate::protocol::FrameWriter;

/// Write deadline for frames sent to a client.
pub const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// One subscriber connection.
///
/// The hub only writes to clients; whatever the browser sends is handled by
/// the layer that owns the read half. Once registered, a client is touched
/// by the hub's event loop alone.
#[derive(Debug)]
pub struct Client {
    id: String,
    writer: FrameWriter,
    expiration: Instant,
}

impl Client {
    /// Creates a client whose session ends `ttl` from now.
    pub fn new(id: impl Into<String>, writer: FrameWriter, ttl: Duration) -> Self {
        Self::with_expiration(id, writer, Instant::now() + ttl)
    }

    /// Creates a client with an absolute expiration instant.
    pub fn with_expiration(id: impl Into<String>, writer: FrameWriter, expiration: Instant) -> Self {
        Self {
            id: id.into(),
            writer,
            expiration,
        }
    }

    /// Returns the client id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns when the session ends.
    #[must_use]
    pub const fn expiration(&self) -> Instant {
        self.expiration
    }

    /// Sends a text frame.
    ///
    /// A peer that already went away is not an error: the frame is dropped
    /// and the client will be pruned by its expiration or unregistration.
    ///
    /// # Errors
    ///
    /// Returns the transport error for any other write failure, including a
    /// write that misses [`CLIENT_WRITE_TIMEOUT`].
    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        match self.writer.send_text(text, CLIENT_WRITE_TIMEOUT).await {
            Err(e) if e.is_peer_closed() => Ok(()),
            other => other,
        }
    }

    /// Returns true if the session has ended at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expiration
    }

    /// Returns true if the session has ended.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Closes the connection. Calling it again does nothing.
    pub async fn close(&mut self) {
        self.writer.close().await;
    }
}
