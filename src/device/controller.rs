// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ownership of the device connection.
//!
//! A single reader task serves every connection the controller is given. It
//! either waits for a connection or reads the current one, and switching
//! between the two goes through a rendezvous: [`DeviceController::link`]
//! hands the new connection over and waits until the reader has installed
//! it. The old reader is therefore gone before the new one starts.
//!
//! The `closed` flag tells the reader whether an ending connection was shut
//! on purpose. Connections closed by the controller end silently; anything
//! else (peer close, read error, missed heartbeat) is reported on the error
//! channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use super::Device;
use crate::config::{DeviceConfig, HeartbeatConfig};
use crate::error::{Error, Result, TransportError};
use crate::protocol::{ConfigPayload, DeviceMessage, FrameReader, FrameWriter};
use crate::state::DeviceAction;

/// Write deadline for frames sent to the device.
pub const DEVICE_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

const PONG_TIMEOUT: Duration = Duration::from_secs(1);

/// Receiving ends of the device's inbound traffic.
#[derive(Debug)]
pub struct DeviceChannels {
    /// Text frames read from the device, in order.
    pub frames: mpsc::Receiver<String>,
    /// Errors that ended a device connection.
    pub errors: mpsc::Receiver<TransportError>,
}

struct Link {
    writer: FrameWriter,
    reader: FrameReader,
    ack: oneshot::Sender<()>,
}

struct Shared {
    closed: RwLock<bool>,
    writer: Mutex<Option<FrameWriter>>,
}

impl Shared {
    /// Sets the closed flag, returning its previous value.
    fn mark_closed(&self) -> bool {
        std::mem::replace(&mut *self.closed.write(), true)
    }

    async fn close_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.close().await;
        }
    }
}

/// Owner of the single device connection.
pub struct DeviceController {
    shared: Arc<Shared>,
    heartbeat: HeartbeatConfig,
    link_tx: Option<mpsc::Sender<Link>>,
    reader: Option<JoinHandle<()>>,
}

impl DeviceController {
    /// Starts a controller with no device attached.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(heartbeat: HeartbeatConfig) -> (Self, DeviceChannels) {
        let shared = Arc::new(Shared {
            closed: RwLock::new(true),
            writer: Mutex::new(None),
        });
        let (link_tx, link_rx) = mpsc::channel(1);
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);

        let read_loop = ReadLoop {
            shared: Arc::clone(&shared),
            heartbeat,
            link_rx,
            frames: frame_tx,
            errors: error_tx,
        };
        let reader = tokio::spawn(read_loop.run());

        (
            Self {
                shared,
                heartbeat,
                link_tx: Some(link_tx),
                reader: Some(reader),
            },
            DeviceChannels {
                frames: frame_rx,
                errors: error_rx,
            },
        )
    }

    /// Returns true when no device connection is usable.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.read()
    }

    /// Returns the heartbeat settings sent along with every config.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Replaces the current connection with the device's.
    ///
    /// The previous connection, if any, receives a close frame first. Returns
    /// once the reader is serving the new connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubClosed`] if the controller has been stopped.
    pub async fn link(&self, device: Device) -> Result<()> {
        let Some(link_tx) = self.link_tx.as_ref() else {
            return Err(Error::HubClosed);
        };

        self.close().await;

        let device_id = device.id().to_string();
        let (writer, reader) = device.into_connection().into_split();
        let (ack, ack_rx) = oneshot::channel();
        link_tx
            .send(Link { writer, reader, ack })
            .await
            .map_err(|_| Error::HubClosed)?;
        ack_rx.await.map_err(|_| Error::HubClosed)?;

        tracing::info!(device_id = %device_id, "Device linked");
        Ok(())
    }

    /// Sends the configuration to the device. Does nothing when closed.
    ///
    /// # Errors
    ///
    /// Returns the write error; the connection is closed in that case.
    pub async fn send_config(&self, config: &DeviceConfig) -> Result<()> {
        let payload = ConfigPayload::new(config, &self.heartbeat);
        self.send(&DeviceMessage::Config(payload))
            .await
            .map_err(|e| e.context("Sending config to device"))
    }

    /// Sends an action to the device. Does nothing when closed.
    ///
    /// # Errors
    ///
    /// Returns the write error; the connection is closed in that case.
    pub async fn send_action(&self, action: DeviceAction) -> Result<()> {
        self.send(&DeviceMessage::Action(action))
            .await
            .map_err(|e| e.context(format!("Sending action {action} to device")))
    }

    async fn send(&self, message: &DeviceMessage) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let frame = message.encode()?;

        let mut guard = self.shared.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };
        if let Err(e) = writer.send_text(&frame, DEVICE_WRITE_TIMEOUT).await {
            self.shared.mark_closed();
            if let Some(mut writer) = guard.take() {
                writer.close().await;
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Closes the current connection. Calling it again does nothing.
    pub async fn close(&self) {
        if !self.shared.mark_closed() {
            tracing::debug!("Closing device connection");
        }
        self.shared.close_writer().await;
    }

    /// Closes the connection and ends the reader task.
    ///
    /// The device channels are closed afterwards and the controller can no
    /// longer link devices.
    pub async fn stop(&mut self) {
        self.close().await;
        self.link_tx = None;
        if let Some(reader) = self.reader.take()
            && let Err(e) = reader.await
        {
            tracing::warn!(error = %e, "Device reader task failed");
        }
    }
}

impl std::fmt::Debug for DeviceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceController")
            .field("closed", &self.is_closed())
            .field("heartbeat", &self.heartbeat)
            .field("stopped", &self.link_tx.is_none())
            .finish()
    }
}

// ============================================================================
// Reader task
// ============================================================================

enum ReadEvent {
    Link(Option<Link>),
    Message(Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Expired,
}

enum Forward {
    Delivered,
    Relink(Option<Link>),
    HubGone,
}

struct ReadLoop {
    shared: Arc<Shared>,
    heartbeat: HeartbeatConfig,
    link_rx: mpsc::Receiver<Link>,
    frames: mpsc::Sender<String>,
    errors: mpsc::Sender<TransportError>,
}

impl ReadLoop {
    async fn run(mut self) {
        let mut reader: Option<FrameReader> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            let Some(active) = reader.as_mut() else {
                match self.link_rx.recv().await {
                    Some(link) => {
                        reader = Some(self.install(link, &mut deadline).await);
                        continue;
                    }
                    None => break,
                }
            };

            let event = tokio::select! {
                link = self.link_rx.recv() => ReadEvent::Link(link),
                message = active.next_message() => ReadEvent::Message(message),
                () = expire(deadline) => ReadEvent::Expired,
            };

            let outcome = match event {
                ReadEvent::Link(link) => Forward::Relink(link),
                ReadEvent::Message(Some(Ok(Message::Text(text)))) => {
                    forward(&self.frames, text.as_str().to_owned(), &mut self.link_rx).await
                }
                ReadEvent::Message(Some(Ok(Message::Ping(payload)))) => {
                    self.pong(Message::Pong(payload)).await;
                    deadline = self.next_deadline();
                    Forward::Delivered
                }
                ReadEvent::Message(Some(Ok(Message::Close(_))) | None) => {
                    reader = None;
                    self.connection_lost(TransportError::ConnectionClosed).await
                }
                ReadEvent::Message(Some(Ok(Message::Binary(_) | Message::Pong(_) | Message::Frame(_)))) => {
                    Forward::Delivered
                }
                ReadEvent::Message(Some(Err(e))) => {
                    reader = None;
                    self.connection_lost(TransportError::from(e)).await
                }
                ReadEvent::Expired => {
                    reader = None;
                    let error = TransportError::HeartbeatTimeout {
                        deadline: self.heartbeat.read_deadline().unwrap_or_default(),
                        count: self.heartbeat.timeout_count,
                    };
                    self.connection_lost(error).await
                }
            };

            match outcome {
                Forward::Delivered => {}
                Forward::Relink(Some(link)) => {
                    reader = Some(self.install(link, &mut deadline).await);
                }
                Forward::Relink(None) | Forward::HubGone => break,
            }
        }

        self.shared.mark_closed();
        self.shared.close_writer().await;
        tracing::debug!("Device reader stopped");
    }

    async fn install(&self, link: Link, deadline: &mut Option<Instant>) -> FrameReader {
        let Link { writer, reader, ack } = link;
        *self.shared.writer.lock().await = Some(writer);
        *self.shared.closed.write() = false;
        *deadline = self.next_deadline();
        let _ = ack.send(());
        reader
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heartbeat
            .read_deadline()
            .map(|deadline| Instant::now() + deadline)
    }

    async fn pong(&self, pong: Message) {
        let mut guard = self.shared.writer.lock().await;
        if let Some(writer) = guard.as_mut()
            && let Err(e) = writer.send(pong, PONG_TIMEOUT).await
        {
            tracing::debug!(error = %e, "Pong not delivered");
        }
    }

    async fn connection_lost(&mut self, error: TransportError) -> Forward {
        let manual = self.shared.mark_closed();
        self.shared.close_writer().await;
        if manual {
            tracing::debug!("Device connection ended after close");
            return Forward::Delivered;
        }
        tracing::warn!(error = %error, "Device connection lost");
        forward(&self.errors, error, &mut self.link_rx).await
    }
}

/// Sends `value` to the hub unless a new link arrives first.
///
/// The hub may be blocked in [`DeviceController::link`] and not reading, so a
/// pending send must give way to the link.
async fn forward<T>(tx: &mpsc::Sender<T>, value: T, link_rx: &mut mpsc::Receiver<Link>) -> Forward {
    tokio::select! {
        sent = tx.send(value) => match sent {
            Ok(()) => Forward::Delivered,
            Err(_) => Forward::HubGone,
        },
        link = link_rx.recv() => Forward::Relink(link),
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;

    use super::*;
    use crate::protocol::Connection;
    use crate::protocol::test_support::ws_pair;

    const WAIT: Duration = Duration::from_secs(2);

    type Peer = WebSocketStream<DuplexStream>;

    async fn device(id: &str) -> (Device, Peer) {
        let (server, peer) = ws_pair().await;
        (Device::new(id, Connection::new(server)), peer)
    }

    async fn next_text(peer: &mut Peer) -> String {
        loop {
            let msg = tokio::time::timeout(WAIT, peer.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("valid frame");
            if msg.is_text() {
                return msg.to_text().unwrap().to_string();
            }
        }
    }

    #[tokio::test]
    async fn starts_closed_and_ignores_sends() {
        let (controller, _channels) = DeviceController::spawn(HeartbeatConfig::disabled());
        assert!(controller.is_closed());
        controller.send_action(DeviceAction::Sleep).await.unwrap();
    }

    #[tokio::test]
    async fn link_opens_and_sends_frames() {
        let (controller, _channels) = DeviceController::spawn(HeartbeatConfig::disabled());
        let (d1, mut peer) = device("d1").await;

        controller.link(d1).await.unwrap();
        assert!(!controller.is_closed());

        controller.send_config(&DeviceConfig::default()).await.unwrap();
        controller.send_action(DeviceAction::Transmit).await.unwrap();

        assert!(next_text(&mut peer).await.starts_with("\u{0}{\"wut\":30"));
        assert_eq!(next_text(&mut peer).await, "\u{1}1");
    }

    #[tokio::test]
    async fn inbound_text_is_forwarded() {
        let (controller, mut channels) = DeviceController::spawn(HeartbeatConfig::disabled());
        let (d1, mut peer) = device("d1").await;
        controller.link(d1).await.unwrap();

        peer.send(Message::text("temp=27.5")).await.unwrap();
        peer.send(Message::text("ph=7.2")).await.unwrap();

        assert_eq!(channels.frames.recv().await.unwrap(), "temp=27.5");
        assert_eq!(channels.frames.recv().await.unwrap(), "ph=7.2");
    }

    #[tokio::test]
    async fn peer_close_reports_error() {
        let (controller, mut channels) = DeviceController::spawn(HeartbeatConfig::disabled());
        let (d1, mut peer) = device("d1").await;
        controller.link(d1).await.unwrap();

        peer.close(None).await.unwrap();

        let error = tokio::time::timeout(WAIT, channels.errors.recv())
            .await
            .expect("error in time")
            .expect("channel open");
        assert!(matches!(error, TransportError::ConnectionClosed));
        assert!(controller.is_closed());
    }

    #[tokio::test]
    async fn manual_close_is_silent() {
        let (controller, mut channels) = DeviceController::spawn(HeartbeatConfig::disabled());
        let (d1, mut peer) = device("d1").await;
        controller.link(d1).await.unwrap();

        controller.close().await;
        controller.close().await;
        assert!(controller.is_closed());

        // The peer sees the close frame and answers it.
        let msg = tokio::time::timeout(WAIT, peer.next()).await.unwrap().unwrap().unwrap();
        assert!(msg.is_close());

        let silent = tokio::time::timeout(Duration::from_millis(100), channels.errors.recv()).await;
        assert!(silent.is_err(), "unexpected error: {silent:?}");
    }

    #[tokio::test]
    async fn relink_closes_previous_connection() {
        let (controller, mut channels) = DeviceController::spawn(HeartbeatConfig::disabled());
        let (first, mut first_peer) = device("d1").await;
        let (second, mut second_peer) = device("d1").await;

        controller.link(first).await.unwrap();
        controller.link(second).await.unwrap();

        let msg = tokio::time::timeout(WAIT, first_peer.next()).await.unwrap().unwrap().unwrap();
        assert!(msg.is_close());

        controller.send_action(DeviceAction::Standby).await.unwrap();
        assert_eq!(next_text(&mut second_peer).await, "\u{1}2");

        let silent = tokio::time::timeout(Duration::from_millis(100), channels.errors.recv()).await;
        assert!(silent.is_err(), "unexpected error: {silent:?}");
    }

    #[tokio::test]
    async fn missing_pings_time_out() {
        let heartbeat = HeartbeatConfig::new(Duration::from_millis(40), Duration::from_millis(10), 2);
        let (controller, mut channels) = DeviceController::spawn(heartbeat);
        let (d1, _peer) = device("d1").await;
        controller.link(d1).await.unwrap();

        let error = tokio::time::timeout(WAIT, channels.errors.recv())
            .await
            .expect("error in time")
            .expect("channel open");
        assert!(error.is_heartbeat_timeout());
        assert!(error.to_string().contains("100 ms"));
        assert!(controller.is_closed());
    }

    #[tokio::test]
    async fn pings_keep_the_connection_alive() {
        let heartbeat = HeartbeatConfig::new(Duration::from_millis(150), Duration::ZERO, 1);
        let (controller, mut channels) = DeviceController::spawn(heartbeat);
        let (d1, peer) = device("d1").await;
        controller.link(d1).await.unwrap();

        let (mut sink, mut stream) = peer.split();
        let pongs = tokio::spawn(async move {
            let mut count = 0;
            while let Some(Ok(msg)) = stream.next().await {
                if matches!(msg, Message::Pong(_)) {
                    count += 1;
                }
            }
            count
        });

        // Eight pings 30 ms apart outlast a single 150 ms deadline.
        for _ in 0..8 {
            sink.send(Message::Ping(Default::default())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert!(!controller.is_closed());
        assert!(channels.errors.try_recv().is_err());

        controller.close().await;
        let count = tokio::time::timeout(WAIT, pongs).await.unwrap().unwrap();
        assert!(count >= 8, "only {count} pongs");
    }

    #[tokio::test]
    async fn stop_closes_channels() {
        let (mut controller, mut channels) = DeviceController::spawn(HeartbeatConfig::disabled());
        let (d1, _peer) = device("d1").await;
        controller.link(d1).await.unwrap();

        controller.stop().await;

        assert!(channels.frames.recv().await.is_none());
        assert!(channels.errors.recv().await.is_none());
        assert!(controller.is_closed());

        let (late, _late_peer) = device("d2").await;
        assert!(matches!(controller.link(late).await, Err(Error::HubClosed)));
    }
}
