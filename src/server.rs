// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! WebSocket endpoint feeding the hub.
//!
//! Three paths are accepted:
//!
//! - `/device`: the pool device; the `id` request header names it.
//! - `/ws`: a browser client; the `id` header names the session, or a random
//!   id is generated. The client's session lasts the configured TTL.
//! - `/config`: pool configuration editing, when a [`ConfigPublisher`] is
//!   attached. The stored configuration is sent on connect; every text frame
//!   holding a configuration is saved, published to the hub and answered
//!   with `{"config": ...}` or `{"error": "..."}`.
//!
//! Anything else is answered with `404` before the upgrade. Authentication
//! is left to a proxy in front of the hub.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use uuid::Uuid;

use crate::client::Client;
use crate::config::{ConfigPublisher, PoolConfig};
use crate::device::Device;
use crate::error::{ConfigError, TransportError};
use crate::hub::Hub;
use crate::protocol::{Connection, FrameReader};

/// Path served to the device.
pub const DEVICE_PATH: &str = "/device";

/// Path served to browser clients.
pub const CLIENT_PATH: &str = "/ws";

/// Path served to configuration editors.
pub const CONFIG_PATH: &str = "/config";

/// Request header carrying the device or session id.
pub const ID_HEADER: &str = "id";

/// Write deadline for replies on the configuration path.
const CONFIG_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Where an upgrade request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The pool device.
    Device {
        /// Device id.
        id: String,
    },
    /// A browser client.
    Client {
        /// Session id.
        id: String,
    },
    /// A configuration editor.
    Config,
}

/// Reasons an upgrade is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Unknown path.
    NotFound,
    /// The device did not say who it is.
    MissingDeviceId,
}

impl Rejection {
    fn response(self) -> ErrorResponse {
        let (status, body) = match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "not found"),
            Self::MissingDeviceId => (StatusCode::BAD_REQUEST, "missing id header"),
        };
        let mut response = ErrorResponse::new(Some(body.to_string()));
        *response.status_mut() = status;
        response
    }
}

/// Decides where a request for `path` goes.
///
/// # Errors
///
/// Returns the [`Rejection`] to answer the request with.
pub fn route(path: &str, id: Option<&str>) -> Result<Route, Rejection> {
    let id = id.map(str::trim).filter(|id| !id.is_empty());
    match path.trim_end_matches('/') {
        DEVICE_PATH => id
            .map(|id| Route::Device { id: id.to_string() })
            .ok_or(Rejection::MissingDeviceId),
        CLIENT_PATH => Ok(Route::Client {
            id: id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
        }),
        CONFIG_PATH => Ok(Route::Config),
        _ => Err(Rejection::NotFound),
    }
}

/// Accepts WebSocket connections and hands them to a [`Hub`].
#[derive(Debug, Clone)]
pub struct HubServer {
    hub: Hub,
    client_ttl: Duration,
    sessions: Arc<Sessions>,
    config: Option<ConfigPublisher>,
}

/// Latest connection of each client id, so a replaced connection does not
/// unregister its successor when it ends.
#[derive(Debug, Default)]
struct Sessions {
    next: AtomicU64,
    live: Mutex<HashMap<String, u64>>,
}

impl Sessions {
    fn open(&self, id: &str) -> u64 {
        let generation = self.next.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(id.to_string(), generation);
        generation
    }

    /// Returns true if `generation` was the live connection for `id`.
    fn end(&self, id: &str, generation: u64) -> bool {
        let mut live = self.live.lock();
        if live.get(id) == Some(&generation) {
            live.remove(id);
            true
        } else {
            false
        }
    }
}

impl HubServer {
    /// Creates a server registering clients for `client_ttl`.
    #[must_use]
    pub fn new(hub: Hub, client_ttl: Duration) -> Self {
        Self {
            hub,
            client_ttl,
            sessions: Arc::default(),
            config: None,
        }
    }

    /// Serves [`CONFIG_PATH`] through `publisher`. Without one the path is
    /// not found.
    #[must_use]
    pub fn with_config(mut self, publisher: ConfigPublisher) -> Self {
        self.config = Some(publisher);
        self
    }

    /// Accepts connections until the listener fails permanently.
    ///
    /// Each connection is handled on its own task.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Listening for WebSocket connections");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle(stream, peer).await {
                            tracing::warn!(%peer, error = %e, "Connection rejected");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Upgrades one TCP connection and registers it with the hub.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Handshake`] if the request is refused or the
    /// upgrade fails.
    pub async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), TransportError> {
        let mut routed = None;
        let callback = |request: &Request, response: Response| {
            let id = request
                .headers()
                .get(ID_HEADER)
                .and_then(|value| value.to_str().ok());
            match route(request.uri().path(), id) {
                Ok(Route::Config) if self.config.is_none() => {
                    Err(Rejection::NotFound.response())
                }
                Ok(route) => {
                    routed = Some(route);
                    Ok(response)
                }
                Err(rejection) => Err(rejection.response()),
            }
        };

        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let Some(route) = routed else {
            return Err(TransportError::Handshake("request was not routed".to_string()));
        };

        let connection = Connection::new(ws);
        match route {
            Route::Device { id } => {
                tracing::info!(%peer, device_id = %id, "Device connected");
                self.hub.register_device(Device::new(id, connection)).await;
            }
            Route::Client { id } => {
                tracing::info!(%peer, client_id = %id, "Client connected");
                let (writer, reader) = connection.into_split();
                let generation = self.sessions.open(&id);
                self.hub
                    .register_client(Client::new(id.clone(), writer, self.client_ttl))
                    .await;
                tokio::spawn(self.clone().drain_client(id, generation, reader));
            }
            Route::Config => {
                let Some(publisher) = self.config.clone() else {
                    return Err(TransportError::Handshake("no configuration store".to_string()));
                };
                tracing::info!(%peer, "Configuration editor connected");
                tokio::spawn(serve_config(publisher, connection));
            }
        }
        Ok(())
    }

    /// Reads the client's frames until it goes away, then unregisters it.
    async fn drain_client(self, id: String, generation: u64, mut reader: FrameReader) {
        while let Some(Ok(message)) = reader.next_message().await {
            if message.is_close() {
                break;
            }
        }
        if self.sessions.end(&id, generation) {
            tracing::info!(client_id = %id, "Client disconnected");
            self.hub.unregister_client(id).await;
        }
    }
}

/// Reply sent on the configuration path.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ConfigReply<'a> {
    Config(&'a PoolConfig),
    Error(String),
}

impl ConfigReply<'_> {
    fn encode(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"error\":\"reply not encoded: {e}\"}}"))
    }
}

fn reply_to(result: &Result<PoolConfig, ConfigError>) -> String {
    match result {
        Ok(config) => ConfigReply::Config(config).encode(),
        Err(e) => ConfigReply::Error(e.to_string()).encode(),
    }
}

/// Answers one configuration editor until it goes away.
async fn serve_config(publisher: ConfigPublisher, connection: Connection) {
    let (mut writer, mut reader) = connection.into_split();

    let mut reply = reply_to(&publisher.load());
    loop {
        if let Err(e) = writer.send_text(&reply, CONFIG_WRITE_TIMEOUT).await {
            tracing::debug!(error = %e, "Configuration reply not delivered");
            break;
        }
        let text = loop {
            match reader.next_message().await {
                Some(Ok(Message::Text(text))) => break Some(text),
                Some(Ok(Message::Close(_)) | Err(_)) | None => break None,
                Some(Ok(_)) => {}
            }
        };
        let Some(text) = text else {
            break;
        };

        let saved = match serde_json::from_str::<PoolConfig>(text.as_str()) {
            Ok(config) => publisher.save(&config).await.map(|()| config),
            Err(e) => Err(ConfigError::from(e)),
        };
        if let Err(e) = &saved {
            tracing::warn!(error = %e, "Configuration update rejected");
        }
        reply = reply_to(&saved);
    }

    writer.close().await;
    tracing::info!("Configuration editor disconnected");
}
