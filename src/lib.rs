// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `swpool_hub` - real-time hub between a pool sensor device and its clients.
//!
//! A sensor device (temperature, pH, ORP) keeps a WebSocket open to the hub
//! and streams metric frames. Browser clients connect to the same hub and
//! receive those frames live. The hub decides when the device should
//! transmit, stand by or sleep, and tells it with action frames.
//!
//! # Features
//!
//! - **Single-owner event loop**: every registration, device frame, config
//!   change and timer tick is processed by one task, in order
//! - **State machine**: `Dead`, `Inactive`, `Active`, `Broadcast`, `Asleep`,
//!   `Closed`, derived from who is connected and the transmission window
//! - **Heartbeat**: the device pings; a missed deadline drops the connection
//! - **Client housekeeping**: expired sessions and unwritable sockets are
//!   pruned, idle clients get periodic state frames
//! - **Trace channels**: the hub reports through channels you drain, see
//!   [`TraceCollector`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use swpool_hub::{Hub, HubConfig, HubServer, TraceCollector};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (hub, traces) = Hub::new(HubConfig::default());
//!     TraceCollector::spawn(traces);
//!     let _ = hub.run();
//!
//!     let listener = TcpListener::bind("0.0.0.0:8080").await?;
//!     HubServer::new(hub, Duration::from_secs(600)).serve(listener).await;
//!     Ok(())
//! }
//! ```
//!
//! # Driving the hub directly
//!
//! Any established WebSocket stream can be handed to the hub, which is how
//! the tests run it over in-memory pipes:
//!
//! ```no_run
//! use std::time::Duration;
//! use swpool_hub::{Client, Connection, Device, Hub, HubConfig};
//! use tokio::io::DuplexStream;
//! use tokio_tungstenite::WebSocketStream;
//!
//! # async fn example(device_ws: WebSocketStream<DuplexStream>, client_ws: WebSocketStream<DuplexStream>) {
//! let (hub, _traces) = Hub::new(HubConfig::default());
//! let _ = hub.run();
//!
//! hub.register_device(Device::new("pool", Connection::new(device_ws))).await;
//!
//! let (writer, _reader) = Connection::new(client_ws).into_split();
//! hub.register_client(Client::new("browser-1", writer, Duration::from_secs(600))).await;
//! # }
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod state;
pub mod trace;

pub use client::Client;
pub use config::{DeviceConfig, HeartbeatConfig, HubConfig};
pub use device::{Device, DeviceController};
pub use error::{ConfigError, Error, QueryStage, Result, TransportError};
pub use hub::Hub;
pub use protocol::{Connection, DeviceMessage};
pub use server::HubServer;
pub use state::{DeviceAction, HubState};
pub use trace::{TraceCollector, TraceLevel, TraceRecord, TraceSink, TraceStream};
