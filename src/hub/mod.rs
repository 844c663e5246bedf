// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hub between the pool device and its clients.
//!
//! All hub state (clients, device controller, configuration, timers, current
//! [`HubState`]) is owned by one event loop task. The [`Hub`] handle only
//! sends commands to it, so the handle is cheap to clone and every method
//! can be called from any task.
//!
//! # Lifecycle
//!
//! 1. [`Hub::new`] returns the handle and the [`TraceStream`] to drain.
//! 2. [`Hub::run`] spawns the event loop.
//! 3. Devices and clients are registered as they connect.
//! 4. [`Hub::stop`] closes every connection and both trace channels.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use swpool_hub::{Hub, HubConfig, TraceCollector};
//!
//! # async fn example() -> swpool_hub::Result<()> {
//! let (hub, traces) = Hub::new(HubConfig::default());
//! TraceCollector::spawn(traces);
//! let _ = hub.run();
//!
//! let state = hub.state(Duration::from_secs(1)).await?;
//! println!("hub is {state}");
//!
//! hub.stop().await;
//! # Ok(())
//! # }
//! ```

mod event_loop;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::Client;
use crate::config::{DeviceConfig, HubConfig};
use crate::device::Device;
use crate::error::{Error, QueryStage, Result};
use crate::state::HubState;
use crate::trace::{TraceSink, TraceStream};

use event_loop::HubLoop;

/// Requests processed by the event loop.
#[derive(Debug)]
pub(crate) enum HubCommand {
    RegisterDevice(Device),
    RegisterClient(Client),
    UnregisterClient(String),
    Config(DeviceConfig),
    State(oneshot::Sender<HubState>),
    Stop,
}

/// Everything the event loop needs, held until [`Hub::run`].
#[derive(Debug)]
struct PendingLoop {
    config: HubConfig,
    commands: mpsc::Receiver<HubCommand>,
    sink: TraceSink,
}

/// Handle to a hub.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    pending: Arc<Mutex<Option<PendingLoop>>>,
}

impl Hub {
    /// Creates a hub. Nothing runs until [`Hub::run`].
    ///
    /// The returned stream must be drained (see
    /// [`TraceCollector`](crate::trace::TraceCollector)); the hub waits for
    /// room on its trace channels.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, TraceStream) {
        let (sink, stream) = TraceSink::channel(config.trace_level);
        let (commands_tx, commands_rx) = mpsc::channel(1);
        let pending = PendingLoop {
            config,
            commands: commands_rx,
            sink,
        };
        (
            Self {
                commands: commands_tx,
                pending: Arc::new(Mutex::new(Some(pending))),
            },
            stream,
        )
    }

    /// Spawns the event loop.
    ///
    /// Returns the loop's task handle, or `None` if it was already started.
    /// Must be called from within a Tokio runtime.
    #[must_use = "the handle tells whether this call started the loop"]
    pub fn run(&self) -> Option<JoinHandle<()>> {
        let PendingLoop {
            config,
            commands,
            sink,
        } = self.pending.lock().take()?;
        let event_loop = HubLoop::new(config, commands, sink);
        Some(tokio::spawn(event_loop.run()))
    }

    /// Attaches a device, replacing the current one.
    pub async fn register_device(&self, device: Device) {
        self.dispatch(HubCommand::RegisterDevice(device)).await;
    }

    /// Adds a client. A client with the same id is closed and replaced.
    pub async fn register_client(&self, client: Client) {
        self.dispatch(HubCommand::RegisterClient(client)).await;
    }

    /// Removes and closes the client with this id, if present.
    pub async fn unregister_client(&self, id: impl Into<String>) {
        self.dispatch(HubCommand::UnregisterClient(id.into())).await;
    }

    /// Publishes a new device configuration.
    ///
    /// The hub stores it and pushes it to the device.
    pub async fn config(&self, config: DeviceConfig) {
        self.dispatch(HubCommand::Config(config)).await;
    }

    /// Queries the current state.
    ///
    /// A hub that has stopped reports [`HubState::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the request is not accepted, or not
    /// answered, within `timeout`.
    pub async fn state(&self, timeout: Duration) -> Result<HubState> {
        self.state_until(Instant::now() + timeout).await
    }

    /// Queries the current state with an absolute deadline.
    ///
    /// # Errors
    ///
    /// See [`Hub::state`].
    pub async fn state_until(&self, deadline: Instant) -> Result<HubState> {
        let (reply_tx, reply_rx) = oneshot::channel();

        match tokio::time::timeout_at(deadline, self.commands.send(HubCommand::State(reply_tx))).await {
            Err(_) => {
                return Err(Error::Timeout {
                    stage: QueryStage::Request,
                });
            }
            Ok(Err(_)) => return Ok(HubState::Closed),
            Ok(Ok(())) => {}
        }

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Err(_) => Err(Error::Timeout {
                stage: QueryStage::Response,
            }),
            Ok(Err(_)) => Ok(HubState::Closed),
            Ok(Ok(state)) => Ok(state),
        }
    }

    /// Stops the hub.
    ///
    /// Returns once the stop request is queued; the loop then closes all
    /// connections and the trace channels. Further commands are ignored.
    pub async fn stop(&self) {
        self.dispatch(HubCommand::Stop).await;
    }

    async fn dispatch(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("Hub is closed, command dropped");
        }
    }
}
