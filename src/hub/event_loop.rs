// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hub's event loop.

use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};

use super::HubCommand;
use crate::client::Client;
use crate::config::{DeviceConfig, HubConfig};
use crate::device::{Device, DeviceController};
use crate::error::{Error, TransportError};
use crate::protocol::state_frame;
use crate::state::HubState;
use crate::trace::{TraceLevel, TraceSink};

/// Single owner of the hub's mutable state.
pub(super) struct HubLoop {
    config: HubConfig,
    commands: mpsc::Receiver<HubCommand>,
    device_frames: mpsc::Receiver<String>,
    device_errors: mpsc::Receiver<TransportError>,
    controller: DeviceController,
    clients: Vec<Client>,
    state: HubState,
    last_message: Instant,
    notify_sign: Instant,
    checker: Pin<Box<Sleep>>,
    checker_armed: bool,
    sink: Option<TraceSink>,
}

impl HubLoop {
    pub(super) fn new(
        config: HubConfig,
        commands: mpsc::Receiver<HubCommand>,
        sink: TraceSink,
    ) -> Self {
        let (controller, channels) = DeviceController::spawn(config.heartbeat);
        let now = Instant::now();
        Self {
            checker: Box::pin(tokio::time::sleep(config.task_time)),
            checker_armed: false,
            config,
            commands,
            device_frames: channels.frames,
            device_errors: channels.errors,
            controller,
            clients: Vec::new(),
            state: HubState::Dead,
            last_message: now,
            notify_sign: now,
            sink: Some(sink),
        }
    }

    pub(super) async fn run(mut self) {
        tracing::info!(task_time = ?self.config.task_time, "Hub started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(HubCommand::Stop) | None => break,
                    Some(command) => self.handle(command).await,
                },
                Some(frame) = self.device_frames.recv() => self.on_device_frame(frame).await,
                Some(error) = self.device_errors.recv() => self.on_device_error(error).await,
                () = &mut self.checker, if self.checker_armed => self.on_tick().await,
            }
        }

        self.close().await;
        tracing::info!("Hub stopped");
    }

    async fn handle(&mut self, command: HubCommand) {
        if self.state == HubState::Closed {
            return;
        }
        match command {
            HubCommand::RegisterDevice(device) => self.register_device(device).await,
            HubCommand::RegisterClient(client) => self.register_client(client).await,
            HubCommand::UnregisterClient(id) => self.unregister_client(&id).await,
            HubCommand::Config(config) => self.update_config(config).await,
            HubCommand::State(reply) => self.reply_state(reply),
            HubCommand::Stop => {}
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    async fn register_device(&mut self, device: Device) {
        let device_id = device.id().to_string();

        if let Err(e) = self.controller.link(device).await {
            self.report(e.context(format!("Linking device {device_id}"))).await;
        }
        if let Err(e) = self.controller.send_config(&self.config.device).await {
            self.report(e).await;
        }

        // A new connection needs its directive even when the state holds.
        self.update_state(false).await;
        self.send_state_action().await;
        self.schedule_maintenance().await;

        self.info(format!("Device {device_id} registered, state is {}", self.state))
            .await;
    }

    async fn register_client(&mut self, client: Client) {
        let client_id = client.id().to_string();

        if let Some(position) = self.position(&client_id) {
            let mut previous = self.clients.remove(position);
            previous.close().await;
            self.info(format!("Client {client_id} was already registered, previous connection closed"))
                .await;
        }
        self.clients.push(client);

        self.update_state(true).await;
        self.schedule_maintenance().await;

        self.info(format!(
            "Client {client_id} registered, {} clients connected",
            self.clients.len()
        ))
        .await;
    }

    async fn unregister_client(&mut self, client_id: &str) {
        if let Some(position) = self.position(client_id) {
            let mut client = self.clients.remove(position);
            client.close().await;
        }

        self.update_state(true).await;
        self.schedule_maintenance().await;

        self.info(format!(
            "Client {client_id} unregistered, {} clients connected",
            self.clients.len()
        ))
        .await;
    }

    fn position(&self, client_id: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.id() == client_id)
    }

    // ========================================================================
    // Device traffic
    // ========================================================================

    async fn on_device_frame(&mut self, frame: String) {
        if !self.state.is_transmitting() {
            self.debug(format!("Device frame dropped while {}", self.state)).await;
            return;
        }

        let now = Instant::now();
        self.last_message = now;
        self.notify_sign = now;
        self.enter_broadcast().await;

        self.broadcast(&frame).await;
        self.debug(format!("Device frame sent to {} clients", self.clients.len()))
            .await;
    }

    async fn on_device_error(&mut self, error: TransportError) {
        self.report(Error::from(error).context("Device connection ended"))
            .await;
        self.update_state(true).await;
        self.schedule_maintenance().await;
    }

    async fn update_config(&mut self, config: DeviceConfig) {
        self.config.device = config;
        if let Err(e) = self.controller.send_config(&self.config.device).await {
            self.report(e).await;
        }
        self.update_state(true).await;

        self.info(format!("Configuration changed: {:?}", self.config.device))
            .await;
    }

    fn reply_state(&self, reply: oneshot::Sender<HubState>) {
        // The caller may have given up already.
        let _ = reply.send(self.state);
    }

    // ========================================================================
    // Client fan-out
    // ========================================================================

    /// Sends `text` to every client, then drops those whose write failed.
    ///
    /// Returns true if at least one client got the frame.
    async fn broadcast(&mut self, text: &str) -> bool {
        let mut failed = Vec::new();
        let mut errors = Vec::new();

        for (index, client) in self.clients.iter_mut().enumerate() {
            if let Err(e) = client.send_text(text).await {
                errors.push(Error::from(e).context(format!("Sending to client {}", client.id())));
                failed.push(index);
            }
        }
        for error in errors {
            self.report(error).await;
        }

        let delivered = failed.len() < self.clients.len();
        if !failed.is_empty() {
            self.drop_clients(&failed).await;
        }
        delivered
    }

    /// Closes and removes the clients at `indices` (ascending), keeping the
    /// order of the others.
    async fn drop_clients(&mut self, indices: &[usize]) {
        let (kept, removed) = partition_indices(std::mem::take(&mut self.clients), indices);
        self.clients = kept;

        for mut client in removed {
            client.close().await;
        }
        self.info(format!(
            "{} clients removed, {} clients connected",
            indices.len(),
            self.clients.len()
        ))
        .await;

        if self.clients.is_empty() {
            self.update_state(true).await;
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    async fn on_tick(&mut self) {
        self.checker_armed = false;
        let now = Instant::now();

        self.idle_broadcast(now).await;
        self.notify_state(now).await;
        self.remove_expired_clients(now).await;
        self.check_trans_window().await;

        if self.state == HubState::Dead {
            self.warn("Maintenance timer stopped: no clients and no device")
                .await;
        } else {
            self.arm_checker();
        }
    }

    async fn idle_broadcast(&mut self, now: Instant) {
        if self.state != HubState::Broadcast {
            return;
        }
        if now >= self.last_message + self.config.broadcast_idle() {
            self.update_state(true).await;
            self.info("Device went quiet, broadcast finished").await;
        }
    }

    async fn notify_state(&mut self, now: Instant) {
        if !matches!(self.state, HubState::Inactive | HubState::Active) {
            return;
        }
        if now < self.notify_sign + self.config.notification_time {
            return;
        }

        let state = self.state;
        if self.broadcast(&state_frame(state)).await {
            self.debug(format!("State {state} notified to clients")).await;
        }
        self.notify_sign = Instant::now();
    }

    async fn remove_expired_clients(&mut self, now: Instant) {
        let expired: Vec<usize> = self
            .clients
            .iter()
            .enumerate()
            .filter(|(_, client)| client.is_expired_at(now))
            .map(|(index, _)| index)
            .collect();
        if expired.is_empty() {
            return;
        }

        for &index in &expired {
            let client_id = self.clients[index].id().to_string();
            self.info(format!("Client {client_id} session expired")).await;
        }
        self.drop_clients(&expired).await;
    }

    async fn check_trans_window(&mut self) {
        if self.clients.is_empty() && !self.controller.is_closed() {
            self.update_state(true).await;
        }
    }

    /// Arms the timer when the hub comes alive.
    async fn schedule_maintenance(&mut self) {
        if self.state == HubState::Dead {
            if self.checker_armed {
                self.checker_armed = false;
                self.warn("Maintenance timer stopped: no clients and no device")
                    .await;
            }
            return;
        }
        if !self.checker_armed {
            self.arm_checker();
        }
    }

    fn arm_checker(&mut self) {
        let deadline = Instant::now() + self.config.task_time;
        self.checker.as_mut().reset(deadline);
        self.checker_armed = true;
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Recomputes the state and, on change with `notify`, sends the matching
    /// action to the device.
    async fn update_state(&mut self, notify: bool) {
        if self.resolve_state().await && notify {
            self.send_state_action().await;
        }
    }

    /// Recomputes the state. Returns true if it changed.
    async fn resolve_state(&mut self) -> bool {
        let clients_empty = self.clients.is_empty();
        let device_closed = self.controller.is_closed();
        let in_window = clients_empty && !device_closed && self.in_window().await;

        let next = HubState::resolve(clients_empty, device_closed, in_window);
        if next == self.state {
            return false;
        }

        let previous = std::mem::replace(&mut self.state, next);
        self.warn(format!(
            "State changed from {previous} to {next} (clients empty: {clients_empty}, device closed: {device_closed}, in window: {in_window})"
        ))
        .await;
        true
    }

    async fn enter_broadcast(&mut self) {
        if self.state == HubState::Broadcast {
            return;
        }
        let previous = std::mem::replace(&mut self.state, HubState::Broadcast);
        self.warn(format!("State changed from {previous} to {}", self.state))
            .await;
    }

    async fn send_state_action(&mut self) {
        let Some(action) = self.state.action() else {
            return;
        };
        if let Err(e) = self.controller.send_action(action).await {
            self.report(e).await;
            // The failed write closed the device connection.
            self.resolve_state().await;
        }
    }

    async fn in_window(&self) -> bool {
        match self.config.device.window() {
            Ok(window) => window.is_open(self.config.location),
            Err(e) => {
                self.report(Error::from(e).context("Evaluating the transmission window"))
                    .await;
                false
            }
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    async fn close(&mut self) {
        for client in &mut self.clients {
            client.close().await;
        }
        self.clients.clear();
        self.controller.stop().await;
        self.checker_armed = false;
        self.state = HubState::Closed;

        self.info("Hub closed").await;
        // Dropping the sink closes both trace channels.
        self.sink = None;
    }

    // ========================================================================
    // Traces
    // ========================================================================

    async fn emit(&self, level: TraceLevel, message: impl Into<String>) {
        if let Some(sink) = &self.sink {
            sink.emit(level, message).await;
        }
    }

    async fn debug(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Debug, message).await;
    }

    async fn info(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Info, message).await;
    }

    async fn warn(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Warn, message).await;
    }

    async fn report(&self, error: Error) {
        if let Some(sink) = &self.sink {
            sink.error(error).await;
        }
    }
}

/// Splits `items` into those not listed in `indices` and those listed, both
/// in their original order. `indices` must be ascending.
fn partition_indices<T>(items: Vec<T>, indices: &[usize]) -> (Vec<T>, Vec<T>) {
    let mut kept = Vec::with_capacity(items.len().saturating_sub(indices.len()));
    let mut removed = Vec::with_capacity(indices.len());
    let mut pending = indices.iter().peekable();

    for (index, item) in items.into_iter().enumerate() {
        if pending.next_if(|&&i| i == index).is_some() {
            removed.push(item);
        } else {
            kept.push(item);
        }
    }
    (kept, removed)
}
