// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The pool sensor device and its controller.
//!
//! The hub talks to at most one device at a time. A [`Device`] is an id plus
//! an open connection; the [`DeviceController`] owns the current one, writes
//! config and action frames to it, answers its heartbeat pings, and hands
//! inbound frames and connection errors to the hub over [`DeviceChannels`].

mod controller;

pub use controller::{DEVICE_WRITE_TIMEOUT, DeviceChannels, DeviceController};

use crate::protocol::Connection;

/// A connected device.
#[derive(Debug)]
pub struct Device {
    id: String,
    connection: Connection,
}

impl Device {
    /// Creates a device from its id and connection.
    pub fn new(id: impl Into<String>, connection: Connection) -> Self {
        Self {
            id: id.into(),
            connection,
        }
    }

    /// Returns the device id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Consumes the device, returning its connection.
    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.connection
    }
}
