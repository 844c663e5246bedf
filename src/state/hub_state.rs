// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hub states and the device actions they imply.

use std::fmt;

/// Communication state between the device, the hub and its clients.
///
/// The numeric code of each variant is what clients receive in state frames
/// (`"0"` followed by the code), so the order of the variants is part of the
/// client protocol.
///
/// # Examples
///
/// ```
/// use swpool_hub::state::HubState;
///
/// assert_eq!(HubState::resolve(false, false, false), HubState::Active);
/// assert_eq!(HubState::resolve(true, false, false), HubState::Asleep);
/// assert_eq!(HubState::Inactive.code(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HubState {
    /// No clients and no device.
    #[default]
    Dead,
    /// Clients without a device, or a device alone inside the time window.
    Inactive,
    /// Clients and device are both connected.
    Active,
    /// A device frame has just been fanned out to the clients.
    Broadcast,
    /// Device alone, outside the transmission time window.
    Asleep,
    /// The hub has been stopped.
    Closed,
}

impl HubState {
    /// Computes the state from the hub's occupancy.
    ///
    /// `in_window` only matters when the device is connected and there are
    /// no clients. [`HubState::Broadcast`] and [`HubState::Closed`] are never
    /// produced here; the hub enters them explicitly.
    ///
    /// | clients | device | window | state    |
    /// |---------|--------|--------|----------|
    /// | 0       | 0      | -      | Dead     |
    /// | 0       | 1      | 0      | Asleep   |
    /// | 0       | 1      | 1      | Inactive |
    /// | 1       | 0      | -      | Inactive |
    /// | 1       | 1      | -      | Active   |
    #[must_use]
    pub const fn resolve(clients_empty: bool, device_closed: bool, in_window: bool) -> Self {
        match (clients_empty, device_closed) {
            (true, true) => Self::Dead,
            (false, false) => Self::Active,
            (true, false) if !in_window => Self::Asleep,
            _ => Self::Inactive,
        }
    }

    /// Returns the numeric code sent to clients.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Dead => 0,
            Self::Inactive => 1,
            Self::Active => 2,
            Self::Broadcast => 3,
            Self::Asleep => 4,
            Self::Closed => 5,
        }
    }

    /// Returns the state for a numeric code, if valid.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Dead),
            1 => Some(Self::Inactive),
            2 => Some(Self::Active),
            3 => Some(Self::Broadcast),
            4 => Some(Self::Asleep),
            5 => Some(Self::Closed),
            _ => None,
        }
    }

    /// Returns the state name used in traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dead => "Dead",
            Self::Inactive => "Inactive",
            Self::Active => "Active",
            Self::Broadcast => "Broadcast",
            Self::Asleep => "Asleep",
            Self::Closed => "Closed",
        }
    }

    /// Returns the directive the device should follow in this state.
    ///
    /// Only states reached through [`HubState::resolve`] with a device
    /// attached carry a directive.
    #[must_use]
    pub const fn action(self) -> Option<DeviceAction> {
        match self {
            Self::Active => Some(DeviceAction::Transmit),
            Self::Asleep => Some(DeviceAction::Sleep),
            Self::Inactive => Some(DeviceAction::Standby),
            Self::Dead | Self::Broadcast | Self::Closed => None,
        }
    }

    /// Returns true while device frames are forwarded to clients.
    #[must_use]
    pub const fn is_transmitting(self) -> bool {
        matches!(self, Self::Active | Self::Broadcast)
    }
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directive sent by the hub to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAction {
    /// Nothing to transmit; the device may sleep until its next wake-up.
    Sleep,
    /// Clients are listening; the device should transmit metrics.
    Transmit,
    /// Stay connected but idle until clients appear.
    Standby,
}

impl DeviceAction {
    /// Returns the numeric code written on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Sleep => 0,
            Self::Transmit => 1,
            Self::Standby => 2,
        }
    }

    /// Returns the action for a numeric code, if valid.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Sleep),
            1 => Some(Self::Transmit),
            2 => Some(Self::Standby),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sleep => "sleep",
            Self::Transmit => "transmit",
            Self::Standby => "standby",
        };
        f.write_str(name)
    }
}
