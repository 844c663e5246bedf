// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hub state machine types.
//!
//! [`HubState`] is a pure function of the hub's occupancy (are there clients,
//! is a device connected, is the clock inside the transmission window), plus
//! the explicit [`HubState::Broadcast`] pulse entered when device frames are
//! fanned out. Each settled state maps to a [`DeviceAction`] pushed to the
//! device.
//!
//! # Examples
//!
//! ```
//! use swpool_hub::state::{DeviceAction, HubState};
//!
//! let state = HubState::resolve(true, false, false);
//! assert_eq!(state, HubState::Asleep);
//! assert_eq!(state.action(), Some(DeviceAction::Sleep));
//! ```

mod hub_state;

pub use hub_state::{DeviceAction, HubState};
