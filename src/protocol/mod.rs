// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire protocol and WebSocket plumbing.
//!
//! # Device frames
//!
//! Every frame the hub sends to the device is a text frame whose first byte
//! is the message type:
//!
//! | type   | payload                                                    |
//! |--------|------------------------------------------------------------|
//! | `0x00` | JSON config: `wut, cmt, buffer, cgorp, torp, corp, storp, hbi, hbtc` |
//! | `0x01` | ASCII action code: `0` sleep, `1` transmit, `2` standby    |
//!
//! Frames from the device are opaque metric payloads, forwarded verbatim to
//! clients. Liveness uses WebSocket pings sent by the device.
//!
//! # Client frames
//!
//! Clients receive the device payloads and, while nothing is being
//! broadcast, state frames made of `"0"` followed by the state code.

mod connection;
mod frame;

pub use connection::{Connection, FrameReader, FrameWriter};
pub use frame::{ConfigPayload, DeviceMessage, MessageType, state_frame};

#[cfg(test)]
pub(crate) use connection::test_support;
