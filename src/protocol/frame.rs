// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Encoding of hub-to-device frames.

use serde::{Deserialize, Serialize, Serializer};

use crate::config::{DeviceConfig, HeartbeatConfig};
use crate::error::ConfigError;
use crate::state::{DeviceAction, HubState};

/// Type byte of a device frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Configuration payload.
    Config,
    /// Action payload.
    Action,
}

impl MessageType {
    /// Returns the type byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Config => 0x00,
            Self::Action => 0x01,
        }
    }

    /// Returns the type for a leading byte, if known.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Config),
            0x01 => Some(Self::Action),
            _ => None,
        }
    }
}

/// Configuration as the device receives it.
///
/// The send window is not part of it: the hub alone decides when the device
/// sleeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    /// Wake-up period in minutes.
    pub wut: u8,
    /// Sampling period in milliseconds.
    pub cmt: u32,
    /// Buffer in seconds.
    pub buffer: u8,
    /// Calibrating ORP.
    pub cgorp: bool,
    /// Target ORP.
    #[serde(serialize_with = "compact_float")]
    pub torp: f32,
    /// Calibration ORP.
    #[serde(serialize_with = "compact_float")]
    pub corp: f32,
    /// ORP stabilization time.
    pub storp: i8,
    /// Heartbeat interval in seconds.
    pub hbi: u64,
    /// Heartbeat timeout count.
    pub hbtc: u8,
}

impl ConfigPayload {
    /// Builds the payload from the hub-side configuration.
    #[must_use]
    pub fn new(device: &DeviceConfig, heartbeat: &HeartbeatConfig) -> Self {
        Self {
            wut: device.wake_up_time,
            cmt: device.collect_metrics_time,
            buffer: device.buffer,
            cgorp: device.calibrating_orp,
            torp: device.target_orp,
            corp: device.calibration_orp,
            storp: device.stabilization_time_orp,
            hbi: heartbeat.interval.as_secs(),
            hbtc: heartbeat.timeout_count,
        }
    }
}

// Whole values are written without a fractional part (469, not 469.0).
#[allow(
    clippy::trivially_copy_pass_by_ref,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]
fn compact_float<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    let wide = f64::from(*value);
    if wide.fract() == 0.0 && wide.abs() < 1e15 {
        serializer.serialize_i64(wide as i64)
    } else {
        serializer.serialize_f32(*value)
    }
}

/// A frame sent from the hub to the device.
///
/// # Examples
///
/// ```
/// use swpool_hub::protocol::DeviceMessage;
/// use swpool_hub::state::DeviceAction;
///
/// let frame = DeviceMessage::Action(DeviceAction::Transmit).encode().unwrap();
/// assert_eq!(frame, "\u{1}1");
/// assert_eq!(
///     DeviceMessage::decode(&frame),
///     Some(DeviceMessage::Action(DeviceAction::Transmit))
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// New configuration.
    Config(ConfigPayload),
    /// New directive.
    Action(DeviceAction),
}

impl DeviceMessage {
    /// Returns the type of the frame.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Config(_) => MessageType::Config,
            Self::Action(_) => MessageType::Action,
        }
    }

    /// Encodes the message as the text of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the config payload cannot be serialized.
    pub fn encode(&self) -> Result<String, ConfigError> {
        let payload = match self {
            Self::Config(config) => serde_json::to_string(config)?,
            Self::Action(action) => action.code().to_string(),
        };
        let mut frame = String::with_capacity(payload.len() + 1);
        frame.push(char::from(self.message_type().as_byte()));
        frame.push_str(&payload);
        Ok(frame)
    }

    /// Decodes a frame produced by [`DeviceMessage::encode`].
    ///
    /// Returns `None` for unknown types or malformed payloads.
    #[must_use]
    pub fn decode(frame: &str) -> Option<Self> {
        let (&type_byte, payload) = frame.as_bytes().split_first()?;
        let payload = std::str::from_utf8(payload).ok()?;
        match MessageType::from_byte(type_byte)? {
            MessageType::Config => serde_json::from_str(payload).ok().map(Self::Config),
            MessageType::Action => payload
                .parse::<u8>()
                .ok()
                .and_then(DeviceAction::from_code)
                .map(Self::Action),
        }
    }
}

/// Builds the state frame sent to clients: `"0"` followed by the state code.
#[must_use]
pub fn state_frame(state: HubState) -> String {
    format!("0{}", state.code())
}
