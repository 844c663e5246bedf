// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hub configuration.
//!
//! [`HubConfig`] is what the hub runs with: the device-visible
//! [`DeviceConfig`], the [`HeartbeatConfig`] used for liveness checks, and the
//! hub's own timings. The submodules cover where these values come from:
//!
//! - [`settings`]: the service settings file read by the binary
//! - [`store`]: the persisted pool configuration edited by users
//! - [`publisher`]: saves pool configuration changes and hands them to the hub
//! - [`window`]: the transmission time window parsed from `HH:MM` strings
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use swpool_hub::config::{HeartbeatConfig, HubConfig};
//!
//! let config = HubConfig::default()
//!     .with_task_time(Duration::from_secs(5))
//!     .with_heartbeat(HeartbeatConfig::new(Duration::from_secs(30), Duration::ZERO, 2));
//!
//! assert_eq!(config.heartbeat.read_deadline(), Some(Duration::from_secs(60)));
//! ```

pub mod publisher;
pub mod settings;
pub mod store;
pub mod window;

use std::time::Duration;

use crate::error::ConfigError;
use crate::trace::TraceLevel;

pub use publisher::ConfigPublisher;
pub use settings::ServiceSettings;
pub use store::{ConfigStore, DefaultConfigStore, FileConfigStore, PoolConfig};
pub use window::{Location, TransmissionWindow};

/// Default interval between device heartbeat pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default allowance for a late ping.
pub const DEFAULT_PING_SLACK: Duration = Duration::from_secs(5);

/// Default number of intervals without a ping before the device is dropped.
pub const DEFAULT_HEARTBEAT_TIMEOUT_COUNT: u8 = 2;

/// Default period of the hub's maintenance tick.
pub const DEFAULT_TASK_TIME: Duration = Duration::from_secs(8);

/// Default period between state frames pushed to idle clients.
pub const DEFAULT_NOTIFICATION_TIME: Duration = Duration::from_secs(8);

/// Default latency allowance between the device and the hub.
pub const DEFAULT_COMM_LATENCY: Duration = Duration::from_secs(2);

/// Device-visible configuration.
///
/// Everything except the send window is pushed to the device in config
/// frames. The window fields stay on the hub side, where they decide between
/// [`HubState::Asleep`](crate::state::HubState::Asleep) and
/// [`HubState::Inactive`](crate::state::HubState::Inactive).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Minutes between device wake-ups.
    pub wake_up_time: u8,
    /// Milliseconds between metric samples.
    pub collect_metrics_time: u32,
    /// Seconds of metrics the device buffers before sending.
    pub buffer: u8,
    /// Start of the transmission window (`HH:MM`).
    pub ini_send_time: String,
    /// End of the transmission window (`HH:MM`).
    pub end_send_time: String,
    /// Whether the ORP sensor is being calibrated.
    pub calibrating_orp: bool,
    /// Target ORP value in mV.
    pub target_orp: f32,
    /// Calibration ORP value in mV.
    pub calibration_orp: f32,
    /// Minutes the ORP reading needs to stabilize.
    pub stabilization_time_orp: i8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            wake_up_time: 30,
            collect_metrics_time: 1000,
            buffer: 3,
            ini_send_time: "09:00".to_string(),
            end_send_time: "22:00".to_string(),
            calibrating_orp: false,
            target_orp: 469.0,
            calibration_orp: -320.0,
            stabilization_time_orp: 20,
        }
    }
}

impl DeviceConfig {
    /// Sets the transmission window.
    #[must_use]
    pub fn with_window(mut self, ini: impl Into<String>, end: impl Into<String>) -> Self {
        self.ini_send_time = ini.into();
        self.end_send_time = end.into();
        self
    }

    /// Sets the buffer in seconds.
    #[must_use]
    pub fn with_buffer(mut self, buffer: u8) -> Self {
        self.buffer = buffer;
        self
    }

    /// Sets the wake-up period in minutes.
    #[must_use]
    pub fn with_wake_up_time(mut self, minutes: u8) -> Self {
        self.wake_up_time = minutes;
        self
    }

    /// Sets the sampling period in milliseconds.
    #[must_use]
    pub fn with_collect_metrics_time(mut self, millis: u32) -> Self {
        self.collect_metrics_time = millis;
        self
    }

    /// Returns the buffer as a duration.
    #[must_use]
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.buffer))
    }

    /// Parses the transmission window.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTime`] if either bound is not `HH:MM`.
    pub fn window(&self) -> Result<TransmissionWindow, ConfigError> {
        TransmissionWindow::parse(&self.ini_send_time, &self.end_send_time)
    }
}

/// Heartbeat settings for the device connection.
///
/// The device pings every `interval`. The hub drops the connection when no
/// ping arrives within `(interval + ping_slack) * timeout_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between device pings.
    pub interval: Duration,
    /// Extra time a ping may take to arrive.
    pub ping_slack: Duration,
    /// Number of intervals allowed without a ping.
    pub timeout_count: u8,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            ping_slack: DEFAULT_PING_SLACK,
            timeout_count: DEFAULT_HEARTBEAT_TIMEOUT_COUNT,
        }
    }
}

impl HeartbeatConfig {
    /// Creates heartbeat settings.
    #[must_use]
    pub const fn new(interval: Duration, ping_slack: Duration, timeout_count: u8) -> Self {
        Self {
            interval,
            ping_slack,
            timeout_count,
        }
    }

    /// Heartbeat settings that never time out.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0)
    }

    /// Returns the read deadline, or `None` when heartbeat checks are off.
    #[must_use]
    pub fn read_deadline(&self) -> Option<Duration> {
        if self.interval.is_zero() || self.timeout_count == 0 {
            return None;
        }
        Some((self.interval + self.ping_slack) * u32::from(self.timeout_count))
    }
}

/// Complete configuration of a [`Hub`](crate::Hub).
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Configuration pushed to the device.
    pub device: DeviceConfig,
    /// Device liveness settings.
    pub heartbeat: HeartbeatConfig,
    /// Where the transmission window is evaluated; `None` is local time.
    pub location: Option<Location>,
    /// Latency allowance added to the buffer before leaving `Broadcast`.
    pub comm_latency: Duration,
    /// Period of the maintenance tick.
    pub task_time: Duration,
    /// Period between state frames sent to clients.
    pub notification_time: Duration,
    /// Minimum level of trace records emitted by the hub.
    pub trace_level: TraceLevel,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            location: None,
            comm_latency: DEFAULT_COMM_LATENCY,
            task_time: DEFAULT_TASK_TIME,
            notification_time: DEFAULT_NOTIFICATION_TIME,
            trace_level: TraceLevel::Info,
        }
    }
}

impl HubConfig {
    /// Creates a configuration with default timings around a device config.
    #[must_use]
    pub fn new(device: DeviceConfig) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    /// Sets the device configuration.
    #[must_use]
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Sets the heartbeat settings.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the zone or offset used for the transmission window.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<Location>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the communication latency allowance.
    #[must_use]
    pub fn with_comm_latency(mut self, latency: Duration) -> Self {
        self.comm_latency = latency;
        self
    }

    /// Sets the maintenance tick period.
    #[must_use]
    pub fn with_task_time(mut self, task_time: Duration) -> Self {
        self.task_time = task_time;
        self
    }

    /// Sets the state notification period.
    #[must_use]
    pub fn with_notification_time(mut self, notification_time: Duration) -> Self {
        self.notification_time = notification_time;
        self
    }

    /// Sets the minimum trace level.
    #[must_use]
    pub fn with_trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    /// Time without device frames after which `Broadcast` reverts to `Active`.
    #[must_use]
    pub fn broadcast_idle(&self) -> Duration {
        self.device.buffer_duration() + self.comm_latency
    }
}
