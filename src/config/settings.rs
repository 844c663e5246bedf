// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Service settings file.
//!
//! The binary reads a camelCase JSON document such as:
//!
//! ```json
//! {
//!   "bindAddress": "0.0.0.0:8080",
//!   "taskTime": 8,
//!   "notificationTime": 8,
//!   "commLatencyTime": 2,
//!   "collectMetricsTime": 1000,
//!   "heartbeatInterval": 30,
//!   "heartbeatPingTime": 5,
//!   "heartbeatTimeoutCount": 2,
//!   "location": "Europe/Madrid",
//!   "sessionExpiration": 10,
//!   "logFilter": "info",
//!   "traceLevel": "info"
//! }
//! ```
//!
//! Every field is optional. Times are in seconds except `collectMetricsTime`
//! (milliseconds) and `sessionExpiration` (minutes).

use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::{DeviceConfig, HeartbeatConfig, HubConfig, Location};
use crate::error::ConfigError;
use crate::trace::TraceLevel;

/// Settings of the hub service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    /// Address the WebSocket server listens on.
    pub bind_address: String,
    /// Maintenance tick period in seconds.
    pub task_time: u64,
    /// State notification period in seconds.
    pub notification_time: u64,
    /// Device-to-hub latency allowance in seconds.
    pub comm_latency_time: u64,
    /// Device sampling period in milliseconds.
    pub collect_metrics_time: u32,
    /// Seconds between device pings.
    pub heartbeat_interval: u8,
    /// Extra seconds a ping may take to arrive.
    pub heartbeat_ping_time: u8,
    /// Intervals allowed without a ping.
    pub heartbeat_timeout_count: u8,
    /// UTC offset of the pool, e.g. `+01:00`. Local time when absent.
    pub location: Option<String>,
    /// Client session lifetime in minutes.
    pub session_expiration: u64,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Minimum level of the hub's trace records.
    pub trace_level: TraceLevel,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            task_time: 8,
            notification_time: 8,
            comm_latency_time: 2,
            collect_metrics_time: 1000,
            heartbeat_interval: 30,
            heartbeat_ping_time: 5,
            heartbeat_timeout_count: 2,
            location: None,
            session_expiration: 10,
            log_filter: "info".to_string(),
            trace_level: TraceLevel::Info,
        }
    }
}

impl ServiceSettings {
    /// Reads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Json`] if it is not valid settings JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Returns the heartbeat settings.
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig::new(
            Duration::from_secs(u64::from(self.heartbeat_interval)),
            Duration::from_secs(u64::from(self.heartbeat_ping_time)),
            self.heartbeat_timeout_count,
        )
    }

    /// Returns how long a client session stays valid.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_expiration * 60)
    }

    /// Resolves the location.
    ///
    /// An unknown zone is logged and treated as local time.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        let raw = self.location.as_deref()?;
        match parse_location(raw) {
            Ok(location) => Some(location),
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to local time for the transmission window");
                None
            }
        }
    }

    /// Builds the hub configuration around a device configuration.
    #[must_use]
    pub fn hub_config(&self, device: DeviceConfig) -> HubConfig {
        HubConfig {
            device,
            heartbeat: self.heartbeat(),
            location: self.location(),
            comm_latency: Duration::from_secs(self.comm_latency_time),
            task_time: Duration::from_secs(self.task_time),
            notification_time: Duration::from_secs(self.notification_time),
            trace_level: self.trace_level,
        }
    }
}

/// Parses an IANA zone name such as `Europe/Madrid` or `UTC`, or a fixed
/// offset such as `+01:00`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidLocation`] if the value is neither.
pub fn parse_location(value: &str) -> Result<Location, ConfigError> {
    let value = value.trim();
    if let Ok(zone) = value.parse::<Tz>() {
        return Ok(Location::Zone(zone));
    }
    if value == "Z" {
        return Ok(Location::Zone(Tz::UTC));
    }
    value
        .parse::<FixedOffset>()
        .map(Location::Offset)
        .map_err(|_| ConfigError::InvalidLocation(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.bind_address, "0.0.0.0:8080");
        assert_eq!(settings.session_ttl(), Duration::from_secs(600));
        assert_eq!(
            settings.heartbeat().read_deadline(),
            Some(Duration::from_secs(70))
        );
    }

    #[test]
    fn parses_partial_json() {
        let settings: ServiceSettings = serde_json::from_str(
            r#"{"taskTime": 3, "heartbeatTimeoutCount": 4, "traceLevel": "debug"}"#,
        )
        .unwrap();
        assert_eq!(settings.task_time, 3);
        assert_eq!(settings.heartbeat_timeout_count, 4);
        assert_eq!(settings.trace_level, TraceLevel::Debug);
        assert_eq!(settings.notification_time, 8);
    }

    #[test]
    fn hub_config_conversion() {
        let settings = ServiceSettings {
            task_time: 1,
            notification_time: 2,
            comm_latency_time: 3,
            location: Some("+02:00".to_string()),
            ..ServiceSettings::default()
        };
        let config = settings.hub_config(DeviceConfig::default());

        assert_eq!(config.task_time, Duration::from_secs(1));
        assert_eq!(config.notification_time, Duration::from_secs(2));
        assert_eq!(config.comm_latency, Duration::from_secs(3));
        assert_eq!(
            config.location,
            FixedOffset::east_opt(7200).map(Location::Offset)
        );
        assert_eq!(config.heartbeat.timeout_count, 2);
    }

    #[test]
    fn invalid_location_falls_back_to_local() {
        let settings = ServiceSettings {
            location: Some("Europe/Nowhere".to_string()),
            ..ServiceSettings::default()
        };
        assert_eq!(settings.location(), None);
    }

    #[test]
    fn named_zone_is_resolved() {
        let settings = ServiceSettings {
            location: Some("Europe/Madrid".to_string()),
            ..ServiceSettings::default()
        };
        assert_eq!(
            settings.location(),
            Some(Location::Zone(chrono_tz::Europe::Madrid))
        );
        assert_eq!(
            settings.hub_config(DeviceConfig::default()).location,
            Some(Location::Zone(chrono_tz::Europe::Madrid))
        );
    }

    #[test]
    fn parse_location_formats() {
        assert_eq!(parse_location("UTC").unwrap(), Location::Zone(Tz::UTC));
        assert_eq!(parse_location("Z").unwrap(), Location::Zone(Tz::UTC));
        assert_eq!(
            parse_location(" America/New_York ").unwrap(),
            Location::Zone(chrono_tz::America::New_York)
        );
        assert_eq!(
            parse_location("-05:30").unwrap(),
            Location::Offset(FixedOffset::west_opt(5 * 3600 + 1800).unwrap())
        );
        assert!(matches!(
            parse_location("later"),
            Err(ConfigError::InvalidLocation(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"bindAddress": "127.0.0.1:9000"}"#).unwrap();

        let settings = ServiceSettings::load(&path).unwrap();
        assert_eq!(settings.bind_address, "127.0.0.1:9000");

        let missing = ServiceSettings::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
