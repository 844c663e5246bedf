// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted pool configuration.
//!
//! Users edit the pool configuration (send window, wake-up period, ORP
//! calibration) and it is stored as JSON. A [`ConfigStore`] loads it at
//! startup and saves it when it changes; the hub only sees the resulting
//! [`DeviceConfig`], published by a
//! [`ConfigPublisher`](super::ConfigPublisher) after each save.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::DeviceConfig;
use crate::error::ConfigError;

/// The pool configuration as persisted.
///
/// ```json
/// {"iniSendTime":"09:00","endSendTime":"22:00","wakeup":30,"buffer":3,
///  "calibratingOrp":false,"targetOrp":469,"calibrationOrp":-320,
///  "stabilizationTimeOrp":20}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Start of the transmission window (`HH:MM`).
    pub ini_send_time: String,
    /// End of the transmission window (`HH:MM`).
    pub end_send_time: String,
    /// Minutes between device wake-ups.
    pub wakeup: u8,
    /// Seconds of metrics buffered by the device.
    pub buffer: u8,
    /// Whether the ORP sensor is being calibrated.
    pub calibrating_orp: bool,
    /// Target ORP value in mV.
    pub target_orp: f32,
    /// Calibration ORP value in mV.
    pub calibration_orp: f32,
    /// Minutes the ORP reading needs to stabilize.
    pub stabilization_time_orp: i8,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&DeviceConfig::default())
    }
}

impl PoolConfig {
    /// Builds the device configuration, adding the service-wide sampling period.
    #[must_use]
    pub fn device_config(&self, collect_metrics_time: u32) -> DeviceConfig {
        DeviceConfig {
            wake_up_time: self.wakeup,
            collect_metrics_time,
            buffer: self.buffer,
            ini_send_time: self.ini_send_time.clone(),
            end_send_time: self.end_send_time.clone(),
            calibrating_orp: self.calibrating_orp,
            target_orp: self.target_orp,
            calibration_orp: self.calibration_orp,
            stabilization_time_orp: self.stabilization_time_orp,
        }
    }
}

impl From<&DeviceConfig> for PoolConfig {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            ini_send_time: device.ini_send_time.clone(),
            end_send_time: device.end_send_time.clone(),
            wakeup: device.wake_up_time,
            buffer: device.buffer,
            calibrating_orp: device.calibrating_orp,
            target_orp: device.target_orp,
            calibration_orp: device.calibration_orp,
            stabilization_time_orp: device.stabilization_time_orp,
        }
    }
}

/// Storage backend for the pool configuration.
pub trait ConfigStore: Send + Sync + std::fmt::Debug {
    /// Loads the stored configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data exists but cannot be read or parsed.
    fn load(&self) -> Result<PoolConfig, ConfigError>;

    /// Stores the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    fn save(&self, config: &PoolConfig) -> Result<(), ConfigError>;
}

/// A store that always returns the defaults and discards saves.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfigStore;

impl ConfigStore for DefaultConfigStore {
    fn load(&self) -> Result<PoolConfig, ConfigError> {
        Ok(PoolConfig::default())
    }

    fn save(&self, config: &PoolConfig) -> Result<(), ConfigError> {
        tracing::debug!(?config, "Pool configuration not persisted (no store configured)");
        Ok(())
    }
}

/// A store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// Creates a store reading and writing `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<PoolConfig, ConfigError> {
        tracing::info!(file = %self.path.display(), "Loading pool configuration");

        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    file = %self.path.display(),
                    "Pool configuration file not found, using defaults"
                );
                return Ok(PoolConfig::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let config: PoolConfig = serde_json::from_str(&data)?;
        tracing::info!(?config, "Pool configuration loaded");
        Ok(config)
    }

    fn save(&self, config: &PoolConfig) -> Result<(), ConfigError> {
        tracing::info!(file = %self.path.display(), ?config, "Saving pool configuration");

        let data = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, data).map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_persisted_shape() {
        let json = r#"{
            "iniSendTime": "10:30",
            "endSendTime": "20:15",
            "wakeup": 15,
            "buffer": 5,
            "calibratingOrp": true,
            "targetOrp": 650.5,
            "calibrationOrp": -300,
            "stabilizationTimeOrp": 10
        }"#;

        let config: PoolConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ini_send_time, "10:30");
        assert_eq!(config.end_send_time, "20:15");
        assert_eq!(config.wakeup, 15);
        assert_eq!(config.buffer, 5);
        assert!(config.calibrating_orp);
        assert!((config.target_orp - 650.5).abs() < f32::EPSILON);
        assert_eq!(config.stabilization_time_orp, 10);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: PoolConfig = serde_json::from_str(r#"{"buffer": 7}"#).unwrap();
        assert_eq!(config.buffer, 7);
        assert_eq!(config.ini_send_time, "09:00");
        assert_eq!(config.wakeup, 30);
    }

    #[test]
    fn device_config_carries_every_field() {
        let pool = PoolConfig {
            wakeup: 10,
            buffer: 4,
            ..PoolConfig::default()
        };
        let device = pool.device_config(500);
        assert_eq!(device.wake_up_time, 10);
        assert_eq!(device.buffer, 4);
        assert_eq!(device.collect_metrics_time, 500);
        assert_eq!(PoolConfig::from(&device), pool);
    }

    #[test]
    fn default_store_returns_defaults() {
        let store = DefaultConfigStore;
        assert_eq!(store.load().unwrap(), PoolConfig::default());
        assert!(store.save(&PoolConfig::default()).is_ok());
    }

    #[test]
    fn file_store_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("pool.json"));
        assert_eq!(store.load().unwrap(), PoolConfig::default());
    }

    #[test]
    fn file_store_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("pool.json"));

        let config = PoolConfig {
            ini_send_time: "08:00".to_string(),
            buffer: 6,
            ..PoolConfig::default()
        };
        store.save(&config).unwrap();

        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn file_store_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileConfigStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn file_store_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("missing").join("pool.json"));

        let err = store.save(&PoolConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().starts_with("cannot access"));
    }
}
