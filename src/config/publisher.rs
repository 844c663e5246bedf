// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Saving the pool configuration and handing it to the hub.

use std::sync::Arc;

use super::{ConfigStore, PoolConfig, TransmissionWindow};
use crate::error::ConfigError;
use crate::hub::Hub;

/// Writes pool configuration changes to a store, then publishes them to a
/// [`Hub`], which pushes them to the device.
#[derive(Debug, Clone)]
pub struct ConfigPublisher {
    store: Arc<dyn ConfigStore>,
    hub: Hub,
    collect_metrics_time: u32,
}

impl ConfigPublisher {
    /// Creates a publisher. `collect_metrics_time` (ms) is the service-wide
    /// sampling period added to every published configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>, hub: Hub, collect_metrics_time: u32) -> Self {
        Self {
            store,
            hub,
            collect_metrics_time,
        }
    }

    /// Returns the stored configuration.
    ///
    /// # Errors
    ///
    /// See [`ConfigStore::load`].
    pub fn load(&self) -> Result<PoolConfig, ConfigError> {
        self.store.load()
    }

    /// Validates and stores `config`, then publishes it to the hub.
    ///
    /// Nothing is stored or published if validation or the write fails.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTime`] for a malformed send window, or
    /// the store's error.
    pub async fn save(&self, config: &PoolConfig) -> Result<(), ConfigError> {
        TransmissionWindow::parse(&config.ini_send_time, &config.end_send_time)?;
        self.store.save(config)?;

        self.hub
            .config(config.device_config(self.collect_metrics_time))
            .await;
        tracing::info!(?config, "Pool configuration published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;

    use super::*;
    use crate::config::{FileConfigStore, HubConfig};
    use crate::device::Device;
    use crate::protocol::test_support::ws_pair;
    use crate::protocol::{Connection, DeviceMessage};

    const WAIT: Duration = Duration::from_secs(2);

    async fn next_message(peer: &mut WebSocketStream<DuplexStream>) -> DeviceMessage {
        loop {
            let msg = tokio::time::timeout(WAIT, peer.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("valid frame");
            if msg.is_text() {
                return DeviceMessage::decode(msg.to_text().unwrap()).expect("device frame");
            }
        }
    }

    /// A running hub with one linked device, its first two frames consumed.
    async fn hub_with_device() -> (Hub, WebSocketStream<DuplexStream>) {
        let (hub, mut traces) = Hub::new(HubConfig::default());
        tokio::spawn(async move { while traces.traces.recv().await.is_some() {} });
        let _ = hub.run();

        let (server, mut peer) = ws_pair().await;
        hub.register_device(Device::new("d1", Connection::new(server)))
            .await;
        next_message(&mut peer).await;
        next_message(&mut peer).await;
        (hub, peer)
    }

    #[tokio::test]
    async fn saved_config_reaches_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileConfigStore::new(dir.path().join("pool.json")));
        let (hub, mut peer) = hub_with_device().await;
        let publisher = ConfigPublisher::new(store.clone(), hub.clone(), 750);

        let config = PoolConfig {
            buffer: 9,
            wakeup: 12,
            ..PoolConfig::default()
        };
        publisher.save(&config).await.unwrap();

        assert_eq!(store.load().unwrap(), config);
        assert_eq!(publisher.load().unwrap(), config);
        let DeviceMessage::Config(payload) = next_message(&mut peer).await else {
            panic!("config frame expected");
        };
        assert_eq!(payload.buffer, 9);
        assert_eq!(payload.wut, 12);
        assert_eq!(payload.cmt, 750);

        hub.stop().await;
    }

    #[tokio::test]
    async fn invalid_window_is_neither_stored_nor_published() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        let (hub, mut peer) = hub_with_device().await;
        let publisher =
            ConfigPublisher::new(Arc::new(FileConfigStore::new(&path)), hub.clone(), 1000);

        let config = PoolConfig {
            end_send_time: "25:00".to_string(),
            ..PoolConfig::default()
        };
        let err = publisher.save(&config).await.unwrap_err();

        assert!(matches!(
            err,
            ConfigError::InvalidTime {
                field: "endSendTime",
                ..
            }
        ));
        assert!(!path.exists());
        assert!(
            tokio::time::timeout(Duration::from_millis(100), peer.next())
                .await
                .is_err()
        );

        hub.stop().await;
    }

    #[tokio::test]
    async fn failed_write_is_not_published() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("missing").join("pool.json"));
        let (hub, mut peer) = hub_with_device().await;
        let publisher = ConfigPublisher::new(Arc::new(store), hub.clone(), 1000);

        let err = publisher.save(&PoolConfig::default()).await.unwrap_err();

        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), peer.next())
                .await
                .is_err()
        );

        hub.stop().await;
    }
}
