// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the pool hub.
//!
//! Errors are split by origin: transport failures on a WebSocket connection,
//! configuration problems (time window, location, persisted files), and the
//! few failures that reach a caller of the hub directly (state queries).
//!
//! Most errors never reach a caller: the hub forwards them on its error
//! channel as telemetry and keeps serving.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred on a device or client connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error occurred while reading or interpreting configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A state query did not complete before its deadline.
    #[error("state query timed out while waiting for the {stage}")]
    Timeout {
        /// Which half of the query was pending.
        stage: QueryStage,
    },

    /// The hub has been stopped.
    #[error("hub is closed")]
    HubClosed,

    /// Context added to an underlying error.
    #[error("{context}: {source}")]
    Context {
        /// What was being done when the error happened.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps the error with a description of the failed operation.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// The pending half of a state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    /// The hub did not accept the request.
    Request,
    /// The hub did not reply.
    Response,
}

impl std::fmt::Display for QueryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// Errors on a WebSocket connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A write did not complete before its deadline.
    #[error("write timed out after {0} ms")]
    WriteTimeout(u64),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The device stopped sending heartbeat pings.
    #[error(
        "heartbeat timeout: no ping received within {} ms ({count} x interval plus slack)",
        .deadline.as_millis()
    )]
    HeartbeatTimeout {
        /// The read deadline that expired.
        deadline: Duration,
        /// Number of heartbeat intervals allowed.
        count: u8,
    },

    /// Socket level I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The upgrade handshake was rejected or failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl TransportError {
    /// Returns true if the error only says the peer already went away.
    ///
    /// Writes that fail this way are not treated as client failures.
    #[must_use]
    pub fn is_peer_closed(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::WebSocket(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
                )
        )
    }

    /// Returns true if the error is a read deadline expiry.
    #[must_use]
    pub fn is_heartbeat_timeout(&self) -> bool {
        matches!(self, Self::HeartbeatTimeout { .. })
    }
}

/// Errors related to configuration values and files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A `HH:MM` time could not be parsed.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidTime {
        /// The configuration field.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A location is neither a known time zone nor an offset.
    #[error("invalid location '{0}', expected a time zone like Europe/Madrid or an offset like +01:00")]
    InvalidLocation(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing a configuration file failed.
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_timeout_display() {
        let err = TransportError::HeartbeatTimeout {
            deadline: Duration::from_secs(70),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "heartbeat timeout: no ping received within 70000 ms (2 x interval plus slack)"
        );
        assert!(err.is_heartbeat_timeout());
    }

    #[test]
    fn peer_closed_classification() {
        assert!(TransportError::ConnectionClosed.is_peer_closed());
        assert!(TransportError::WebSocket(tungstenite::Error::AlreadyClosed).is_peer_closed());
        assert!(!TransportError::WriteTimeout(2000).is_peer_closed());

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(!TransportError::Io(io).is_peer_closed());
    }

    #[test]
    fn timeout_display_names_stage() {
        let err = Error::Timeout {
            stage: QueryStage::Response,
        };
        assert_eq!(
            err.to_string(),
            "state query timed out while waiting for the response"
        );
    }

    #[test]
    fn context_wraps_source() {
        let err = Error::from(TransportError::ConnectionClosed).context("Sending config to device");
        assert_eq!(
            err.to_string(),
            "Sending config to device: transport error: connection closed by peer"
        );
    }

    #[test]
    fn invalid_time_display() {
        let err = ConfigError::InvalidTime {
            field: "iniSendTime",
            value: "25:00".to_string(),
            reason: "input is out of range".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid iniSendTime '25:00': input is out of range"
        );
    }
}
