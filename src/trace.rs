// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace and error output of the hub.
//!
//! The hub does not log by itself. It writes [`TraceRecord`]s and errors to
//! two bounded channels, and whoever owns the receiving [`TraceStream`]
//! decides what to do with them. [`TraceCollector`] is the stock consumer: it
//! re-emits every record through `tracing` until both channels are closed.
//!
//! Records below the configured minimum level are dropped at the source.
//!
//! # Examples
//!
//! ```
//! use swpool_hub::trace::{TraceLevel, TraceSink};
//!
//! # tokio_test_block_on(async {
//! let (sink, mut stream) = TraceSink::channel(TraceLevel::Info);
//! sink.debug("dropped").await;
//! sink.info("kept").await;
//! drop(sink);
//!
//! let record = stream.traces.recv().await.unwrap();
//! assert_eq!(record.message, "kept");
//! assert!(stream.traces.recv().await.is_none());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Error;

/// Capacity of the trace and error channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Severity of a trace record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    /// Per-frame details.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// State changes and unusual conditions.
    Warn,
    /// Failures.
    Error,
}

impl TraceLevel {
    /// Returns the level name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown trace level '{other}'")),
        }
    }
}

/// One trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Severity.
    pub level: TraceLevel,
    /// Human-readable message.
    pub message: String,
}

impl TraceRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(level: TraceLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Writing side of the trace and error channels.
///
/// Dropping every clone of the sink closes both channels.
#[derive(Debug, Clone)]
pub struct TraceSink {
    level: TraceLevel,
    traces: mpsc::Sender<TraceRecord>,
    errors: mpsc::Sender<Error>,
}

/// Reading side of the trace and error channels.
#[derive(Debug)]
pub struct TraceStream {
    /// Trace records at or above the sink's level.
    pub traces: mpsc::Receiver<TraceRecord>,
    /// Errors reported by the hub.
    pub errors: mpsc::Receiver<Error>,
}

impl TraceSink {
    /// Creates a sink with its stream.
    #[must_use]
    pub fn channel(level: TraceLevel) -> (Self, TraceStream) {
        let (trace_tx, trace_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        (
            Self {
                level,
                traces: trace_tx,
                errors: error_tx,
            },
            TraceStream {
                traces: trace_rx,
                errors: error_rx,
            },
        )
    }

    /// Returns the minimum level.
    #[must_use]
    pub const fn level(&self) -> TraceLevel {
        self.level
    }

    /// Returns true if records at `level` are emitted.
    #[must_use]
    pub fn enabled(&self, level: TraceLevel) -> bool {
        level >= self.level
    }

    /// Emits a record if its level is enabled.
    ///
    /// If the consumer has gone away the record is discarded.
    pub async fn emit(&self, level: TraceLevel, message: impl Into<String>) {
        if !self.enabled(level) {
            return;
        }
        let _ = self.traces.send(TraceRecord::new(level, message)).await;
    }

    /// Emits a debug record.
    pub async fn debug(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Debug, message).await;
    }

    /// Emits an info record.
    pub async fn info(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Info, message).await;
    }

    /// Emits a warn record.
    pub async fn warn(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Warn, message).await;
    }

    /// Reports an error.
    pub async fn error(&self, error: impl Into<Error>) {
        let _ = self.errors.send(error.into()).await;
    }
}

/// Drains a [`TraceStream`] into `tracing`.
#[derive(Debug)]
pub struct TraceCollector;

impl TraceCollector {
    /// Spawns the collector; the task ends once both channels are closed.
    pub fn spawn(stream: TraceStream) -> JoinHandle<()> {
        tokio::spawn(Self::run(stream))
    }

    /// Drains both channels until they are closed.
    pub async fn run(stream: TraceStream) {
        let TraceStream {
            mut traces,
            mut errors,
        } = stream;
        let mut traces_open = true;
        let mut errors_open = true;

        while traces_open || errors_open {
            tokio::select! {
                record = traces.recv(), if traces_open => match record {
                    Some(record) => Self::emit(&record),
                    None => traces_open = false,
                },
                error = errors.recv(), if errors_open => match error {
                    Some(error) => tracing::error!(error = %error, "Hub error"),
                    None => errors_open = false,
                },
            }
        }

        tracing::debug!("Trace collector finished");
    }

    fn emit(record: &TraceRecord) {
        match record.level {
            TraceLevel::Debug => tracing::debug!(target: "swpool_hub::hub", "{}", record.message),
            TraceLevel::Info => tracing::info!(target: "swpool_hub::hub", "{}", record.message),
            TraceLevel::Warn => tracing::warn!(target: "swpool_hub::hub", "{}", record.message),
            TraceLevel::Error => tracing::error!(target: "swpool_hub::hub", "{}", record.message),
        }
    }
}
