// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Daily transmission window.

use std::fmt;

use chrono::{DateTime, FixedOffset, Local, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::ConfigError;

const TIME_FORMAT: &str = "%H:%M";

/// Where the transmission window is evaluated.
///
/// A named zone follows daylight saving changes; a fixed offset does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// An IANA time zone such as `Europe/Madrid`.
    Zone(Tz),
    /// A constant UTC offset.
    Offset(FixedOffset),
}

impl Location {
    /// Returns the wall-clock time at `now`.
    #[must_use]
    pub fn time_at(&self, now: DateTime<Utc>) -> NaiveTime {
        match self {
            Self::Zone(zone) => now.with_timezone(zone).time(),
            Self::Offset(offset) => now.with_timezone(offset).time(),
        }
    }
}

impl From<Tz> for Location {
    fn from(zone: Tz) -> Self {
        Self::Zone(zone)
    }
}

impl From<FixedOffset> for Location {
    fn from(offset: FixedOffset) -> Self {
        Self::Offset(offset)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zone(zone) => f.write_str(zone.name()),
            Self::Offset(offset) => write!(f, "{offset}"),
        }
    }
}

/// Wall-clock interval during which a device alone should keep transmitting.
///
/// Bounds are exclusive and compared at minute granularity, so a window of
/// `09:00`-`22:00` is open from `09:01` to `21:59`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveTime;
/// use swpool_hub::config::TransmissionWindow;
///
/// let window = TransmissionWindow::parse("09:00", "22:00").unwrap();
/// let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
/// assert!(window.contains(noon));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TransmissionWindow {
    /// Parses a window from two `HH:MM` strings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTime`] naming the offending bound.
    pub fn parse(ini: &str, end: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            start: parse_time("iniSendTime", ini)?,
            end: parse_time("endSendTime", end)?,
        })
    }

    /// Returns the start of the window.
    #[must_use]
    pub const fn start(&self) -> NaiveTime {
        self.start
    }

    /// Returns the end of the window.
    #[must_use]
    pub const fn end(&self) -> NaiveTime {
        self.end
    }

    /// Returns true if `time`, truncated to the minute, lies strictly inside.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        let time = truncate_to_minute(time);
        self.start < time && time < self.end
    }

    /// Evaluates the window at `now` in `location`, or local time if `None`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>, location: Option<Location>) -> bool {
        let time = match location {
            Some(location) => location.time_at(now),
            None => now.with_timezone(&Local).time(),
        };
        self.contains(time)
    }

    /// Evaluates the window at the current instant.
    #[must_use]
    pub fn is_open(&self, location: Option<Location>) -> bool {
        self.is_open_at(Utc::now(), location)
    }
}

impl fmt::Display for TransmissionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT)
        )
    }
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|e| ConfigError::InvalidTime {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}
