//! The local-time provider behind the TIME opcode.

use chrono::{Datelike, FixedOffset, Timelike, Utc};
use serde::Serialize;

use crate::config::SharedConfig;
use crate::sync::hold;

/// Broken-down local time as the wire protocol reports it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct WallTime {
    /// Calendar year (e.g. 2026).
    pub year: i32,
    /// Month, 1-12.
    pub month: u8,
    /// Day of month, 1-31.
    pub day: u8,
    /// Hour, 0-23.
    pub hour: u8,
    /// Minute, 0-59.
    pub minute: u8,
    /// Second, 0-59.
    pub second: u8,
}

impl WallTime {
    /// The epoch origin reported when no usable time is available:
    /// 1900-01-01 00:00:00, which encodes as a zero year byte.
    pub const ORIGIN: Self = Self {
        year: 1900,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Encodes the six-byte TIME reply.
    ///
    /// The year travels as an offset from 1900 clamped to one byte, so
    /// hosts see 1900 for anything earlier and 2155 for anything later.
    #[must_use]
    pub fn reply_bytes(&self) -> [u8; 6] {
        let year = (self.year - 1900).clamp(0, 255) as u8;
        [year, self.month, self.day, self.hour, self.minute, self.second]
    }
}

/// Source of the server's local time.
///
/// The dispatcher never fails the TIME opcode; implementations return
/// [`WallTime::ORIGIN`] instead of erroring.
pub trait Clock: Send + Sync {
    /// Current local time.
    fn now(&self) -> WallTime;
}

/// System clock shifted by the configured timezone offset.
#[derive(Clone)]
pub struct SystemClock {
    config: SharedConfig,
}

impl SystemClock {
    /// Creates a clock reading `timezone_offset` from the live config.
    #[must_use]
    pub const fn new(config: SharedConfig) -> Self {
        Self { config }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> WallTime {
        let offset_hours = hold(&self.config).effective_timezone_offset();
        let Some(offset) = FixedOffset::east_opt(offset_hours * 3600) else {
            return WallTime::ORIGIN;
        };
        let local = Utc::now().with_timezone(&offset);
        WallTime {
            year: local.year(),
            month: local.month() as u8,
            day: local.day() as u8,
            hour: local.hour() as u8,
            minute: local.minute() as u8,
            second: local.second() as u8,
        }
    }
}
