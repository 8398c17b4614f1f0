//! Calendar-aligned rate limit windows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TollboothError;

/// Granularity of a rate limit window.
///
/// Windows are aligned to the calendar: a per-minute window always ends at the
/// top of a minute, a per-hour window at the top of an hour, and a per-day
/// window at midnight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LimitType {
    /// Per-minute rate limiting
    #[default]
    #[serde(rename = "per-minute")]
    PerMinute,
    /// Per-hour rate limiting
    #[serde(rename = "per-hour")]
    PerHour,
    /// Per-day rate limiting
    #[serde(rename = "per-day")]
    PerDay,
}

impl LimitType {
    /// Nominal length of this window in seconds.
    pub fn window_secs(&self) -> i64 {
        match self {
            LimitType::PerMinute => 60,
            LimitType::PerHour => 3600,
            LimitType::PerDay => 86400,
        }
    }

    /// Wire name of this limit type.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::PerMinute => "per-minute",
            LimitType::PerHour => "per-hour",
            LimitType::PerDay => "per-day",
        }
    }

    /// Start of the next UTC-aligned window after `now`.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.next_reset_with_offset(now, Utc.fix())
    }

    /// Start of the next window after `now`, aligned in the given UTC offset.
    ///
    /// With an offset of `+02:00` a per-day window ends at 22:00 UTC, which is
    /// midnight in that zone.
    pub fn next_reset_with_offset(&self, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let window = self.window_secs();
        let shift = i64::from(offset.local_minus_utc());
        let local = now.timestamp() + shift;
        let next = (local.div_euclid(window) + 1) * window - shift;

        DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitType {
    type Err = TollboothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-minute" => Ok(LimitType::PerMinute),
            "per-hour" => Ok(LimitType::PerHour),
            "per-day" => Ok(LimitType::PerDay),
            other => Err(TollboothError::validation(format!(
                "unrecognized limit_type '{}': expected per-minute, per-hour or per-day",
                other
            ))),
        }
    }
}

/// Whole seconds from `now` until `reset_at`, rounded up and never negative.
pub fn seconds_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1000) as u64
    }
}
