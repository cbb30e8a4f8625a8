// ABOUTME: Utilities for working with detection timestamps.
// ABOUTME: Converts Frigate unix seconds, formats clock strings and RFC3339.
use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use std::time::{Duration, Instant};

/// Convert fractional unix seconds (as Frigate reports them) to UTC.
///
/// Negative, NaN or out-of-range values fall back to the unix epoch.
///
/// # Examples
///
/// ```
/// use fg_core::from_unix_seconds;
/// let t = from_unix_seconds(1_700_000_000.25);
/// assert_eq!(t.timestamp(), 1_700_000_000);
/// assert_eq!(t.timestamp_subsec_millis(), 250);
/// ```
pub fn from_unix_seconds(seconds: f64) -> DateTime<Utc> {
    if !seconds.is_finite() || seconds < 0.0 {
        return DateTime::<Utc>::UNIX_EPOCH;
    }
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9).round() as u32;
    Utc.timestamp_opt(whole, nanos.min(999_999_999))
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Twelve-hour clock string, e.g. `02:30:45 PM`
///
/// # Examples
///
/// ```
/// use fg_core::{format_clock, from_unix_seconds};
/// assert_eq!(format_clock(&from_unix_seconds(1_700_000_000.0)), "10:13:20 PM");
/// ```
pub fn format_clock<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%I:%M:%S %p").to_string()
}

/// RFC3339 timestamp keeping the zone offset of the input
pub fn to_rfc3339<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current local time as an RFC3339 string
pub fn now_iso8601() -> String {
    to_rfc3339(&Local::now())
}

/// Create a monotonic duration measurer
pub struct MonotonicTimer {
    start: Instant,
}

impl MonotonicTimer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time since creation
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Reset the timer to now
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}
