//! ABOUTME: Core error type, tracing setup and time helpers
//! ABOUTME: Foundation crate used by all other frigem components

pub mod error;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};
pub use time::{format_clock, from_unix_seconds, now_iso8601, to_rfc3339, MonotonicTimer};

