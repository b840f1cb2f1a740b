//! Hub timestamps
//!
//! Values carry milliseconds since 2000-01-01T00:00:00Z. Time acquisition sits behind
//! [`TimeProvider`] so backends and tests can pin the clock.

use crate::codec::MAX_TIMESTAMP_MS;
use chrono::{DateTime, TimeZone, Utc};
use errors::{HubError, Result};

/// 2000-01-01T00:00:00Z in Unix milliseconds
pub const EPOCH_2000_UNIX_MS: i64 = 946_684_800_000;

/// Clock used when stamping values
pub trait TimeProvider: Send + Sync + 'static {
    /// Milliseconds since 2000-01-01
    fn now_ms(&self) -> u64;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_ms(&self) -> u64 {
        now_ms()
    }
}

/// Fixed clock for deterministic tests
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    timestamp_ms: u64,
}

impl FixedTimeProvider {
    pub fn new(timestamp_ms: u64) -> Self {
        Self { timestamp_ms }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

/// Current wall-clock time; clocks set before 2000 read as 0
pub fn now_ms() -> u64 {
    from_datetime(&Utc::now()).unwrap_or(0)
}

/// Convert to milliseconds since 2000-01-01
///
/// Fails with `Overflow` for instants before the epoch or beyond the 48-bit range.
pub fn from_datetime(dt: &DateTime<Utc>) -> Result<u64> {
    let delta = dt.timestamp_millis() - EPOCH_2000_UNIX_MS;
    if delta < 0 {
        return Err(HubError::InvalidArgument(format!(
            "{dt} is before 2000-01-01"
        )));
    }
    let ms = delta as u64;
    if ms > MAX_TIMESTAMP_MS {
        return Err(HubError::Overflow(ms));
    }
    Ok(ms)
}

pub fn to_datetime(ms: u64) -> Option<DateTime<Utc>> {
    let unix_ms = i64::try_from(ms).ok()?.checked_add(EPOCH_2000_UNIX_MS)?;
    Utc.timestamp_millis_opt(unix_ms).single()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_zero() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(from_datetime(&epoch).unwrap(), 0);
        assert_eq!(to_datetime(0).unwrap(), epoch);
    }

    #[test]
    fn test_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 5).unwrap();
        let ms = from_datetime(&dt).unwrap();
        assert_eq!(to_datetime(ms).unwrap(), dt);
    }

    #[test]
    fn test_before_epoch_rejected() {
        let dt = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        assert!(from_datetime(&dt).is_err());
    }

    #[test]
    fn test_now_is_after_2020() {
        let y2020 = from_datetime(&Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()).unwrap();
        assert!(SystemTimeProvider.now_ms() > y2020);
    }

    #[test]
    fn test_fixed_provider() {
        let clock = FixedTimeProvider::new(77);
        assert_eq!(clock.now_ms(), 77);
        assert_eq!(clock.now_ms(), 77);
    }
}
