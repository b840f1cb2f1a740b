//! Time-quality word
//!
//! Layout of the packed `u64`:
//!
//! ```text
//! 63      56 55     48 47                                0
//! +---------+---------+-----------------------------------+
//! | unused  | quality |  ms since 2000-01-01T00:00:00Z    |
//! +---------+---------+-----------------------------------+
//! ```

use crate::quality::{Quality, QualityClass};
use errors::{HubError, Result};

pub const QUALITY_SHIFT: u32 = 48;
pub const TIMESTAMP_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
/// Largest timestamp that fits the word
pub const MAX_TIMESTAMP_MS: u64 = TIMESTAMP_MASK;

/// Pack quality and timestamp
///
/// Fails with `Overflow` when `timestamp_ms` needs more than 48 bits.
#[inline]
pub fn pack(quality: Quality, timestamp_ms: u64) -> Result<u64> {
    if timestamp_ms > MAX_TIMESTAMP_MS {
        return Err(HubError::Overflow(timestamp_ms));
    }
    Ok((u64::from(quality.0) << QUALITY_SHIFT) | timestamp_ms)
}

/// Split a packed word; bits above the quality byte are ignored
#[inline]
pub const fn unpack(time_quality: u64) -> (Quality, u64) {
    (
        Quality((time_quality >> QUALITY_SHIFT) as u8),
        time_quality & TIMESTAMP_MASK,
    )
}

#[inline]
pub const fn quality_class(quality: Quality) -> QualityClass {
    quality.class()
}

/// Replace the quality byte, keeping the timestamp
#[inline]
pub const fn replace_quality(time_quality: u64, quality: Quality) -> u64 {
    ((quality.0 as u64) << QUALITY_SHIFT) | (time_quality & TIMESTAMP_MASK)
}
