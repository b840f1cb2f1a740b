//! Value quality
//!
//! A quality is one byte: the top 2 bits select the class, the low 6 bits carry an
//! informational reason. Classification only ever looks at the class bits.

use errors::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mask selecting the class bits
pub const CLASS_MASK: u8 = 0xC0;
/// Mask selecting the reason bits
pub const REASON_MASK: u8 = 0x3F;

/// Quality class (top 2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityClass {
    Invalid,
    Uncertain,
    Bad,
    Good,
}

impl QualityClass {
    /// Class bits as they appear in the quality byte
    pub const fn bits(self) -> u8 {
        match self {
            Self::Invalid => 0x00,
            Self::Uncertain => 0x40,
            Self::Bad => 0x80,
            Self::Good => 0xC0,
        }
    }

    pub const fn from_bits(byte: u8) -> Self {
        match byte & CLASS_MASK {
            0x00 => Self::Invalid,
            0x40 => Self::Uncertain,
            0x80 => Self::Bad,
            _ => Self::Good,
        }
    }
}

impl fmt::Display for QualityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "INVALID",
            Self::Uncertain => "UNCERTAIN",
            Self::Bad => "BAD",
            Self::Good => "GOOD",
        };
        f.write_str(s)
    }
}

/// Reason codes carried in the low 6 bits
pub mod reason {
    // Invalid / bad: why there is no usable value
    pub const NO_DATA: u8 = 0x01;
    pub const UNREAD: u8 = 0x02;
    /// Also reported while the source is not connected
    pub const NOT_CONNECTED: u8 = 0x03;
    pub const TYPE: u8 = 0x04;
    pub const HANDLE: u8 = 0x05;
    pub const OVERFLOW: u8 = 0x06;
    pub const BAD_VALUE: u8 = 0x07;
    pub const BAD_QUALITY: u8 = 0x08;
    pub const TIMEOUT: u8 = 0x09;
    pub const COMM: u8 = 0x0A;
    pub const DEVICE: u8 = 0x0B;
    pub const CONFIG: u8 = 0x0C;
    pub const LICENSE: u8 = 0x0D;
    pub const RESOURCE: u8 = 0x0E;
    pub const INTERNAL: u8 = 0x0F;

    // Uncertain
    pub const DATA: u8 = 0x10;
    pub const LAST_VALUE: u8 = 0x11;
    pub const ESTIMATED: u8 = 0x12;
    pub const SUBSTITUTE: u8 = 0x13;
    pub const CALIBRATING: u8 = 0x14;
    pub const ENG_UNIT: u8 = 0x15;
    pub const LOW_DATA: u8 = 0x16;
    pub const HOLD: u8 = 0x17;
    pub const DERIVED: u8 = 0x18;
    pub const SIMULATED: u8 = 0x19;
    pub const MANUAL_INPUT: u8 = 0x1A;
    pub const TIME_SYNC: u8 = 0x1B;
    pub const FILTERED: u8 = 0x1C;
    pub const PREPROCESS: u8 = 0x1D;
    pub const AGGREGATED: u8 = 0x1E;
    pub const RESERVED: u8 = 0x1F;

    // Good, with limit and operating-mode detail
    pub const NORMAL: u8 = 0x20;
    pub const HIGH_LIMIT: u8 = 0x21;
    pub const LOW_LIMIT: u8 = 0x22;
    pub const HIGH_HIGH: u8 = 0x23;
    pub const LOW_LOW: u8 = 0x24;
    pub const RATE_LIMIT: u8 = 0x25;
    pub const MANUAL: u8 = 0x26;
    pub const OVERRIDE: u8 = 0x27;
    pub const BYPASS: u8 = 0x28;
    pub const MAINTENANCE: u8 = 0x29;
    pub const STARTUP: u8 = 0x2A;
    pub const SHUTDOWN: u8 = 0x2B;
    pub const WARMUP: u8 = 0x2C;
    pub const STANDBY: u8 = 0x2D;
    pub const TEST_MODE: u8 = 0x2E;
    pub const SIMULATION: u8 = 0x2F;

    // System
    pub const DB_WRITE_FAILED: u8 = 0x30;
    pub const CACHE_OVERFLOW: u8 = 0x31;
    pub const DISK_FULL: u8 = 0x32;
    pub const PERMISSION: u8 = 0x33;
    pub const PROTOCOL: u8 = 0x34;
    pub const CODEC: u8 = 0x35;
    pub const CHECKSUM: u8 = 0x36;
    pub const VERSION: u8 = 0x37;
    pub const DEPENDENCY: u8 = 0x38;
    pub const SERVICE: u8 = 0x39;
    pub const NODE_NOT_FOUND: u8 = 0x3A;
    pub const TYPE_MISMATCH: u8 = 0x3B;
    pub const ADDR_INVALID: u8 = 0x3C;
    pub const UNAUTHORIZED: u8 = 0x3D;
    pub const THROTTLED: u8 = 0x3E;
    pub const UNKNOWN: u8 = 0x3F;
}

/// 8-bit quality code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u8);

impl Quality {
    pub const INVALID: Quality = Quality(0x00);
    pub const UNCERTAIN: Quality = Quality(0x40);
    pub const BAD: Quality = Quality(0x80);
    pub const GOOD: Quality = Quality(0xC0);

    pub const NO_DATA: Quality = Quality::new(QualityClass::Invalid, reason::NO_DATA);
    pub const UNSUBSCRIBED: Quality = Quality::new(QualityClass::Invalid, reason::NOT_CONNECTED);
    /// Forced onto cached values while the source connection is down
    pub const NOT_CONNECTED: Quality = Quality::new(QualityClass::Bad, reason::NOT_CONNECTED);
    pub const LAST_VALUE: Quality = Quality::new(QualityClass::Uncertain, reason::LAST_VALUE);

    pub const fn new(class: QualityClass, reason: u8) -> Self {
        Quality(class.bits() | (reason & REASON_MASK))
    }

    #[inline]
    pub const fn class(self) -> QualityClass {
        QualityClass::from_bits(self.0)
    }

    #[inline]
    pub const fn reason(self) -> u8 {
        self.0 & REASON_MASK
    }

    #[inline]
    pub const fn is_good(self) -> bool {
        self.0 & CLASS_MASK == QualityClass::Good.bits()
    }

    /// Same reason, different class
    pub const fn with_class(self, class: QualityClass) -> Self {
        Quality::new(class, self.reason())
    }

    /// Quality placed into a value whose element failed with `code`
    pub fn for_error(code: ErrorCode) -> Self {
        let (class, why) = match code {
            ErrorCode::Success | ErrorCode::AlreadyExists => return Quality::GOOD,
            ErrorCode::Unsubscribed | ErrorCode::HasUnsubscribedItem => {
                return Quality::UNSUBSCRIBED
            },
            ErrorCode::NoValue => (QualityClass::Invalid, reason::NO_DATA),
            ErrorCode::UnsupportedType | ErrorCode::Unsupported => {
                (QualityClass::Invalid, reason::TYPE)
            },
            ErrorCode::Overflow => (QualityClass::Invalid, reason::OVERFLOW),
            ErrorCode::InvalidTag | ErrorCode::InvalidHandle => (QualityClass::Bad, reason::HANDLE),
            ErrorCode::Timeout => (QualityClass::Bad, reason::TIMEOUT),
            ErrorCode::InvalidServer | ErrorCode::Closed | ErrorCode::BadSource => {
                (QualityClass::Bad, reason::COMM)
            },
            ErrorCode::Inconsistent => (QualityClass::Bad, reason::BAD_VALUE),
            ErrorCode::BadQuality => (QualityClass::Bad, reason::BAD_QUALITY),
            ErrorCode::NoResource | ErrorCode::Malloc => (QualityClass::Bad, reason::RESOURCE),
            _ => (QualityClass::Bad, reason::INTERNAL),
        };
        Quality::new(class, why)
    }
}

impl From<u8> for Quality {
    fn from(byte: u8) -> Self {
        Quality(byte)
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#04x}", self.class(), self.reason())
    }
}
