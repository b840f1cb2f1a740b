//! Source kinds, flags and discovery descriptors

use errors::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SourceType {
    Ua = 0,
    Da = 1,
    Csv = 2,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Ua, SourceType::Da, SourceType::Csv];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ua),
            1 => Some(Self::Da),
            2 => Some(Self::Csv),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ua => "UA",
            Self::Da => "DA",
            Self::Csv => "CSV",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SourceType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UA" | "OPCUA" => Ok(Self::Ua),
            "DA" | "OPCDA" => Ok(Self::Da),
            "CSV" => Ok(Self::Csv),
            _ => Err(HubError::UnsupportedType(s.to_string())),
        }
    }
}

/// Source creation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFlags(u32);

impl SourceFlags {
    pub const NONE: SourceFlags = SourceFlags(0x0);
    /// Backend supports push subscriptions
    pub const SUBSCRIBE: SourceFlags = SourceFlags(0x1);
    /// Reconnect automatically after an unsolicited disconnect
    pub const RECONNECT: SourceFlags = SourceFlags(0x2);

    pub const fn from_bits(bits: u32) -> Self {
        SourceFlags(bits & 0x3)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: SourceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SourceFlags {
    type Output = SourceFlags;

    fn bitor(self, rhs: Self) -> Self {
        SourceFlags(self.0 | rhs.0)
    }
}

/// Discovery result, enough to create a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_type: SourceType,
    pub name: String,
    pub schema: String,
}

impl SourceDescriptor {
    pub fn new(source_type: SourceType, name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            source_type,
            name: name.into(),
            schema: schema.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = SourceFlags::SUBSCRIBE | SourceFlags::RECONNECT;
        assert_eq!(flags.bits(), 0x3);
        assert!(flags.contains(SourceFlags::RECONNECT));
        assert!(!SourceFlags::SUBSCRIBE.contains(SourceFlags::RECONNECT));
        assert!(SourceFlags::NONE.contains(SourceFlags::NONE));
        assert_eq!(SourceFlags::from_bits(0xFF).bits(), 0x3);
    }

    #[test]
    fn test_source_type_parse_and_display() {
        assert_eq!("ua".parse::<SourceType>().unwrap(), SourceType::Ua);
        assert_eq!(SourceType::Csv.to_string(), "CSV");
        assert_eq!(SourceType::from_u8(1), Some(SourceType::Da));
        assert!("modbus".parse::<SourceType>().is_err());
    }
}
