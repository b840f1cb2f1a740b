//! Tags and values

use crate::codec;
use crate::quality::Quality;
use errors::{ErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Advisory data type of a tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DataType {
    #[default]
    Unknown = 0,
    Real = 1,
    Timestamp = 2,
    String = 3,
}

impl DataType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Real),
            2 => Some(Self::Timestamp),
            3 => Some(Self::String),
            _ => None,
        }
    }
}

/// Named, namespaced data point
///
/// Equality and hashing use `(namespace_index, name)` only; `data_type` is advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    namespace_index: u16,
    name: String,
    #[serde(default)]
    data_type: DataType,
}

impl Tag {
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
            data_type: DataType::Real,
        }
    }

    pub fn with_type(namespace_index: u16, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            namespace_index,
            name: name.into(),
            data_type,
        }
    }

    #[inline]
    pub fn namespace_index(&self) -> u16 {
        self.namespace_index
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.namespace_index == other.namespace_index && self.name == other.name
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace_index.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};s={}", self.namespace_index, self.name)
    }
}

/// Value with its packed quality and timestamp
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RealValue {
    pub value: f64,
    pub time_quality: u64,
}

impl RealValue {
    pub fn new(value: f64, quality: Quality, timestamp_ms: u64) -> Result<Self> {
        Ok(Self {
            value,
            time_quality: codec::pack(quality, timestamp_ms)?,
        })
    }

    /// Placeholder carried by a failed batch element
    pub fn failed(code: ErrorCode) -> Self {
        Self {
            value: 0.0,
            time_quality: codec::replace_quality(0, Quality::for_error(code)),
        }
    }

    #[inline]
    pub fn quality(&self) -> Quality {
        codec::unpack(self.time_quality).0
    }

    #[inline]
    pub fn timestamp_ms(&self) -> u64 {
        codec::unpack(self.time_quality).1
    }

    /// Same value and timestamp under a different quality
    #[inline]
    pub fn with_quality(self, quality: Quality) -> Self {
        Self {
            value: self.value,
            time_quality: codec::replace_quality(self.time_quality, quality),
        }
    }
}
