//! Unified error handling for the industrial data hub
//!
//! Two layers live here:
//!
//! - [`ErrorCode`]: the process-wide numeric result taxonomy. Every batch call reports one
//!   code per element and one code for the call as a whole; the numeric values are stable
//!   because foreign callers compare against them.
//! - [`HubError`]: the error type returned by whole-call failures. Each variant maps onto
//!   exactly one [`ErrorCode`] through [`HubError::code`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ErrorCode - numeric result taxonomy
// ============================================================================

const SUCCESS_BASE: i32 = 0x0111_0000;
const GENERIC_BASE: i32 = 0x8101_0000_u32 as i32;
const DOMAIN_BASE: i32 = 0x8111_0000_u32 as i32;

/// Process-wide result code
///
/// Codes are grouped into families:
/// - success (`Success`, `AlreadyExists`)
/// - generic/system failures rooted at `0x8101_0000`
/// - hub domain failures rooted at `0x8111_0000`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum ErrorCode {
    // ======================================
    // Success family
    // ======================================
    Success = 0,
    /// Succeeded; the entity already existed (idempotent re-subscribe)
    AlreadyExists = SUCCESS_BASE + 1,

    /// Unspecified failure
    Failed = -1,

    // ======================================
    // Generic / system family
    // ======================================
    Common = GENERIC_BASE,
    Malloc = GENERIC_BASE + 1,
    Unsupported = GENERIC_BASE + 2,
    ShortLength = GENERIC_BASE + 3,
    ExceedLength = GENERIC_BASE + 4,
    Corrupt = GENERIC_BASE + 5,
    Syntax = GENERIC_BASE + 6,
    Zip = GENERIC_BASE + 7,
    Timeout = GENERIC_BASE + 8,
    Convertor = GENERIC_BASE + 9,
    Closed = GENERIC_BASE + 10,
    ToClose = GENERIC_BASE + 11,
    PrevNull = GENERIC_BASE + 12,
    Overflow = GENERIC_BASE + 13,
    Invalid = GENERIC_BASE + 14,
    Duplicated = GENERIC_BASE + 15,
    Uninit = GENERIC_BASE + 16,
    BadProcess = GENERIC_BASE + 17,
    NoResource = GENERIC_BASE + 18,
    Version = GENERIC_BASE + 19,

    // ======================================
    // Hub domain family
    // ======================================
    HubBase = DOMAIN_BASE,
    InvalidTag = DOMAIN_BASE + 1,
    InvalidHandle = DOMAIN_BASE + 2,
    InvalidServer = DOMAIN_BASE + 3,
    AddItem = DOMAIN_BASE + 4,
    NoValue = DOMAIN_BASE + 5,
    BadQuality = DOMAIN_BASE + 6,
    UnsupportedType = DOMAIN_BASE + 7,
    Unsubscribed = DOMAIN_BASE + 8,
    NotAllReadable = DOMAIN_BASE + 9,
    /// A group operation touched a mix of subscribed and unsubscribed handles
    HasUnsubscribedItem = DOMAIN_BASE + 10,
    SubscribeFailed = DOMAIN_BASE + 11,
    /// Conflicting duplicate writes in one batch
    Inconsistent = DOMAIN_BASE + 12,
    /// Source invalid or destroyed mid-call
    BadSource = DOMAIN_BASE + 13,
}

impl ErrorCode {
    const ALL: [ErrorCode; 37] = [
        Self::Success,
        Self::AlreadyExists,
        Self::Failed,
        Self::Common,
        Self::Malloc,
        Self::Unsupported,
        Self::ShortLength,
        Self::ExceedLength,
        Self::Corrupt,
        Self::Syntax,
        Self::Zip,
        Self::Timeout,
        Self::Convertor,
        Self::Closed,
        Self::ToClose,
        Self::PrevNull,
        Self::Overflow,
        Self::Invalid,
        Self::Duplicated,
        Self::Uninit,
        Self::BadProcess,
        Self::NoResource,
        Self::Version,
        Self::HubBase,
        Self::InvalidTag,
        Self::InvalidHandle,
        Self::InvalidServer,
        Self::AddItem,
        Self::NoValue,
        Self::BadQuality,
        Self::UnsupportedType,
        Self::Unsubscribed,
        Self::NotAllReadable,
        Self::HasUnsubscribedItem,
        Self::SubscribeFailed,
        Self::Inconsistent,
        Self::BadSource,
    ];

    /// Numeric wire value
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Recover a code from its numeric value
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_i32() == value)
    }

    /// True for the success family only
    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::AlreadyExists)
    }

    /// True for the hub domain family
    pub const fn is_domain(self) -> bool {
        let v = self as i32;
        v >= DOMAIN_BASE && v <= Self::BadSource as i32
    }

    /// Short symbolic name, used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Failed => "FAILED",
            Self::Common => "COMMON",
            Self::Malloc => "MALLOC",
            Self::Unsupported => "UNSUPPORTED",
            Self::ShortLength => "SHORT_LENGTH",
            Self::ExceedLength => "EXCEED_LENGTH",
            Self::Corrupt => "CORRUPT",
            Self::Syntax => "SYNTAX",
            Self::Zip => "ZIP",
            Self::Timeout => "TIMEOUT",
            Self::Convertor => "CONVERTOR",
            Self::Closed => "CLOSED",
            Self::ToClose => "TO_CLOSE",
            Self::PrevNull => "PREV_NULL",
            Self::Overflow => "OVERFLOW",
            Self::Invalid => "INVALID",
            Self::Duplicated => "DUPLICATED",
            Self::Uninit => "UNINIT",
            Self::BadProcess => "BAD_PROCESS",
            Self::NoResource => "NO_RESOURCE",
            Self::Version => "VERSION",
            Self::HubBase => "HUB_BASE",
            Self::InvalidTag => "INVALID_TAG",
            Self::InvalidHandle => "INVALID_HANDLE",
            Self::InvalidServer => "INVALID_SERVER",
            Self::AddItem => "ADD_ITEM",
            Self::NoValue => "NO_VALUE",
            Self::BadQuality => "BAD_QUALITY",
            Self::UnsupportedType => "UNSUPPORTED_TYPE",
            Self::Unsubscribed => "UNSUBSCRIBED",
            Self::NotAllReadable => "NOT_ALL_READABLE",
            Self::HasUnsubscribedItem => "HAS_UNSUBSCRIBED_ITEM",
            Self::SubscribeFailed => "SUBSCRIBE_FAILED",
            Self::Inconsistent => "INCONSISTENT",
            Self::BadSource => "BAD_SOURCE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.name(), self.as_i32())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        i64::from(code.as_i32())
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        Self::from_i32(value).ok_or_else(|| format!("unknown result code {value:#x}"))
    }
}

// ============================================================================
// HubError - whole-call failures
// ============================================================================

/// Main error type for the hub
#[derive(Debug, Error)]
pub enum HubError {
    // ======================================
    // Handle Errors
    // ======================================
    #[error("Invalid handle: {0}")]
    InvalidHandle(i64),

    #[error("Closed: {0}")]
    Closed(String),

    #[error("Bad source: {0}")]
    BadSource(String),

    // ======================================
    // Connection & Backend Errors
    // ======================================
    #[error("Source not connected: {0}")]
    NotConnected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid server: {0}")]
    InvalidServer(String),

    #[error("Backend error: {0}")]
    Backend(String),

    // ======================================
    // Input Errors
    // ======================================
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Timestamp {0} ms does not fit in 48 bits")]
    Overflow(u64),

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    // ======================================
    // Capability Errors
    // ======================================
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Unsupported source type: {0}")]
    UnsupportedType(String),

    // ======================================
    // Tag & Subscription Errors
    // ======================================
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    #[error("No value available: {0}")]
    NoValue(String),

    #[error("Unsubscribed handle: {0}")]
    Unsubscribed(i64),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    // ======================================
    // Resource & Configuration Errors
    // ======================================
    #[error("Resource exhausted: {0}")]
    NoResource(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using HubError
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// Result code reported for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidHandle(_) => ErrorCode::InvalidHandle,
            Self::Closed(_) => ErrorCode::Closed,
            Self::BadSource(_) => ErrorCode::BadSource,
            Self::NotConnected(_) | Self::InvalidServer(_) => ErrorCode::InvalidServer,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Backend(_) | Self::Io(_) => ErrorCode::Common,
            Self::Syntax(_) => ErrorCode::Syntax,
            Self::InvalidArgument(_) | Self::Config(_) => ErrorCode::Invalid,
            Self::LengthMismatch { .. } => ErrorCode::ShortLength,
            Self::Overflow(_) => ErrorCode::Overflow,
            Self::Corrupt(_) => ErrorCode::Corrupt,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::UnsupportedType(_) => ErrorCode::UnsupportedType,
            Self::InvalidTag(_) => ErrorCode::InvalidTag,
            Self::NoValue(_) => ErrorCode::NoValue,
            Self::Unsubscribed(_) => ErrorCode::Unsubscribed,
            Self::SubscribeFailed(_) => ErrorCode::SubscribeFailed,
            Self::NoResource(_) => ErrorCode::NoResource,
            Self::Other(_) => ErrorCode::Failed,
        }
    }

    /// Check if this error reflects a transport problem that reconnecting may cure
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(_) | Self::InvalidServer(_) | Self::Io(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NoResource(_)) || self.is_connection_loss()
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }

    pub fn invalid_tag(msg: impl Into<String>) -> Self {
        Self::InvalidTag(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<&HubError> for ErrorCode {
    fn from(err: &HubError) -> Self {
        err.code()
    }
}

impl From<HubError> for ErrorCode {
    fn from(err: HubError) -> Self {
        err.code()
    }
}
