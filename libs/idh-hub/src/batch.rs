//! Batch call results
//!
//! Every batch call yields one element per input in input order, plus an overall code.
//! Failed elements never abort their siblings.

use errors::ErrorCode;
use idh_model::RealValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-tag subscription handle, unique within its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagHandle(pub i64);

impl TagHandle {
    pub const INVALID: TagHandle = TagHandle(crate::handle::INVALID_HANDLE);

    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for TagHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Successful subscribe element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub handle: TagHandle,
    /// `Success` for a new subscription, `AlreadyExists` for an existing one
    pub status: ErrorCode,
}

pub type Element<T> = std::result::Result<T, ErrorCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every element succeeded (also for empty batches)
    Complete,
    Partial,
    /// Non-empty batch with no successful element
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<T> {
    pub overall: ErrorCode,
    pub elements: Vec<Element<T>>,
}

impl<T> BatchResult<T> {
    pub fn new(overall: ErrorCode, elements: Vec<Element<T>>) -> Self {
        Self { overall, elements }
    }

    pub fn empty() -> Self {
        Self {
            overall: ErrorCode::Success,
            elements: Vec::new(),
        }
    }

    /// Build with `partial_code` as overall code when some element failed
    ///
    /// With `fail_only_if_none` set, a partial failure still reports `Success` and only a
    /// batch where nothing succeeded reports `partial_code`.
    pub fn from_elements(
        elements: Vec<Element<T>>,
        partial_code: ErrorCode,
        fail_only_if_none: bool,
    ) -> Self {
        let mut result = Self {
            overall: ErrorCode::Success,
            elements,
        };
        result.overall = match result.status() {
            BatchStatus::Complete => ErrorCode::Success,
            BatchStatus::Partial if fail_only_if_none => ErrorCode::Success,
            BatchStatus::Partial | BatchStatus::Failed => partial_code,
        };
        result
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.elements.iter().filter(|e| e.is_ok()).count()
    }

    pub fn status(&self) -> BatchStatus {
        let ok = self.succeeded();
        if ok == self.elements.len() {
            BatchStatus::Complete
        } else if ok == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    }

    pub fn is_success(&self) -> bool {
        self.overall.is_success()
    }

    pub fn get(&self, index: usize) -> Option<&Element<T>> {
        self.elements.get(index)
    }

    /// Per-element result code
    pub fn codes(&self) -> Vec<ErrorCode> {
        self.elements
            .iter()
            .map(|e| match e {
                Ok(_) => ErrorCode::Success,
                Err(code) => *code,
            })
            .collect()
    }
}

impl BatchResult<Subscription> {
    /// One `i64` per element: the handle, or the error code widened to 64 bits
    pub fn handles_or_codes(&self) -> Vec<i64> {
        self.elements
            .iter()
            .map(|e| match e {
                Ok(sub) => sub.handle.0,
                Err(code) => i64::from(*code),
            })
            .collect()
    }

    /// Handles in input order, `TagHandle::INVALID` for failed elements
    pub fn handles(&self) -> Vec<TagHandle> {
        self.elements
            .iter()
            .map(|e| e.as_ref().map_or(TagHandle::INVALID, |s| s.handle))
            .collect()
    }

    /// Per-element status, distinguishing `AlreadyExists` from `Success`
    pub fn statuses(&self) -> Vec<ErrorCode> {
        self.elements
            .iter()
            .map(|e| match e {
                Ok(sub) => sub.status,
                Err(code) => *code,
            })
            .collect()
    }
}

impl BatchResult<RealValue> {
    /// One value per element; failed elements carry the quality for their error code
    pub fn values(&self) -> Vec<RealValue> {
        self.elements
            .iter()
            .map(|e| match e {
                Ok(v) => *v,
                Err(code) => RealValue::failed(*code),
            })
            .collect()
    }
}
