//! Capacity-bounded results for browse and discovery

use serde::{Deserialize, Serialize};

/// Items returned to a caller with a fixed-size buffer
///
/// `available` is how many existed; `items` holds at most the requested capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing<T> {
    pub available: usize,
    pub items: Vec<T>,
}

impl<T> Listing<T> {
    /// Keep the first `capacity` items; capacity 0 is a pure count query
    pub fn truncated(mut all: Vec<T>, capacity: usize) -> Self {
        let available = all.len();
        all.truncate(capacity);
        Self {
            available,
            items: all,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.items.len() < self.available
    }

    pub fn returned(&self) -> usize {
        self.items.len()
    }
}
