//! Per-source value cache
//!
//! One slot per subscribed tag. Slots are replaced atomically, so readers always see a
//! whole `RealValue` and never block the update task. Only the source's update task
//! stores into a slot.

use crate::registry::TagKey;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use idh_model::{codec, Quality, RealValue};
use std::sync::Arc;

/// Value of a slot that has not received anything yet
pub const EMPTY_VALUE: RealValue = RealValue {
    value: 0.0,
    time_quality: codec::replace_quality(0, Quality::NO_DATA),
};

pub struct CacheSlot {
    value: ArcSwap<RealValue>,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            value: ArcSwap::from_pointee(EMPTY_VALUE),
        }
    }

    #[inline]
    pub fn load(&self) -> RealValue {
        **self.value.load()
    }

    #[inline]
    pub(crate) fn store(&self, value: RealValue) {
        self.value.store(Arc::new(value));
    }
}

#[derive(Default)]
pub struct ValueCache {
    slots: DashMap<TagKey, Arc<CacheSlot>>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `key`, created empty if missing
    pub fn slot(&self, key: TagKey) -> Arc<CacheSlot> {
        self.slots
            .entry(key)
            .or_insert_with(|| Arc::new(CacheSlot::new()))
            .clone()
    }

    pub fn get(&self, key: TagKey) -> Option<Arc<CacheSlot>> {
        self.slots.get(&key).map(|s| s.clone())
    }

    pub fn remove(&self, key: TagKey) {
        self.slots.remove(&key);
    }

    /// Store a pushed update; updates for keys without a slot are dropped
    pub(crate) fn apply(&self, key: TagKey, value: RealValue) -> bool {
        match self.slots.get(&key) {
            Some(slot) => {
                slot.store(value);
                true
            },
            None => false,
        }
    }

    /// Store an initial value unless the slot already holds something at least as recent
    pub(crate) fn prime(&self, key: TagKey, value: RealValue) -> bool {
        match self.slots.get(&key) {
            Some(slot) if slot.load().timestamp_ms() <= value.timestamp_ms() => {
                slot.store(value);
                true
            },
            _ => false,
        }
    }

    /// Force `quality` onto every slot, keeping values and timestamps
    pub(crate) fn degrade_all(&self, quality: Quality) {
        for slot in self.slots.iter() {
            let current = slot.load();
            slot.store(current.with_quality(quality));
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use idh_model::QualityClass;

    fn good(value: f64, ts: u64) -> RealValue {
        RealValue::new(value, Quality::GOOD, ts).unwrap()
    }

    #[test]
    fn test_new_slot_is_empty() {
        let cache = ValueCache::new();
        let slot = cache.slot(TagKey(0));
        assert_eq!(slot.load().quality(), Quality::NO_DATA);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_apply_visible_through_shared_slot() {
        let cache = ValueCache::new();
        let slot = cache.slot(TagKey(1));
        assert!(cache.apply(TagKey(1), good(1.5, 10)));
        assert_eq!(slot.load().value, 1.5);
        assert!(!cache.apply(TagKey(2), good(2.0, 10)));
    }

    #[test]
    fn test_prime_never_goes_back_in_time() {
        let cache = ValueCache::new();
        cache.slot(TagKey(1));
        cache.apply(TagKey(1), good(5.0, 100));
        assert!(!cache.prime(TagKey(1), good(4.0, 50)));
        assert_eq!(cache.get(TagKey(1)).unwrap().load().value, 5.0);
        assert!(cache.prime(TagKey(1), good(6.0, 100)));
        assert_eq!(cache.get(TagKey(1)).unwrap().load().value, 6.0);
    }

    #[test]
    fn test_degrade_keeps_value() {
        let cache = ValueCache::new();
        cache.slot(TagKey(3));
        cache.apply(TagKey(3), good(9.0, 7));
        cache.degrade_all(Quality::NOT_CONNECTED);

        let v = cache.get(TagKey(3)).unwrap().load();
        assert_eq!(v.value, 9.0);
        assert_eq!(v.timestamp_ms(), 7);
        assert_eq!(v.quality().class(), QualityClass::Bad);
    }

    #[test]
    fn test_remove() {
        let cache = ValueCache::new();
        cache.slot(TagKey(1));
        cache.remove(TagKey(1));
        assert!(cache.is_empty());
        assert!(cache.get(TagKey(1)).is_none());
    }
}
