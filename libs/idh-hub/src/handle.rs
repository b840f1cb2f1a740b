//! Generational handle tables
//!
//! Handles are 64-bit integers laid out as
//!
//! ```text
//! 63 62    56 55        32 31            0
//! +-+--------+------------+---------------+
//! |0|  kind  | generation |  slot index   |
//! +-+--------+------------+---------------+
//! ```
//!
//! The sign bit is never set, so no issued handle equals the `-1` sentinel. A slot's
//! generation is bumped when its entry is removed; a handle carrying an older generation
//! is reported as closed rather than silently resolving to the slot's new occupant.

use errors::{HubError, Result};
use parking_lot::RwLock;

/// Reserved "invalid handle" value
pub const INVALID_HANDLE: i64 = -1;

const INDEX_MASK: i64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;
const GENERATION_MASK: i64 = 0xFF_FFFF;
const KIND_SHIFT: u32 = 56;
const KIND_MASK: i64 = 0x7F;

/// Entity kind encoded in a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleKind {
    Instance = 1,
    Source = 2,
    Group = 3,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

pub struct HandleTable<T> {
    kind: HandleKind,
    inner: RwLock<Slots<T>>,
}

impl<T: Clone> HandleTable<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    fn encode(&self, index: u32, generation: u32) -> i64 {
        ((self.kind as i64) << KIND_SHIFT)
            | ((i64::from(generation) & GENERATION_MASK) << GENERATION_SHIFT)
            | i64::from(index)
    }

    /// Split a handle into (index, generation) if it belongs to this table's kind
    fn decode(&self, handle: i64) -> Option<(usize, u32)> {
        if handle < 0 || (handle >> KIND_SHIFT) & KIND_MASK != self.kind as i64 {
            return None;
        }
        let index = (handle & INDEX_MASK) as usize;
        let generation = ((handle >> GENERATION_SHIFT) & GENERATION_MASK) as u32;
        Some((index, generation))
    }

    pub fn insert(&self, value: T) -> i64 {
        let mut slots = self.inner.write();
        slots.live += 1;
        if let Some(index) = slots.free.pop() {
            let slot = &mut slots.entries[index as usize];
            slot.value = Some(value);
            return self.encode(index, slot.generation);
        }
        let index = slots.entries.len() as u32;
        slots.entries.push(Slot {
            generation: 1,
            value: Some(value),
        });
        self.encode(index, 1)
    }

    /// Resolve a handle
    ///
    /// Unknown handles fail with `InvalidHandle`, handles whose entry was removed with
    /// `Closed`.
    pub fn get(&self, handle: i64) -> Result<T> {
        let (index, generation) = self
            .decode(handle)
            .ok_or(HubError::InvalidHandle(handle))?;
        let slots = self.inner.read();
        let slot = slots
            .entries
            .get(index)
            .ok_or(HubError::InvalidHandle(handle))?;
        match &slot.value {
            Some(value) if slot.generation == generation => Ok(value.clone()),
            _ if generation <= slot.generation => Err(HubError::Closed(format!(
                "{:?} handle {handle:#x} was destroyed",
                self.kind
            ))),
            _ => Err(HubError::InvalidHandle(handle)),
        }
    }

    pub fn contains(&self, handle: i64) -> bool {
        self.get(handle).is_ok()
    }

    /// Remove an entry; removing twice fails with `InvalidHandle`
    pub fn remove(&self, handle: i64) -> Result<T> {
        let (index, generation) = self
            .decode(handle)
            .ok_or(HubError::InvalidHandle(handle))?;
        let mut slots = self.inner.write();
        let slot = slots
            .entries
            .get_mut(index)
            .filter(|s| s.generation == generation && s.value.is_some())
            .ok_or(HubError::InvalidHandle(handle))?;
        let value = slot.value.take();
        slot.generation = next_generation(slot.generation);
        slots.live -= 1;
        slots.free.push(index as u32);
        value.ok_or(HubError::InvalidHandle(handle))
    }

    /// Remove every entry matching `pred`, returning the removed handles and values
    pub fn remove_where(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<(i64, T)> {
        let mut slots = self.inner.write();
        let mut removed = Vec::new();
        for index in 0..slots.entries.len() {
            let slot = &mut slots.entries[index];
            let matches = slot.value.as_ref().is_some_and(&mut pred);
            if !matches {
                continue;
            }
            let handle = self.encode(index as u32, slot.generation);
            if let Some(value) = slot.value.take() {
                removed.push((handle, value));
            }
            slot.generation = next_generation(slot.generation);
            slots.free.push(index as u32);
        }
        slots.live -= removed.len();
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn next_generation(current: u32) -> u32 {
    if i64::from(current) >= GENERATION_MASK {
        1
    } else {
        current + 1
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ErrorCode;

    #[test]
    fn test_insert_get_remove() {
        let table = HandleTable::new(HandleKind::Source);
        let h = table.insert("a");
        assert!(h > 0);
        assert_ne!(h, INVALID_HANDLE);
        assert_eq!(table.get(h).unwrap(), "a");
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(h).unwrap(), "a");
        assert!(table.is_empty());
        assert_eq!(table.get(h).unwrap_err().code(), ErrorCode::Closed);
        assert_eq!(table.remove(h).unwrap_err().code(), ErrorCode::InvalidHandle);
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let table = HandleTable::new(HandleKind::Group);
        let first = table.insert(1);
        table.remove(first).unwrap();
        let second = table.insert(2);

        assert_eq!(first & INDEX_MASK, second & INDEX_MASK);
        assert_ne!(first, second);
        assert_eq!(table.get(first).unwrap_err().code(), ErrorCode::Closed);
        assert_eq!(table.get(second).unwrap(), 2);
    }

    #[test]
    fn test_foreign_and_sentinel_handles() {
        let sources = HandleTable::new(HandleKind::Source);
        let groups: HandleTable<u8> = HandleTable::new(HandleKind::Group);
        let h = sources.insert(7u8);

        assert_eq!(
            groups.get(h).unwrap_err().code(),
            ErrorCode::InvalidHandle
        );
        assert_eq!(
            sources.get(INVALID_HANDLE).unwrap_err().code(),
            ErrorCode::InvalidHandle
        );
        assert_eq!(
            sources.get(h + 1000).unwrap_err().code(),
            ErrorCode::InvalidHandle
        );
    }

    #[test]
    fn test_remove_where() {
        let table = HandleTable::new(HandleKind::Source);
        let a = table.insert(1);
        let b = table.insert(2);
        let c = table.insert(3);

        let removed = table.remove_where(|v| v % 2 == 1);
        let handles: Vec<i64> = removed.iter().map(|(h, _)| *h).collect();
        assert_eq!(handles, vec![a, c]);
        assert_eq!(table.len(), 1);
        assert!(table.contains(b));
        assert!(!table.contains(a));
    }

    #[test]
    fn test_generation_wraps_without_touching_sign() {
        assert_eq!(next_generation(GENERATION_MASK as u32), 1);
        let table: HandleTable<u8> = HandleTable::new(HandleKind::Instance);
        let h = table.encode(u32::MAX, GENERATION_MASK as u32);
        assert!(h > 0);
    }
}
