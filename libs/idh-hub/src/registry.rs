//! Tag registry
//!
//! Maps `(namespace_index, tag_name)` to a stable per-source [`TagKey`]. Keys are never
//! reused for the lifetime of the source, so a key can travel through the update feed
//! without any lookup by name.

use ahash::AHashMap;
use idh_model::Tag;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagKey(pub u32);

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    by_tag: AHashMap<Tag, TagKey>,
    by_key: Vec<Tag>,
}

#[derive(Default)]
pub struct TagRegistry {
    inner: RwLock<Inner>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `tag`, allocating one on first sight
    pub fn resolve(&self, tag: &Tag) -> TagKey {
        if let Some(key) = self.inner.read().by_tag.get(tag) {
            return *key;
        }
        let mut inner = self.inner.write();
        if let Some(key) = inner.by_tag.get(tag) {
            return *key;
        }
        let key = TagKey(inner.by_key.len() as u32);
        inner.by_key.push(tag.clone());
        inner.by_tag.insert(tag.clone(), key);
        key
    }

    pub fn lookup(&self, tag: &Tag) -> Option<TagKey> {
        self.inner.read().by_tag.get(tag).copied()
    }

    pub fn tag(&self, key: TagKey) -> Option<Tag> {
        self.inner.read().by_key.get(key.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idh_model::DataType;

    #[test]
    fn test_identical_tags_share_key() {
        let registry = TagRegistry::new();
        let a = registry.resolve(&Tag::new(2, "MV1"));
        let b = registry.resolve(&Tag::with_type(2, "MV1", DataType::String));
        let c = registry.resolve(&Tag::new(3, "MV1"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_key_to_tag() {
        let registry = TagRegistry::new();
        let tag = Tag::new(1, "CV2");
        let key = registry.resolve(&tag);
        assert_eq!(registry.tag(key), Some(tag.clone()));
        assert_eq!(registry.lookup(&tag), Some(key));
        assert_eq!(registry.lookup(&Tag::new(1, "CV3")), None);
        assert_eq!(registry.tag(TagKey(99)), None);
    }
}
