use ahash::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::gc::gc_id::StringId;
use crate::gc::object_pool::ObjectPool;

/// Content-dedup table over GC strings.
///
/// Maps content hash to candidate ids; the pool holds the actual bytes.
/// Interning the same content twice yields the same id, so id comparison is
/// content comparison everywhere else in the runtime. Entries are evicted
/// when the sweep destroys their string.
pub struct StringInterner {
    map: HashMap<u64, Vec<StringId>, RandomState>,
    hash_builder: RandomState,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            hash_builder: RandomState::new(),
        }
    }

    #[inline(always)]
    pub fn hash(&self, s: &str) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up an already-interned id for `s`.
    pub fn find(&self, hash: u64, s: &str, pool: &ObjectPool) -> Option<StringId> {
        let candidates = self.map.get(&hash)?;
        for &id in candidates {
            if let Some(obj) = pool.strings.get(id.0) {
                if obj.data.as_str() == s {
                    return Some(id);
                }
            }
        }
        None
    }

    pub fn insert(&mut self, hash: u64, id: StringId) {
        self.map.entry(hash).or_default().push(id);
    }

    /// Drop the entry for a string about to be destroyed.
    pub fn remove(&mut self, id: StringId, pool: &ObjectPool) {
        let Some(obj) = pool.strings.get(id.0) else {
            return;
        };
        let hash = obj.data.hash();
        if let Some(candidates) = self.map.get_mut(&hash) {
            candidates.retain(|&c| c != id);
            if candidates.is_empty() {
                self.map.remove(&hash);
            }
        }
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
