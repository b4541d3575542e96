//! Ordered in-memory key-value store.
//!
//! Keys are raw bytes compared lexicographically, so a forward range scan over
//! a prefix yields ascending keys and a reverse scan yields descending keys.
//! All index layouts in this crate rely on that.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::ops::Bound;

/// Iterator over the entries of one key prefix, in key order.
pub type PrefixRange<'a> = btree_map::Range<'a, Vec<u8>, Vec<u8>>;

/// Byte-ordered key-value map.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn has(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Every entry whose key starts with `prefix`. Call `.rev()` for
    /// descending order.
    #[must_use]
    pub fn prefix_range(&self, prefix: &[u8]) -> PrefixRange<'_> {
        let start = Bound::Included(prefix.to_vec());
        let end = prefix_end(prefix).map_or(Bound::Unbounded, Bound::Excluded);
        self.entries.range((start, end))
    }

    /// Remove every entry (used for per-block overlays).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Smallest key strictly greater than every key starting with `prefix`,
/// or `None` when the prefix is all `0xff` (scan to the end).
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
