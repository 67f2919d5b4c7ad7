//! Ordered multi-value index
//!
//! Maps a string key to an ordered set of integer ids. Backs both the
//! token-by-identifier index and the tokens-by-file index of the token
//! database (the file index keys by the FileId's decimal string form).
//!
//! Duplicate (key, id) pairs collapse, lookups of absent keys return an
//! empty sequence rather than an error, and ids within a key are kept
//! sorted so membership checks are binary searches.

use std::collections::BTreeMap;

/// Ordered map from string keys to sorted sets of integer ids
#[derive(Debug, Default, Clone)]
pub struct TreeMap {
    map: BTreeMap<String, Vec<u32>>,
}

impl TreeMap {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `id` with `key`. Idempotent for duplicate pairs.
    pub fn insert(&mut self, key: &str, id: u32) -> u32 {
        let ids = self.map.entry(key.to_string()).or_default();
        if let Err(pos) = ids.binary_search(&id) {
            ids.insert(pos, id);
        }
        id
    }

    /// All ids associated with `key`, in ascending order.
    ///
    /// Returns an empty slice for keys that were never inserted.
    pub fn id_set(&self, key: &str) -> &[u32] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove one (key, id) association. Removing an absent pair is a no-op.
    pub fn remove(&mut self, key: &str, id: u32) {
        if let Some(ids) = self.map.get_mut(key) {
            if let Ok(pos) = ids.binary_search(&id) {
                ids.remove(pos);
            }
            if ids.is_empty() {
                self.map.remove(key);
            }
        }
    }

    /// Non-binding hint to compact internal storage after a bulk load.
    ///
    /// Must not change observable query results.
    pub fn shrink(&mut self) {
        for ids in self.map.values_mut() {
            ids.shrink_to_fit();
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the index holds no keys
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut map = TreeMap::new();
        map.insert("foo", 3);
        map.insert("foo", 1);
        map.insert("bar", 2);

        assert_eq!(map.id_set("foo"), &[1, 3]);
        assert_eq!(map.id_set("bar"), &[2]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_duplicate_pairs_collapse() {
        let mut map = TreeMap::new();
        map.insert("foo", 7);
        map.insert("foo", 7);
        map.insert("foo", 7);

        assert_eq!(map.id_set("foo"), &[7]);
    }

    #[test]
    fn test_absent_key_is_empty_not_error() {
        let map = TreeMap::new();
        assert!(map.id_set("never-inserted").is_empty());
    }

    #[test]
    fn test_remove() {
        let mut map = TreeMap::new();
        map.insert("foo", 1);
        map.insert("foo", 2);

        map.remove("foo", 1);
        assert_eq!(map.id_set("foo"), &[2]);

        // Removing the last id drops the key
        map.remove("foo", 2);
        assert!(map.id_set("foo").is_empty());
        assert!(map.is_empty());

        // Removing an absent pair is a no-op
        map.remove("foo", 99);
        map.remove("never", 0);
    }

    #[test]
    fn test_shrink_preserves_results() {
        let mut map = TreeMap::new();
        for id in 0..100 {
            map.insert("bulk", id);
        }
        let before: Vec<u32> = map.id_set("bulk").to_vec();
        map.shrink();
        assert_eq!(map.id_set("bulk"), before.as_slice());
    }

    #[test]
    fn test_clear() {
        let mut map = TreeMap::new();
        map.insert("a", 1);
        map.clear();
        assert!(map.is_empty());
        assert!(map.id_set("a").is_empty());
    }
}
