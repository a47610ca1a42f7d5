//! LRU eviction index
//!
//! Tracks recency of access for every key in the memory index. The manager
//! keeps the two in lockstep under its lock; this type only orders keys.

use lru::LruCache;

/// Recency-ordered set of keys, most recently used first
#[derive(Debug)]
pub struct LruIndex {
    order: LruCache<String, ()>,
}

impl LruIndex {
    /// Create an empty index; capacity is enforced by the manager, not here
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }

    /// Insert a key as most recently used, or move it there if present
    pub fn insert(&mut self, key: &str) {
        if self.order.get(key).is_none() {
            self.order.put(key.to_string(), ());
        }
    }

    /// Mark an existing key as most recently used
    pub fn touch(&mut self, key: &str) -> bool {
        self.order.get(key).is_some()
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> bool {
        self.order.pop(key).is_some()
    }

    /// Remove and return the least recently used key
    pub fn pop_lru(&mut self) -> Option<String> {
        self.order.pop_lru().map(|(key, _)| key)
    }

    /// Least recently used key without changing order
    pub fn peek_lru(&self) -> Option<&str> {
        self.order.peek_lru().map(|(key, _)| key.as_str())
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|(key, _)| key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.order.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}

impl Default for LruIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order() {
        let mut index = LruIndex::new();
        index.insert("a");
        index.insert("b");
        index.insert("c");

        assert_eq!(index.peek_lru(), Some("a"));
        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_touch_moves_to_front() {
        let mut index = LruIndex::new();
        index.insert("a");
        index.insert("b");

        assert!(index.touch("a"));
        assert!(!index.touch("missing"));

        assert_eq!(index.pop_lru(), Some("b".to_string()));
        assert_eq!(index.pop_lru(), Some("a".to_string()));
        assert_eq!(index.pop_lru(), None);
    }

    #[test]
    fn test_reinsert_does_not_duplicate() {
        let mut index = LruIndex::new();
        index.insert("a");
        index.insert("b");
        index.insert("a");

        assert_eq!(index.len(), 2);
        assert_eq!(index.peek_lru(), Some("b"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut index = LruIndex::new();
        index.insert("a");
        index.insert("b");

        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(!index.contains("a"));

        index.clear();
        assert!(index.is_empty());
    }
}
