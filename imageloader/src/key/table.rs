//! Hash table keyed by [`RequestKey`] with an explicit comparator.

use super::{KeyEquivalence, RequestKey};
use std::collections::HashMap;
use std::sync::Arc;

/// Map from request keys to values.
///
/// Keys are bucketed by their resource hash and compared inside a bucket
/// with the table's [`KeyEquivalence`], so lookups find any entry whose key
/// is *equivalent* to the lookup key, not just identical.
pub struct KeyTable<V> {
    equivalence: Arc<dyn KeyEquivalence>,
    buckets: HashMap<u64, Vec<(RequestKey, V)>>,
    len: usize,
}

impl<V> KeyTable<V> {
    /// Creates an empty table using `equivalence` to compare keys.
    pub fn new(equivalence: Arc<dyn KeyEquivalence>) -> Self {
        Self {
            equivalence,
            buckets: HashMap::new(),
            len: 0,
        }
    }

    fn position(&self, key: &RequestKey) -> Option<usize> {
        self.buckets.get(&key.hash_value()).and_then(|bucket| {
            bucket
                .iter()
                .position(|(k, _)| k.is_equivalent(key, self.equivalence.as_ref()))
        })
    }

    /// Returns the value stored under a key equivalent to `key`.
    pub fn get(&self, key: &RequestKey) -> Option<&V> {
        let index = self.position(key)?;
        self.buckets
            .get(&key.hash_value())
            .map(|bucket| &bucket[index].1)
    }

    /// Returns a mutable reference to the value under an equivalent key.
    pub fn get_mut(&mut self, key: &RequestKey) -> Option<&mut V> {
        let index = self.position(key)?;
        self.buckets
            .get_mut(&key.hash_value())
            .map(|bucket| &mut bucket[index].1)
    }

    /// Inserts `value`, replacing (and returning) the value of an equivalent
    /// entry. The stored key is replaced too.
    pub fn insert(&mut self, key: RequestKey, value: V) -> Option<V> {
        match self.position(&key) {
            Some(index) => {
                let bucket = self.buckets.get_mut(&key.hash_value())?;
                let (_, old) = std::mem::replace(&mut bucket[index], (key, value));
                Some(old)
            }
            None => {
                self.buckets
                    .entry(key.hash_value())
                    .or_default()
                    .push((key, value));
                self.len += 1;
                None
            }
        }
    }

    /// Removes the entry under a key equivalent to `key`.
    pub fn remove(&mut self, key: &RequestKey) -> Option<V> {
        let index = self.position(key)?;
        let hash = key.hash_value();
        let bucket = self.buckets.get_mut(&hash)?;
        let (_, value) = bucket.swap_remove(index);
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        Some(value)
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&RequestKey, &V) -> bool) {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|(k, v)| keep(k, v));
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        self.len -= removed;
    }

    /// Removes every entry, returning the values.
    pub fn drain(&mut self) -> Vec<V> {
        self.len = 0;
        self.buckets
            .drain()
            .flat_map(|(_, bucket)| bucket.into_iter().map(|(_, v)| v))
            .collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.buckets.values().flatten().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
