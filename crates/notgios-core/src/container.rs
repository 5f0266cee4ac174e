//! Generic freeze-on-shutdown containers (spec §4.4): the Rust analogue of
//! the C `hash_t` (reader-writer-locked map with a frozen sentinel) and
//! `list_t` (mutex-locked FIFO with the same sentinel).

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::ContainerError;

/// A `RwLock`-guarded map that can be irreversibly frozen.
///
/// Mirrors the `hash_t` contract exactly: `put`/`drop` fail with
/// [`ContainerError::Frozen`] once [`FrozenMap::freeze`] has been called,
/// but existing entries are left in place — freezing never empties the map.
pub struct FrozenMap<K, V> {
    data: RwLock<HashMap<K, V>>,
    frozen: AtomicBool,
}

impl<K, V> Default for FrozenMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        FrozenMap {
            data: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }
}

impl<K, V> FrozenMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key -> value`. Fails with [`ContainerError::Exists`] if the
    /// key is already bound, or [`ContainerError::Frozen`] if shutdown has
    /// started.
    pub fn put(&self, key: K, value: V) -> Result<(), ContainerError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(ContainerError::Frozen);
        }
        let mut guard = self.data.write().unwrap();
        // Re-check under the lock: freeze() can race a put() that passed the
        // fast check above.
        if self.frozen.load(Ordering::Acquire) {
            return Err(ContainerError::Frozen);
        }
        if guard.contains_key(&key) {
            return Err(ContainerError::Exists);
        }
        guard.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.data.read().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.data.read().unwrap().contains_key(key)
    }

    /// Remove `key`, returning its value if present. Fails with
    /// [`ContainerError::Frozen`] if shutdown has started — the entry is
    /// left bound (frozen containers may still be read, just not mutated).
    pub fn drop_key(&self, key: &K) -> Result<Option<V>, ContainerError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(ContainerError::Frozen);
        }
        let mut guard = self.data.write().unwrap();
        Ok(guard.remove(key))
    }

    /// Snapshot of current keys, safe to iterate without holding the lock.
    pub fn keys(&self) -> Vec<K> {
        self.data.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idempotent. After this call every `put`/`drop_key` returns `Frozen`.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

/// A mutex-guarded FIFO that can be capped (oldest-first drop) and frozen.
///
/// Grounded on the C `list_t` contract (`lpush`/`rpop`, mutex, frozen flag);
/// `cap == 0` means unbounded, the spec's default (§7: "implementations MAY
/// cap it ... but MUST continue collecting").
pub struct FrozenQueue<T> {
    data: std::sync::Mutex<VecDeque<T>>,
    frozen: AtomicBool,
    cap: usize,
}

impl<T> FrozenQueue<T> {
    pub fn new(cap: usize) -> Self {
        FrozenQueue {
            data: std::sync::Mutex::new(VecDeque::new()),
            frozen: AtomicBool::new(false),
            cap,
        }
    }

    /// Push to the back of the queue. If a cap is set and full, the oldest
    /// entry is dropped first (spec §7's "dropping policy is oldest-first").
    /// Returns the dropped element, if any, or [`ContainerError::Frozen`] if
    /// shutdown has started — the same frozen-rejects-mutation contract
    /// [`FrozenMap::put`] enforces.
    pub fn push(&self, value: T) -> Result<Option<T>, ContainerError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(ContainerError::Frozen);
        }
        let mut guard = self.data.lock().unwrap();
        // Re-check under the lock: freeze() can race a push() that passed
        // the fast check above.
        if self.frozen.load(Ordering::Acquire) {
            return Err(ContainerError::Frozen);
        }
        let dropped = if self.cap != 0 && guard.len() >= self.cap {
            guard.pop_front()
        } else {
            None
        };
        guard.push_back(value);
        Ok(dropped)
    }

    /// Pop from the front (FIFO order).
    pub fn pop(&self) -> Option<T> {
        self.data.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_rejects_duplicate_keys() {
        let map: FrozenMap<String, i32> = FrozenMap::new();
        assert!(map.put("a".to_string(), 1).is_ok());
        assert_eq!(map.put("a".to_string(), 2), Err(ContainerError::Exists));
    }

    #[test]
    fn freeze_blocks_further_mutation_but_keeps_existing_entries() {
        let map: FrozenMap<String, i32> = FrozenMap::new();
        map.put("a".to_string(), 1).unwrap();
        map.freeze();
        assert_eq!(map.put("b".to_string(), 2), Err(ContainerError::Frozen));
        assert_eq!(map.get(&"a".to_string()), Some(1));
        assert_eq!(map.drop_key(&"a".to_string()), Err(ContainerError::Frozen));
    }

    #[test]
    fn keys_snapshot_is_independent_of_later_mutation() {
        let map: FrozenMap<String, i32> = FrozenMap::new();
        map.put("a".to_string(), 1).unwrap();
        let keys = map.keys();
        map.put("b".to_string(), 2).unwrap();
        assert_eq!(keys, vec!["a".to_string()]);
    }

    #[test]
    fn queue_is_fifo() {
        let q: FrozenQueue<i32> = FrozenQueue::new(0);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn queue_cap_drops_oldest_first() {
        let q: FrozenQueue<i32> = FrozenQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        let dropped = q.push(3).unwrap();
        assert_eq!(dropped, Some(1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn queue_freeze_blocks_further_pushes_but_keeps_existing_entries() {
        let q: FrozenQueue<i32> = FrozenQueue::new(0);
        q.push(1).unwrap();
        q.freeze();
        assert_eq!(q.push(2), Err(ContainerError::Frozen));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(1));
    }
}
