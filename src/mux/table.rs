//! Connection table shared between a dispatch loop and the public API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::mux::frame::StreamId;

/// Identifier → entry map with atomic allocation.
///
/// The lock is never held across an `.await`; callers clone what they need
/// out of an entry and release the table before doing I/O.
pub struct ConnTable<V> {
    entries: Mutex<HashMap<StreamId, V>>,
    next_id: AtomicU32,
}

impl<V> ConnTable<V> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Allocate a fresh identifier and register `value` under it.
    ///
    /// The counter wraps; identifiers still present in the table and the
    /// value 0 are skipped.
    pub fn allocate(&self, value: V) -> StreamId {
        let mut value = Some(value);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id == 0 {
                continue;
            }

            let mut entries = self.entries.lock();
            if let std::collections::hash_map::Entry::Vacant(slot) = entries.entry(id) {
                if let Some(v) = value.take() {
                    slot.insert(v);
                }
                return id;
            }
        }
    }

    /// Register `value` under an identifier chosen by the peer.
    ///
    /// Returns `false` (and drops `value`) if the identifier is taken.
    pub fn insert_new(&self, id: StreamId, value: V) -> bool {
        let mut entries = self.entries.lock();
        match entries.entry(id) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&self, id: StreamId) -> Option<V> {
        self.entries.lock().remove(&id)
    }

    /// Remove an entry only if `pred` accepts it.
    pub fn remove_if(&self, id: StreamId, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(&id) {
            Some(v) if pred(v) => entries.remove(&id),
            _ => None,
        }
    }

    /// Check whether an identifier is registered.
    pub fn contains(&self, id: StreamId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry, returning them to the caller.
    pub fn drain(&self) -> Vec<(StreamId, V)> {
        self.entries.lock().drain().collect()
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&self, id: StreamId) {
        self.next_id.store(id, Ordering::Relaxed);
    }
}

impl<V: Clone> ConnTable<V> {
    /// Clone the entry for `id` out of the table.
    pub fn get(&self, id: StreamId) -> Option<V> {
        self.entries.lock().get(&id).cloned()
    }
}

impl<V> Default for ConnTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_allocate_starts_at_one() {
        let table = ConnTable::new();
        assert_eq!(table.allocate("a"), 1);
        assert_eq!(table.allocate("b"), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_allocate_skips_live_ids_on_wrap() {
        let table = ConnTable::new();
        assert_eq!(table.allocate(()), 1);
        assert_eq!(table.allocate(()), 2);

        table.set_next_id(u32::MAX - 1);
        assert_eq!(table.allocate(()), u32::MAX);
        // Wraps past 0 and the still-registered 1 and 2.
        assert_eq!(table.allocate(()), 3);

        table.remove(1);
        table.set_next_id(0);
        assert_eq!(table.allocate(()), 1);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let table = Arc::new(ConnTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || (0..500).map(|_| table.allocate(())).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(table.len(), 4000);
    }

    #[test]
    fn test_insert_new_rejects_duplicate() {
        let table = ConnTable::new();
        assert!(table.insert_new(7, "first"));
        assert!(!table.insert_new(7, "second"));
        assert_eq!(table.get(7), Some("first"));

        assert_eq!(table.remove_if(7, |v| *v == "second"), None);
        assert_eq!(table.remove(7), Some("first"));
        assert_eq!(table.remove(7), None);
        assert!(table.is_empty());
    }
}
