// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Capacity-bounded least-recently-used map.
//!
//! Entries live in an arena linked into a recency list (head = most recent)
//! and are located through a key index.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

type EvictionListener<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

pub struct LruCache<K, V> {
    capacity: usize,
    index: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    on_evict: Option<EvictionListener<K, V>>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            on_evict: None,
        }
    }

    /// Called synchronously for every entry evicted to make room.
    pub fn with_eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.on_evict = Some(Box::new(listener));
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.move_to_front(slot);
        self.slots[slot].as_ref().map(|entry| &entry.value)
    }

    /// Looks up `key` without touching its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|entry| &entry.value)
    }

    /// Inserts or replaces `key` as most recently used, then evicts down to capacity.
    ///
    /// Entries for which `pinned` returns `true` are skipped. When every other
    /// entry is pinned the cache stays over capacity until one is released.
    pub fn insert<P>(&mut self, key: K, value: V, pinned: P) -> Vec<(K, V)>
    where
        P: Fn(&V) -> bool,
    {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.value = value;
            }
            self.move_to_front(slot);
            return Vec::new();
        }

        let entry = Entry {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);

        let mut evicted = Vec::new();
        let mut cursor = self.tail;
        while self.index.len() > self.capacity && cursor != NIL {
            let prev = self.link(cursor).0;
            let candidate = cursor != slot
                && self.slots[cursor]
                    .as_ref()
                    .is_some_and(|entry| !pinned(&entry.value));
            if candidate {
                if let Some(entry) = self.remove_slot(cursor) {
                    if let Some(listener) = &self.on_evict {
                        listener(&entry.0, &entry.1);
                    }
                    evicted.push(entry);
                }
            }
            cursor = prev;
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.remove_slot(slot).map(|(_, value)| value)
    }

    /// Keeps entries for which `keep` returns `true`; returns the rest.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry
                    .as_ref()
                    .filter(|entry| !keep(&entry.key, &entry.value))
                    .map(|_| slot)
            })
            .collect();
        doomed
            .into_iter()
            .filter_map(|slot| self.remove_slot(slot))
            .collect()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while cursor != NIL {
            if let Some(entry) = &self.slots[cursor] {
                keys.push(entry.key.clone());
                cursor = entry.next;
            } else {
                break;
            }
        }
        keys
    }

    fn link(&self, slot: usize) -> (usize, usize) {
        self.slots[slot]
            .as_ref()
            .map(|entry| (entry.prev, entry.next))
            .unwrap_or((NIL, NIL))
    }

    fn set_prev(&mut self, slot: usize, prev: usize) {
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = prev;
        }
    }

    fn set_next(&mut self, slot: usize, next: usize) {
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.next = next;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = self.link(slot);
        if prev == NIL {
            self.head = next;
        } else {
            self.set_next(prev, next);
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.set_prev(next, prev);
        }
        self.set_prev(slot, NIL);
        self.set_next(slot, NIL);
    }

    fn push_front(&mut self, slot: usize) {
        self.set_prev(slot, NIL);
        self.set_next(slot, self.head);
        if self.head != NIL {
            self.set_prev(self.head, slot);
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn move_to_front(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn remove_slot(&mut self, slot: usize) -> Option<(K, V)> {
        self.slots[slot].as_ref()?;
        self.unlink(slot);
        let entry = self.slots[slot].take()?;
        self.index.remove(&entry.key);
        self.free.push(slot);
        Some((entry.key, entry.value))
    }
}
