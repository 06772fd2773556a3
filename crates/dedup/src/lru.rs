//! Fixed-capacity least-recently-used presence set.
//!
//! [`LruSet`] answers one question: "has this key been seen recently?". It
//! stores no values. Entries live in a slab of nodes linked in recency order
//! (head = most recently used, tail = least recently used), with a hash index
//! from key to slot. Lookup, promotion, insertion, and eviction are all O(1).
//!
//! Once the set is full, every insert of a new key reuses the slot of the
//! evicted tail, so the slab never grows past `capacity`.
//!
//! # Thread safety
//!
//! Not synchronized. The owner must serialize access, typically by keeping
//! the set inside a single task.

use std::hash::Hash;
use std::mem;

use ahash::AHashMap;

use crate::DedupError;

const NIL: usize = usize::MAX;

struct Node<K> {
    key: K,
    prev: usize,
    next: usize,
}

/// Bounded LRU set of keys.
pub struct LruSet<K> {
    index: AHashMap<K, usize>,
    nodes: Vec<Node<K>>,
    head: usize,
    tail: usize,
    capacity: usize,
}

/// Approximate bytes held per entry: one slab node plus one index slot.
pub const fn entry_footprint<K>() -> usize {
    mem::size_of::<Node<K>>() + mem::size_of::<(K, usize)>()
}

/// Number of entries that fit in `budget_bytes`, never less than one.
pub const fn capacity_for_budget<K>(budget_bytes: usize) -> usize {
    let n = budget_bytes / entry_footprint::<K>();
    if n == 0 {
        1
    } else {
        n
    }
}

impl<K: Hash + Eq + Clone> LruSet<K> {
    /// Create an empty set holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Result<Self, DedupError> {
        if capacity == 0 {
            return Err(DedupError::ZeroCapacity);
        }
        Ok(Self {
            index: AHashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
        })
    }

    /// Look up `key`. A hit promotes it to most recently used.
    pub fn get(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&slot) => {
                self.promote(slot);
                true
            }
            None => false,
        }
    }

    /// Check membership without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert `key` as most recently used.
    ///
    /// An existing key is only promoted. Inserting a new key into a full set
    /// evicts the least recently used key first; the evicted key is returned.
    pub fn set(&mut self, key: K) -> Option<K> {
        if let Some(&slot) = self.index.get(&key) {
            self.promote(slot);
            return None;
        }

        if self.index.len() < self.capacity {
            let slot = self.nodes.len();
            self.nodes.push(Node {
                key: key.clone(),
                prev: NIL,
                next: NIL,
            });
            self.index.insert(key, slot);
            self.push_front(slot);
            return None;
        }

        // Full: recycle the tail slot for the new key.
        let slot = self.tail;
        self.unlink(slot);
        let evicted = mem::replace(&mut self.nodes[slot].key, key.clone());
        self.index.remove(&evicted);
        self.index.insert(key, slot);
        self.push_front(slot);
        Some(evicted)
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of keys.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every key.
    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            nodes: &self.nodes,
            cursor: self.head,
        }
    }

    fn promote(&mut self, slot: usize) {
        if slot == self.head {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = &self.nodes[slot];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[slot];
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.nodes[old_head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }
}

/// Iterator over an [`LruSet`] in recency order.
pub struct Iter<'a, K> {
    nodes: &'a [Node<K>],
    cursor: usize,
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let node = &self.nodes[self.cursor];
        self.cursor = node.next;
        Some(&node.key)
    }
}
