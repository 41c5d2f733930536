//! Fixed-capacity arena level with an in-place doubly linked list.
//!
//! The level preallocates `cap` nodes and threads a recency list through a
//! `[prev, next]` table with a sentinel at index 0; arena indices are
//! 1-based, so 0 doubles as the list end. Slots are handed out monotonically
//! through `last` until the arena saturates, after which inserts recycle the
//! list tail in place. Deletes tombstone (`expire_at == 0`) and park the slot
//! at the tail; the slot's map entry survives until recycling so a re-insert
//! of the same key resurrects it without churn.

use ember_core::EvictionCallback;
use std::collections::HashMap;

const PREV: usize = 0;
const NEXT: usize = 1;

struct Node<V> {
    key: String,
    value: Option<V>,
    expire_at: u64,
}

impl<V> Node<V> {
    fn vacant() -> Self {
        Self {
            key: String::new(),
            value: None,
            expire_at: 0,
        }
    }
}

pub(crate) struct Level<V> {
    nodes: Vec<Node<V>>,
    dlnk: Vec<[u16; 2]>,
    map: HashMap<String, u16, ahash::RandomState>,
    last: u16,
}

impl<V: Clone> Level<V> {
    pub(crate) fn new(cap: u16) -> Self {
        let cap = cap.max(1);
        Self {
            nodes: (0..cap).map(|_| Node::vacant()).collect(),
            dlnk: vec![[0, 0]; cap as usize + 1],
            map: HashMap::with_capacity_and_hasher(cap as usize, ahash::RandomState::default()),
            last: 0,
        }
    }

    /// Insert or update. Returns `true` when a new slot was taken (insert),
    /// `false` for an in-place update.
    pub(crate) fn put(
        &mut self,
        key: &str,
        value: V,
        expire_at: u64,
        on_evicted: Option<&EvictionCallback<V>>,
    ) -> bool {
        if let Some(idx) = self.map.get(key).copied() {
            let node = &mut self.nodes[(idx - 1) as usize];
            node.value = Some(value);
            node.expire_at = expire_at;
            self.adjust(idx, PREV, NEXT);
            return false;
        }

        if (self.last as usize) == self.nodes.len() {
            // Arena saturated: recycle the list tail.
            let tail = self.dlnk[0][PREV];
            let ti = (tail - 1) as usize;
            if self.nodes[ti].expire_at > 0
                && let (Some(callback), Some(old)) = (on_evicted, self.nodes[ti].value.as_ref())
            {
                callback(&self.nodes[ti].key, old);
            }
            let old_key = std::mem::replace(&mut self.nodes[ti].key, key.to_string());
            self.map.remove(&old_key);
            self.nodes[ti].value = Some(value);
            self.nodes[ti].expire_at = expire_at;
            self.map.insert(key.to_string(), tail);
            self.adjust(tail, PREV, NEXT);
            return true;
        }

        self.last += 1;
        let idx = self.last;
        if self.map.is_empty() {
            self.dlnk[0][PREV] = idx;
        } else {
            let head = self.dlnk[0][NEXT];
            self.dlnk[head as usize][PREV] = idx;
        }
        let ni = (idx - 1) as usize;
        self.nodes[ni].key = key.to_string();
        self.nodes[ni].value = Some(value);
        self.nodes[ni].expire_at = expire_at;
        self.dlnk[idx as usize] = [0, self.dlnk[0][NEXT]];
        self.map.insert(key.to_string(), idx);
        self.dlnk[0][NEXT] = idx;
        true
    }

    /// Look up a key, refreshing it to the MRU end. Tombstoned slots read as
    /// absent.
    pub(crate) fn get(&mut self, key: &str) -> Option<(V, u64)> {
        let idx = self.map.get(key).copied()?;
        self.adjust(idx, PREV, NEXT);
        let node = &self.nodes[(idx - 1) as usize];
        node.value.clone().map(|value| (value, node.expire_at))
    }

    /// Whether the key maps to a live (non-tombstoned) slot.
    pub(crate) fn contains_live(&self, key: &str) -> bool {
        self.map
            .get(key)
            .is_some_and(|&idx| self.nodes[(idx - 1) as usize].expire_at > 0)
    }

    /// Tombstone a key and park its slot at the tail for recycling. Returns
    /// the removed value and its expiry stamp.
    pub(crate) fn remove(&mut self, key: &str) -> Option<(V, u64)> {
        let idx = self.map.get(key).copied()?;
        let ni = (idx - 1) as usize;
        if self.nodes[ni].expire_at == 0 {
            return None;
        }
        let expire_at = self.nodes[ni].expire_at;
        self.nodes[ni].expire_at = 0;
        self.adjust(idx, NEXT, PREV);
        self.nodes[ni].value.take().map(|value| (value, expire_at))
    }

    /// Visit live entries from MRU to LRU until the visitor returns `false`.
    pub(crate) fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &V, u64) -> bool,
    {
        let mut idx = self.dlnk[0][NEXT];
        while idx != 0 {
            let node = &self.nodes[(idx - 1) as usize];
            if node.expire_at > 0
                && let Some(value) = node.value.as_ref()
                && !visit(&node.key, value, node.expire_at)
            {
                return;
            }
            idx = self.dlnk[idx as usize][NEXT];
        }
    }

    /// Splice a slot to one end of the list: `(PREV, NEXT)` moves it to the
    /// MRU head, `(NEXT, PREV)` to the LRU tail.
    fn adjust(&mut self, idx: u16, f: usize, t: usize) {
        let i = idx as usize;
        if self.dlnk[i][f] == 0 {
            return;
        }
        let before = self.dlnk[i][f];
        let after = self.dlnk[i][t];
        self.dlnk[after as usize][f] = before;
        self.dlnk[before as usize][t] = after;
        self.dlnk[i][f] = 0;
        let end = self.dlnk[0][t];
        self.dlnk[i][t] = end;
        self.dlnk[end as usize][f] = idx;
        self.dlnk[0][t] = idx;
    }
}
