// LRU cache for compiled signatures, keyed by the signature's content hash
// (spec §4.9 "cache with an LRU policy"). Hand-rolled rather than pulling
// in an LRU crate — capacity is small (tens of entries per cyber) and the
// eviction policy is the only thing that matters here.

use std::collections::HashMap;
use std::collections::VecDeque;

use super::signature::CompiledSignature;

pub struct SignatureCache {
    capacity: usize,
    entries: HashMap<String, CompiledSignature>,
    /// Most-recently-used at the back. A linear scan on touch is fine at
    /// this capacity; a doubly linked list would be premature here.
    order: VecDeque<String>,
}

impl SignatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<CompiledSignature> {
        if self.entries.contains_key(key) {
            self.touch(key);
            self.entries.get(key).cloned()
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: String, value: CompiledSignature) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), value);
            self.touch(&key);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key.clone(), value);
        self.order.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let entry = self.order.remove(pos).expect("position just found");
            self.order.push_back(entry);
        }
    }
}
