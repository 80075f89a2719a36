//! Capacity-capped message history keyed by message id.

use std::collections::{HashMap, VecDeque};

/// Messages kept per channel when the config does not say otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Insertion-ordered map that evicts its oldest entry once `capacity` is
/// reached.
#[derive(Debug)]
pub struct History<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V> History<V> {
    /// A `capacity` of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity.min(DEFAULT_HISTORY_LIMIT)),
            order: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_LIMIT)),
            capacity,
        }
    }

    pub fn insert(&mut self, id: String, value: V) {
        if self.entries.insert(id.clone(), value).is_some() {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut V> {
        self.entries.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
