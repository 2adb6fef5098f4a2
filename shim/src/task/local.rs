//! Process-local storage.
//!
//! Slots owned by the current image (thread-area descriptors and similar
//! per-image registrations). Cleared whenever a new image is committed.

use hashbrown::HashMap;

#[derive(Debug, Default)]
pub struct LocalStorage {
    slots: HashMap<u32, usize>,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: u32) -> Option<usize> {
        self.slots.get(&slot).copied()
    }

    pub fn set(&mut self, slot: u32, value: usize) -> Option<usize> {
        self.slots.insert(slot, value)
    }

    pub fn remove(&mut self, slot: u32) -> Option<usize> {
        self.slots.remove(&slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
    }
}
