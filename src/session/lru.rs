//! Least-recently-interacted ordering of documents with live instances.

use std::collections::{BTreeMap, HashMap};

use crate::model::DocumentId;

/// Orders documents by last interaction; eviction and touch are O(log n).
#[derive(Debug, Default)]
pub struct LruIndex {
    clock: u64,
    by_tick: BTreeMap<u64, DocumentId>,
    ticks: HashMap<DocumentId, u64>,
}

impl LruIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `document` as the most recently interacted.
    pub fn touch(&mut self, document: &DocumentId) {
        self.clock += 1;
        if let Some(old) = self.ticks.insert(document.clone(), self.clock) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.clock, document.clone());
    }

    /// Touch `document` only if it is already tracked.
    pub fn refresh(&mut self, document: &DocumentId) {
        if self.contains(document) {
            self.touch(document);
        }
    }

    pub fn remove(&mut self, document: &DocumentId) -> bool {
        match self.ticks.remove(document) {
            Some(tick) => {
                self.by_tick.remove(&tick);
                true
            }
            None => false,
        }
    }

    /// Remove and return the least recently interacted document.
    pub fn pop_oldest(&mut self) -> Option<DocumentId> {
        let (_, document) = self.by_tick.pop_first()?;
        self.ticks.remove(&document);
        Some(document)
    }

    pub fn contains(&self, document: &DocumentId) -> bool {
        self.ticks.contains_key(document)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Documents from oldest to newest interaction.
    pub fn iter(&self) -> impl Iterator<Item = &DocumentId> {
        self.by_tick.values()
    }
}
