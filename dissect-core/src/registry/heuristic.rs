//! Ordered heuristic chains.

use std::sync::Arc;

use super::HeuristicDissector;

pub(crate) struct HeuristicEntry {
    pub(crate) priority: u32,
    seq: u64,
    pub(crate) enabled: bool,
    pub(crate) handler: Arc<dyn HeuristicDissector>,
}

impl HeuristicEntry {
    pub(crate) fn name(&self) -> &'static str {
        self.handler.name()
    }
}

/// Heuristic dissectors of one namespace, kept sorted by `(priority, seq)`.
///
/// Lower priority values run first; equal priorities run in registration
/// order.
#[derive(Default)]
pub(crate) struct HeuristicChain {
    entries: Vec<HeuristicEntry>,
    next_seq: u64,
}

impl HeuristicChain {
    /// Add `handler` at `priority`, replacing any entry with the same name.
    ///
    /// Returns true when an entry was replaced.
    pub(crate) fn insert(&mut self, priority: u32, handler: Arc<dyn HeuristicDissector>) -> bool {
        let replaced = self.remove(handler.name());
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = HeuristicEntry {
            priority,
            seq,
            enabled: true,
            handler,
        };
        let at = self
            .entries
            .partition_point(|e| (e.priority, e.seq) <= (entry.priority, entry.seq));
        self.entries.insert(at, entry);
        replaced
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name() != name);
        self.entries.len() != before
    }

    pub(crate) fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.name() == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Entries in evaluation order, disabled ones included.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &HeuristicEntry> {
        self.entries.iter()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
