//! Exact-match dissector tables.

use std::collections::HashMap;
use std::sync::Arc;

use super::Dissector;

/// Width of the unsigned keys a table accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyWidth {
    U8,
    U16,
    U24,
    U32,
}

impl KeyWidth {
    /// Key width in bits.
    pub fn bits(&self) -> u8 {
        match self {
            KeyWidth::U8 => 8,
            KeyWidth::U16 => 16,
            KeyWidth::U24 => 24,
            KeyWidth::U32 => 32,
        }
    }

    /// Largest key representable at this width.
    pub fn max_key(&self) -> u64 {
        (1u64 << self.bits()) - 1
    }

    /// Whether `key` fits this width.
    pub fn fits(&self, key: u64) -> bool {
        key <= self.max_key()
    }
}

/// One table of key to dissector bindings.
pub(crate) struct DissectorTable {
    width: KeyWidth,
    entries: HashMap<u64, Arc<dyn Dissector>>,
}

impl DissectorTable {
    pub(crate) fn new(width: KeyWidth) -> Self {
        Self {
            width,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn width(&self) -> KeyWidth {
        self.width
    }

    /// Insert or replace the binding for `key`, returning the previous one.
    pub(crate) fn insert(
        &mut self,
        key: u64,
        handler: Arc<dyn Dissector>,
    ) -> Option<Arc<dyn Dissector>> {
        self.entries.insert(key, handler)
    }

    pub(crate) fn remove(&mut self, key: u64) -> Option<Arc<dyn Dissector>> {
        self.entries.remove(&key)
    }

    pub(crate) fn get(&self, key: u64) -> Option<&Arc<dyn Dissector>> {
        self.entries.get(&key)
    }

    /// `(key, dissector name)` pairs sorted by key.
    pub(crate) fn entries(&self) -> Vec<(u64, &'static str)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(key, handler)| (*key, handler.name()))
            .collect();
        entries.sort_unstable_by_key(|(key, _)| *key);
        entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
