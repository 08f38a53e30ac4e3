//! Per-packet dissection context and summary columns.

use std::any::Any;

use smallvec::SmallVec;

use crate::conversation::ConversationTable;
use crate::cursor::ByteCursor;
use crate::error::{DissectError, Result};
use crate::packet::{FlowTuple, PacketInfo};
use crate::registry::{DispatchOutcome, DissectorRegistry};
use crate::tree::TreeNode;

/// Protocol column name.
pub const COL_PROTOCOL: &str = "protocol";
/// Info column name.
pub const COL_INFO: &str = "info";

/// Hint entry for child protocol detection: (hint_name, value).
pub type HintEntry = (&'static str, u64);

/// Ordered summary strings for a tabular view.
///
/// `protocol` and `info` always come first; custom columns follow in the
/// order they were first set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    entries: Vec<(&'static str, String)>,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            entries: vec![(COL_PROTOCOL, String::new()), (COL_INFO, String::new())],
        }
    }
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, name: &'static str) -> &mut String {
        let index = match self.entries.iter().position(|(n, _)| *n == name) {
            Some(index) => index,
            None => {
                self.entries.push((name, String::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    /// Replace the text of a column.
    pub fn set(&mut self, name: &'static str, value: &str) {
        let slot = self.slot(name);
        slot.clear();
        slot.push_str(value);
    }

    /// Append text to a column.
    pub fn append(&mut self, name: &'static str, value: &str) {
        self.slot(name).push_str(value);
    }

    /// Append text, preceded by `sep` if the column is not empty.
    pub fn append_sep(&mut self, name: &'static str, sep: &str, value: &str) {
        let slot = self.slot(name);
        if !slot.is_empty() {
            slot.push_str(sep);
        }
        slot.push_str(value);
    }

    /// Text of a column; `None` for an unknown column.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| value.as_str())
    }

    /// Empty a column, keeping its position.
    pub fn clear(&mut self, name: &'static str) {
        self.slot(name).clear();
    }

    pub fn protocol(&self) -> &str {
        self.get(COL_PROTOCOL).unwrap_or_default()
    }

    pub fn info(&self) -> &str {
        self.get(COL_INFO).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

/// Mutable state shared by the dissectors of one packet.
///
/// Created per packet and discarded with it. Holds the registry and
/// conversation table so handlers can hand off and correlate, the recursion
/// guard, the output columns, and scratch data one handler may leave for a
/// nested one.
pub struct DissectionContext<'r> {
    registry: &'r DissectorRegistry,
    conversations: &'r ConversationTable,
    packet: PacketInfo,
    depth: usize,
    max_depth: usize,
    aborted: bool,
    path: SmallVec<[&'static str; 8]>,
    columns: Columns,
    /// Protocol-specific hints (e.g., carrying frame type).
    /// Typically 2-4 entries.
    hints: SmallVec<[HintEntry; 4]>,
    private: Option<Box<dyn Any>>,
}

impl<'r> DissectionContext<'r> {
    pub fn new(
        registry: &'r DissectorRegistry,
        conversations: &'r ConversationTable,
        packet: PacketInfo,
        max_depth: usize,
    ) -> Self {
        Self {
            registry,
            conversations,
            packet,
            depth: 0,
            max_depth,
            aborted: false,
            path: SmallVec::new(),
            columns: Columns::new(),
            hints: SmallVec::new(),
            private: None,
        }
    }

    pub fn registry(&self) -> &'r DissectorRegistry {
        self.registry
    }

    pub fn conversations(&self) -> &'r ConversationTable {
        self.conversations
    }

    pub fn packet(&self) -> &PacketInfo {
        &self.packet
    }

    pub fn frame_number(&self) -> u64 {
        self.packet.frame_number
    }

    pub fn timestamp_us(&self) -> i64 {
        self.packet.timestamp_us
    }

    pub fn flow(&self) -> Option<&FlowTuple> {
        self.packet.flow.as_ref()
    }

    // === Recursion guard ===

    /// Current nesting depth of dispatch.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Whether the recursion limit was hit for this packet.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(crate) fn enter(&mut self, dissector: &'static str) -> Result<()> {
        if self.depth >= self.max_depth {
            self.aborted = true;
            return Err(DissectError::RecursionLimitExceeded {
                depth: self.depth + 1,
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        self.path.push(dissector);
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.path.pop();
    }

    /// Dissectors currently active, outermost first.
    pub fn path(&self) -> &[&'static str] {
        &self.path
    }

    /// The dissector that handed off to the current one.
    pub fn parent_protocol(&self) -> Option<&'static str> {
        self.path.iter().rev().nth(1).copied()
    }

    // === Columns ===

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut Columns {
        &mut self.columns
    }

    pub fn into_columns(self) -> Columns {
        self.columns
    }

    // === Hints ===

    /// Value of a hint left by an enclosing dissector.
    pub fn hint(&self, name: &str) -> Option<u64> {
        self.hints
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| *value)
    }

    /// Set a hint, replacing an existing one with the same name.
    pub fn set_hint(&mut self, name: &'static str, value: u64) {
        match self.hints.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.hints.push((name, value)),
        }
    }

    pub fn remove_hint(&mut self, name: &str) -> Option<u64> {
        let index = self.hints.iter().position(|(n, _)| *n == name)?;
        Some(self.hints.remove(index).1)
    }

    // === Private data ===

    /// Leave typed data for a nested dissector, replacing any previous data.
    pub fn set_private<T: Any>(&mut self, value: T) {
        self.private = Some(Box::new(value));
    }

    /// Borrow the private data if it has type `T`.
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.as_ref()?.downcast_ref::<T>()
    }

    /// Take the private data if it has type `T`; other types are left in place.
    pub fn take_private<T: Any>(&mut self) -> Option<T> {
        match self.private.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.private = Some(other);
                None
            }
        }
    }

    // === Hand-off ===

    /// Hand `cursor` off through the registry by one key.
    pub fn dispatch<'a>(
        &mut self,
        namespace: &str,
        key: u64,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
    ) -> Result<DispatchOutcome> {
        let registry = self.registry;
        registry.dispatch(namespace, key, cursor, tree, self)
    }

    /// Hand `cursor` off through the registry by several candidate keys.
    pub fn dispatch_keys<'a>(
        &mut self,
        namespace: &str,
        keys: &[u64],
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
    ) -> Result<DispatchOutcome> {
        let registry = self.registry;
        registry.dispatch_keys(namespace, keys, cursor, tree, self)
    }

    /// Hand `cursor` to a dissector by name.
    pub fn call<'a>(
        &mut self,
        name: &str,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
    ) -> Result<DispatchOutcome> {
        let registry = self.registry;
        registry.call(name, cursor, tree, self)
    }
}

impl std::fmt::Debug for DissectionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DissectionContext")
            .field("packet", &self.packet)
            .field("depth", &self.depth)
            .field("max_depth", &self.max_depth)
            .field("aborted", &self.aborted)
            .field("path", &self.path)
            .field("columns", &self.columns)
            .field("hints", &self.hints)
            .finish_non_exhaustive()
    }
}
