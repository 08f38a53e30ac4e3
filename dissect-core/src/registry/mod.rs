//! Protocol-independent dispatch.
//!
//! The [`DissectorRegistry`] routes a cursor to the dissector responsible
//! for it. Routing happens in three stages:
//!
//! 1. **Exact match** in a keyed table (`udp.port`, `lapd.sapi`, ...).
//! 2. **Heuristics**: the namespace's chain of [`HeuristicDissector`]s is
//!    walked in priority order and the first whose predicate accepts the
//!    cursor decodes it.
//! 3. **Fallback**: the generic `data` dissector records the bytes as an
//!    opaque leaf.
//!
//! Every handler invocation is isolated. A handler error discards whatever
//! the handler appended and records a malformed-data leaf in its place, so
//! siblings already decoded by the caller survive. Only
//! [`crate::DissectError::RecursionLimitExceeded`] escapes a dispatch.
//!
//! The registry is built once at startup and passed by reference. Bindings
//! can be replaced at any time (configurable ports), see
//! [`crate::config::PortPreference`].

mod heuristic;
mod table;

pub use table::KeyWidth;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::context::{DissectionContext, COL_INFO};
use crate::cursor::ByteCursor;
use crate::error::{ErrorKind, RegistryError, Result};
use crate::protocol::data::DataDissector;
use crate::tree::TreeNode;

use heuristic::HeuristicChain;
use table::DissectorTable;

/// Core trait every protocol handler implements.
pub trait Dissector: Send + Sync {
    /// Unique identifier (e.g., "ssl", "mgcp").
    fn name(&self) -> &'static str;

    /// Human-readable name.
    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Decode `cursor`, appending nodes under `tree`.
    ///
    /// Returns the number of bytes consumed. Fields must stay within
    /// `cursor`; the tree rejects anything else.
    fn dissect<'a>(
        &self,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<usize>;
}

/// A dissector paired with a predicate, tried when no exact match exists.
pub trait HeuristicDissector: Dissector {
    /// Whether this dissector recognizes `cursor`.
    ///
    /// Must be free of side effects: it may be called any number of times
    /// with the same cursor.
    fn accepts(&self, cursor: &ByteCursor<'_>, ctx: &DissectionContext<'_>) -> bool;
}

/// How a dispatch chose its dissector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Exact key match in a table.
    Exact,
    /// A heuristic predicate accepted the bytes.
    Heuristic,
    /// Nothing matched; bytes recorded as opaque data.
    Fallback,
    /// Called by name.
    Direct,
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Name of the dissector that ran.
    pub dissector: &'static str,
    pub match_kind: MatchKind,
    /// Bytes the dissector consumed.
    pub consumed: usize,
    /// Set when the dissector failed and its subtree became malformed data.
    pub error: Option<ErrorKind>,
}

impl DispatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Registry of dissector tables, heuristic chains and named dissectors.
pub struct DissectorRegistry {
    tables: HashMap<String, DissectorTable>,
    heuristics: HashMap<String, HeuristicChain>,
    dissectors: HashMap<&'static str, Arc<dyn Dissector>>,
    fallback: Arc<dyn Dissector>,
}

impl DissectorRegistry {
    /// Empty registry with the `data` fallback.
    pub fn new() -> Self {
        let fallback: Arc<dyn Dissector> = Arc::new(DataDissector);
        let mut dissectors: HashMap<&'static str, Arc<dyn Dissector>> = HashMap::new();
        dissectors.insert(fallback.name(), Arc::clone(&fallback));
        Self {
            tables: HashMap::new(),
            heuristics: HashMap::new(),
            dissectors,
            fallback,
        }
    }

    /// Replace the handler used when nothing matches.
    ///
    /// The handler should never fail; if it does its bytes still end up
    /// as a malformed leaf.
    pub fn set_fallback(&mut self, handler: Arc<dyn Dissector>) {
        self.fallback = handler;
    }

    // === Tables ===

    /// Declare an exact-match table.
    ///
    /// Declaring an existing table again with the same width is a no-op.
    pub fn register_table(&mut self, namespace: &str, width: KeyWidth) -> RegistryResult<()> {
        if namespace.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if let Some(existing) = self.tables.get(namespace) {
            if existing.width() != width {
                return Err(RegistryError::ConflictingTable {
                    namespace: namespace.to_string(),
                    existing: existing.width().bits(),
                    requested: width.bits(),
                });
            }
            return Ok(());
        }
        self.tables
            .insert(namespace.to_string(), DissectorTable::new(width));
        Ok(())
    }

    /// Whether `namespace` was declared.
    pub fn has_table(&self, namespace: &str) -> bool {
        self.tables.contains_key(namespace)
    }

    fn table_mut(&mut self, namespace: &str) -> RegistryResult<&mut DissectorTable> {
        self.tables
            .get_mut(namespace)
            .ok_or_else(|| RegistryError::UnknownTable {
                namespace: namespace.to_string(),
            })
    }

    /// Bind `key` in `namespace` to `handler`, replacing any prior binding.
    ///
    /// Returns the name of the replaced dissector. Binding the same handler
    /// to the same key again leaves the table unchanged.
    pub fn bind(
        &mut self,
        namespace: &str,
        key: u64,
        handler: Arc<dyn Dissector>,
    ) -> RegistryResult<Option<&'static str>> {
        let table = self.table_mut(namespace)?;
        let width = table.width();
        if !width.fits(key) {
            return Err(RegistryError::KeyOutOfRange {
                namespace: namespace.to_string(),
                key,
                bits: width.bits(),
            });
        }

        let name = handler.name();
        let replaced = table.insert(key, handler).map(|old| old.name());
        match replaced {
            Some(old) if old != name => {
                info!(namespace, key, old, new = name, "dissector binding replaced")
            }
            None => debug!(namespace, key, dissector = name, "dissector bound"),
            _ => {}
        }
        Ok(replaced)
    }

    /// Remove the binding for `key`, returning the dissector name it had.
    pub fn unbind(&mut self, namespace: &str, key: u64) -> RegistryResult<Option<&'static str>> {
        let removed = self.table_mut(namespace)?.remove(key).map(|old| old.name());
        if let Some(old) = removed {
            info!(namespace, key, dissector = old, "dissector unbound");
        }
        Ok(removed)
    }

    /// Name of the dissector bound to `key`, if any.
    pub fn lookup(&self, namespace: &str, key: u64) -> Option<&'static str> {
        self.tables
            .get(namespace)?
            .get(key)
            .map(|handler| handler.name())
    }

    /// Declared table names, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `(key, dissector name)` bindings of a table, sorted by key.
    pub fn entries(&self, namespace: &str) -> Vec<(u64, &'static str)> {
        self.tables
            .get(namespace)
            .map(|table| table.entries())
            .unwrap_or_default()
    }

    /// Number of bindings in a table.
    pub fn binding_count(&self, namespace: &str) -> usize {
        self.tables.get(namespace).map_or(0, |table| table.len())
    }

    // === Heuristics ===

    /// Add a heuristic to the chain of `namespace`.
    ///
    /// Lower `priority` values run first; ties run in registration order.
    /// An entry with the same dissector name is replaced.
    pub fn add_heuristic(
        &mut self,
        namespace: &str,
        priority: u32,
        handler: Arc<dyn HeuristicDissector>,
    ) -> RegistryResult<()> {
        if namespace.is_empty() || handler.name().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let name = handler.name();
        let replaced = self
            .heuristics
            .entry(namespace.to_string())
            .or_default()
            .insert(priority, handler);
        if replaced {
            info!(namespace, heuristic = name, priority, "heuristic replaced");
        } else {
            debug!(namespace, heuristic = name, priority, "heuristic added");
        }
        Ok(())
    }

    /// Add a heuristic after every existing entry of the chain.
    ///
    /// Returns the priority it was given.
    pub fn append_heuristic(
        &mut self,
        namespace: &str,
        handler: Arc<dyn HeuristicDissector>,
    ) -> RegistryResult<u32> {
        let name = handler.name();
        let priority = self.heuristics.get(namespace).map_or(0, |chain| {
            // A re-appended entry must not count itself
            chain
                .iter()
                .filter(|e| e.name() != name)
                .map(|e| e.priority.saturating_add(1))
                .max()
                .unwrap_or(0)
        });
        self.add_heuristic(namespace, priority, handler)?;
        Ok(priority)
    }

    /// Remove a heuristic by dissector name.
    pub fn remove_heuristic(&mut self, namespace: &str, name: &str) -> bool {
        let Some(chain) = self.heuristics.get_mut(namespace) else {
            return false;
        };
        let removed = chain.remove(name);
        if chain.is_empty() {
            self.heuristics.remove(namespace);
        }
        removed
    }

    /// Enable or disable a heuristic without removing it.
    pub fn set_heuristic_enabled(&mut self, namespace: &str, name: &str, enabled: bool) -> bool {
        self.heuristics
            .get_mut(namespace)
            .is_some_and(|chain| chain.set_enabled(name, enabled))
    }

    /// Heuristic names of a chain in evaluation order.
    pub fn heuristic_names(&self, namespace: &str) -> Vec<&'static str> {
        self.heuristics
            .get(namespace)
            .map(|chain| chain.iter().map(|e| e.name()).collect())
            .unwrap_or_default()
    }

    // === Named dissectors ===

    /// Make `handler` callable by name.
    pub fn register_dissector(&mut self, handler: Arc<dyn Dissector>) -> RegistryResult<()> {
        let name = handler.name();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        self.dissectors.insert(name, handler);
        Ok(())
    }

    /// Dissector registered under `name`.
    pub fn find_dissector(&self, name: &str) -> Option<Arc<dyn Dissector>> {
        self.dissectors.get(name).cloned()
    }

    /// All registered dissector names, sorted.
    pub fn dissector_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.dissectors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    // === Dispatch ===

    /// Route `cursor` by one key.
    pub fn dispatch<'a>(
        &self,
        namespace: &str,
        key: u64,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<DispatchOutcome> {
        self.dispatch_keys(namespace, &[key], cursor, tree, ctx)
    }

    /// Route `cursor` by several candidate keys.
    ///
    /// Each key is tried for an exact match in order, then the heuristic
    /// chain runs once, then the fallback. Errors other than
    /// [`crate::DissectError::RecursionLimitExceeded`] are absorbed into the tree.
    pub fn dispatch_keys<'a>(
        &self,
        namespace: &str,
        keys: &[u64],
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<DispatchOutcome> {
        if let Some(table) = self.tables.get(namespace) {
            for key in keys {
                if let Some(handler) = table.get(*key) {
                    debug!(
                        namespace,
                        key,
                        dissector = handler.name(),
                        "exact match"
                    );
                    return self.invoke(handler.as_ref(), MatchKind::Exact, cursor, tree, ctx);
                }
            }
        }

        if let Some(chain) = self.heuristics.get(namespace) {
            for entry in chain.iter().filter(|e| e.enabled) {
                if entry.handler.accepts(&cursor, ctx) {
                    debug!(namespace, dissector = entry.name(), "heuristic match");
                    return self.invoke(
                        entry.handler.as_ref(),
                        MatchKind::Heuristic,
                        cursor,
                        tree,
                        ctx,
                    );
                }
                trace!(namespace, heuristic = entry.name(), "heuristic rejected");
            }
        }

        debug!(namespace, ?keys, "no dissector matched, using fallback");
        self.invoke(self.fallback.as_ref(), MatchKind::Fallback, cursor, tree, ctx)
    }

    /// Invoke the dissector registered as `name` directly.
    ///
    /// An unknown name falls back to opaque data.
    pub fn call<'a>(
        &self,
        name: &str,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<DispatchOutcome> {
        match self.dissectors.get(name) {
            Some(handler) => self.invoke(handler.as_ref(), MatchKind::Direct, cursor, tree, ctx),
            None => {
                debug!(dissector = name, "unknown dissector, using fallback");
                self.invoke(self.fallback.as_ref(), MatchKind::Fallback, cursor, tree, ctx)
            }
        }
    }

    /// Run one handler behind the recursion guard and error boundary.
    fn invoke<'a, D: Dissector + ?Sized>(
        &self,
        handler: &D,
        match_kind: MatchKind,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<DispatchOutcome> {
        let name = handler.name();
        ctx.enter(name)?;
        let mark = tree.child_count();
        let result = handler.dissect(cursor, tree, ctx);
        ctx.leave();

        match result {
            Ok(consumed) => Ok(DispatchOutcome {
                dissector: name,
                match_kind,
                consumed: consumed.min(cursor.reported_len()),
                error: None,
            }),
            Err(err) if err.is_fatal_to_packet() => Err(err),
            Err(err) => {
                warn!(
                    dissector = name,
                    frame = ctx.frame_number(),
                    offset = cursor.start(),
                    error = %err,
                    "dissector failed, subtree replaced by malformed data"
                );
                tree.truncate_children(mark);
                tree.add_malformed(&cursor, 0, &err);
                ctx.columns_mut().append_sep(COL_INFO, " ", "[Malformed]");
                Ok(DispatchOutcome {
                    dissector: name,
                    match_kind,
                    consumed: cursor.reported_len(),
                    error: Some(err.kind()),
                })
            }
        }
    }
}

impl Default for DissectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DissectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut heuristics: Vec<&str> = self.heuristics.keys().map(String::as_str).collect();
        heuristics.sort_unstable();
        f.debug_struct("DissectorRegistry")
            .field("tables", &self.table_names())
            .field("heuristics", &heuristics)
            .field("dissectors", &self.dissector_names())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
