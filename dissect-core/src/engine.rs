//! Top-level packet dissection.

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context::{Columns, DissectionContext};
use crate::conversation::ConversationTable;
use crate::cursor::ByteCursor;
use crate::error::Error;
use crate::packet::Packet;
use crate::protocol::register_builtins;
use crate::registry::{DispatchOutcome, DissectorRegistry};
use crate::tree::{FieldTree, FinalizedTree};

/// Result of dissecting one packet.
#[derive(Debug, Clone)]
pub struct Dissection<'p> {
    pub frame_number: u64,
    pub tree: FinalizedTree<'p>,
    pub columns: Columns,
    /// Outcome of the top-level dispatch; `None` if the packet was abandoned.
    pub outcome: Option<DispatchOutcome>,
    /// The recursion limit was hit and the packet was abandoned.
    pub abandoned: bool,
}

impl Dissection<'_> {
    /// Whether any part of the packet failed to decode.
    pub fn has_errors(&self) -> bool {
        self.abandoned || self.tree.has_malformed()
    }
}

/// The dissection engine: a registry, a conversation table and their
/// configuration.
///
/// `dissect` takes `&self`, so one engine can be shared across worker
/// threads; conversation state is synchronized internally.
#[derive(Debug)]
pub struct Engine {
    registry: DissectorRegistry,
    conversations: ConversationTable,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: DissectorRegistry, config: EngineConfig) -> Self {
        Self {
            conversations: ConversationTable::from_config(&config),
            registry,
            config,
        }
    }

    /// Engine with every built-in dissector registered.
    pub fn with_defaults() -> Self {
        Self::new(crate::protocol::default_registry(), EngineConfig::default())
    }

    /// Add the built-in dissectors to an application's own registry.
    ///
    /// Fails if the registry already declares one of the standard tables
    /// with a different key width.
    pub fn with_builtins(
        mut registry: DissectorRegistry,
        config: EngineConfig,
    ) -> std::result::Result<Self, Error> {
        register_builtins(&mut registry)?;
        Ok(Self::new(registry, config))
    }

    pub fn registry(&self) -> &DissectorRegistry {
        &self.registry
    }

    /// Mutable registry, for rebinding on preference changes.
    pub fn registry_mut(&mut self) -> &mut DissectorRegistry {
        &mut self.registry
    }

    pub fn conversations(&self) -> &ConversationTable {
        &self.conversations
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dissect one packet. Never fails.
    ///
    /// Packets with a flow are dispatched through their transport's port
    /// table, lower port first. Packets without one go through the link
    /// type table.
    pub fn dissect<'p>(&self, packet: &'p Packet) -> Dissection<'p> {
        match packet.flow {
            Some(flow) => match self.config.transport_table(flow.transport) {
                Some(namespace) => self.dissect_in(packet, namespace, &flow.ports_low_first()),
                None => self.dissect_in(packet, "", &[]),
            },
            None => self.dissect_in(packet, &self.config.link_table, &[u64::from(packet.link_type)]),
        }
    }

    /// Dissect one packet starting from an explicit table and keys.
    pub fn dissect_in<'p>(&self, packet: &'p Packet, namespace: &str, keys: &[u64]) -> Dissection<'p> {
        let cursor = ByteCursor::new(packet.data(), packet.reported_len());
        let mut tree = FieldTree::new("frame", packet.reported_len());
        let mut ctx = DissectionContext::new(
            &self.registry,
            &self.conversations,
            packet.info(),
            self.config.max_recursion_depth,
        );

        let result = {
            let mut root = tree.root_mut();
            let result = self
                .registry
                .dispatch_keys(namespace, keys, cursor, &mut root, &mut ctx);
            if let Err(err) = &result {
                warn!(
                    frame = packet.frame_number,
                    error = %err,
                    "packet abandoned"
                );
                root.truncate_children(0);
                root.add_malformed(&cursor, 0, err);
            }
            result
        };

        let abandoned = result.is_err() || ctx.is_aborted();
        debug!(
            frame = packet.frame_number,
            namespace,
            dissector = result.as_ref().map(|o| o.dissector).unwrap_or("none"),
            abandoned,
            "packet dissected"
        );

        Dissection {
            frame_number: packet.frame_number,
            tree: tree.finalize(),
            columns: ctx.into_columns(),
            outcome: result.ok(),
            abandoned,
        }
    }
}
