//! Engine configuration and configurable-port bindings.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::RegistryError;
use crate::packet::Transport;
use crate::registry::{Dissector, DissectorRegistry};

/// Dispatch table used for packets without a flow.
pub const LINK_TYPE_TABLE: &str = "link.type";

/// Configuration for the [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling for nested dispatch.
    pub max_recursion_depth: usize,
    /// Conversation table shards (rounded up to a power of two).
    pub conversation_shards: usize,
    /// Idle time after which a conversation may be expired (microseconds).
    pub conversation_idle_timeout_us: i64,
    /// Transactions kept per conversation before eviction.
    pub max_transactions_per_conversation: usize,
    /// Dispatch namespace of each transport's port table.
    pub transport_tables: HashMap<Transport, String>,
    /// Dispatch namespace for packets that carry only a link type.
    pub link_table: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let transport_tables = [
            (Transport::Tcp, "tcp.port"),
            (Transport::Udp, "udp.port"),
            (Transport::Sctp, "sctp.port"),
        ]
        .into_iter()
        .map(|(transport, table)| (transport, table.to_string()))
        .collect();

        Self {
            max_recursion_depth: 32,
            conversation_shards: 16,
            conversation_idle_timeout_us: 300_000_000, // 5 minutes
            max_transactions_per_conversation: 4096,
            transport_tables,
            link_table: LINK_TYPE_TABLE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_conversation_shards(mut self, shards: usize) -> Self {
        self.conversation_shards = shards;
        self
    }

    pub fn with_conversation_idle_timeout_us(mut self, timeout_us: i64) -> Self {
        self.conversation_idle_timeout_us = timeout_us;
        self
    }

    pub fn with_max_transactions_per_conversation(mut self, max: usize) -> Self {
        self.max_transactions_per_conversation = max;
        self
    }

    /// Route a transport to a different port table.
    pub fn with_transport_table(mut self, transport: Transport, namespace: &str) -> Self {
        self.transport_tables
            .insert(transport, namespace.to_string());
        self
    }

    /// Port table of `transport`, if one is configured.
    pub fn transport_table(&self, transport: Transport) -> Option<&str> {
        self.transport_tables.get(&transport).map(String::as_str)
    }
}

/// A user-configurable key binding (typically a port number).
///
/// Remembers which key is currently bound so that a changed preference
/// unbinds the old key before binding the new one.
pub struct PortPreference {
    namespace: String,
    handler: Arc<dyn Dissector>,
    current: Option<u64>,
}

impl PortPreference {
    pub fn new(namespace: &str, handler: Arc<dyn Dissector>) -> Self {
        Self {
            namespace: namespace.to_string(),
            handler,
            current: None,
        }
    }

    /// Currently bound key.
    pub fn current(&self) -> Option<u64> {
        self.current
    }

    /// Bind `value` (or nothing, for `None`), replacing the previous key.
    ///
    /// Applying the same value again changes nothing.
    pub fn apply(
        &mut self,
        registry: &mut DissectorRegistry,
        value: Option<u64>,
    ) -> Result<(), RegistryError> {
        if value == self.current {
            return Ok(());
        }

        if let Some(new) = value {
            // Bind first so an invalid key leaves the old binding in place
            registry.bind(&self.namespace, new, Arc::clone(&self.handler))?;
        }
        if let Some(old) = self.current {
            // Only drop the old key if it is still ours
            if registry.lookup(&self.namespace, old) == Some(self.handler.name()) {
                registry.unbind(&self.namespace, old)?;
            }
        }

        info!(
            namespace = %self.namespace,
            dissector = self.handler.name(),
            old = ?self.current,
            new = ?value,
            "port preference applied"
        );
        self.current = value;
        Ok(())
    }
}

impl std::fmt::Debug for PortPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortPreference")
            .field("namespace", &self.namespace)
            .field("dissector", &self.handler.name())
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::data::DataDissector;
    use crate::registry::KeyWidth;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_recursion_depth, 32);
        assert_eq!(config.transport_table(Transport::Udp), Some("udp.port"));
        assert_eq!(config.transport_table(Transport::Other(47)), None);

        let config = config
            .with_max_recursion_depth(4)
            .with_transport_table(Transport::Other(47), "gre.port");
        assert_eq!(config.max_recursion_depth, 4);
        assert_eq!(config.transport_table(Transport::Other(47)), Some("gre.port"));
    }

    #[test]
    fn test_port_preference_rebinding() {
        let mut registry = DissectorRegistry::new();
        registry.register_table("udp.port", KeyWidth::U16).unwrap();
        let mut pref = PortPreference::new("udp.port", Arc::new(DataDissector));

        pref.apply(&mut registry, Some(2427)).unwrap();
        for port in [2427, 3000, 3000, 2427, 4000] {
            pref.apply(&mut registry, Some(port)).unwrap();
        }
        assert_eq!(pref.current(), Some(4000));
        assert_eq!(registry.entries("udp.port"), vec![(4000, "data")]);

        assert!(pref.apply(&mut registry, Some(70_000)).is_err());
        assert_eq!(pref.current(), Some(4000));
        assert_eq!(registry.binding_count("udp.port"), 1);

        pref.apply(&mut registry, None).unwrap();
        assert_eq!(registry.binding_count("udp.port"), 0);
    }

    #[test]
    fn test_port_preference_leaves_foreign_binding() {
        let mut registry = DissectorRegistry::new();
        registry.register_table("udp.port", KeyWidth::U16).unwrap();
        let mut pref = PortPreference::new("udp.port", Arc::new(DataDissector));
        pref.apply(&mut registry, Some(5000)).unwrap();

        // Another module took the key over
        registry
            .bind("udp.port", 5000, Arc::new(crate::protocol::MgcpDissector::default()))
            .unwrap();
        pref.apply(&mut registry, Some(5001)).unwrap();
        assert_eq!(registry.lookup("udp.port", 5000), Some("mgcp"));
        assert_eq!(registry.lookup("udp.port", 5001), Some("data"));
    }
}
