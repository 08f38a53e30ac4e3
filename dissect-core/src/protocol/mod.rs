//! Built-in protocol dissectors.
//!
//! Each module is an application of the engine: it reads through a
//! [`ByteCursor`](crate::cursor::ByteCursor), appends to the field tree and
//! hands payloads off through the registry.
//!
//! ## Supported Protocols
//!
//! | Module | Bound on | Notes |
//! |--------|----------|-------|
//! | `data` | fallback | Opaque bytes nothing else claimed |
//! | `ssl` | `tcp.port` 443, heuristic | SSLv2, SSLv3, TLS, PCT; version pinned per conversation |
//! | `mgcp` | `udp.port` 2427/2727, heuristic | Request/response matching |
//! | `lapd` | `link.type` 203 | Bit-packed address, CRC-16 FCS, `lapd.sapi` table |
//!
//! ## Example
//!
//! ```rust
//! use dissect_core::protocol::default_registry;
//!
//! let registry = default_registry();
//! assert_eq!(registry.lookup("tcp.port", 443), Some("ssl"));
//! assert_eq!(registry.lookup("udp.port", 2427), Some("mgcp"));
//! ```

pub mod data;
mod lapd;
mod mgcp;
mod ssl;

// Test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use tracing::error;

use crate::config::LINK_TYPE_TABLE;
use crate::error::RegistryError;
use crate::registry::{DissectorRegistry, KeyWidth};

pub use data::DataDissector;
pub use lapd::{sapi as lapd_sapi, LapdDissector, LAPD_SAPI_TABLE, LINKTYPE_LAPD};
pub use mgcp::{MgcpDissector, MGCP_CALLAGENT_PORT, MGCP_GATEWAY_PORT};
pub use ssl::{version_from_wire as ssl_version_from_wire, SslDissector, SSL_PORT};

/// Port table of TCP.
pub const TCP_PORT_TABLE: &str = "tcp.port";
/// Port table of UDP.
pub const UDP_PORT_TABLE: &str = "udp.port";
/// Port table of SCTP.
pub const SCTP_PORT_TABLE: &str = "sctp.port";

/// Declare the standard tables and register every built-in dissector.
pub fn register_builtins(registry: &mut DissectorRegistry) -> Result<(), RegistryError> {
    // Tables
    registry.register_table(TCP_PORT_TABLE, KeyWidth::U16)?;
    registry.register_table(UDP_PORT_TABLE, KeyWidth::U16)?;
    registry.register_table(SCTP_PORT_TABLE, KeyWidth::U16)?;
    registry.register_table(LINK_TYPE_TABLE, KeyWidth::U16)?;
    registry.register_table(LAPD_SAPI_TABLE, KeyWidth::U8)?;

    // SSL/TLS
    let ssl = Arc::new(SslDissector);
    registry.bind(TCP_PORT_TABLE, u64::from(SSL_PORT), ssl.clone())?;
    registry.append_heuristic(TCP_PORT_TABLE, ssl.clone())?;
    registry.register_dissector(ssl)?;

    // MGCP
    let mgcp = Arc::new(MgcpDissector);
    registry.bind(UDP_PORT_TABLE, u64::from(MGCP_GATEWAY_PORT), mgcp.clone())?;
    registry.bind(UDP_PORT_TABLE, u64::from(MGCP_CALLAGENT_PORT), mgcp.clone())?;
    registry.append_heuristic(UDP_PORT_TABLE, mgcp.clone())?;
    registry.register_dissector(mgcp)?;

    // LAPD
    let lapd = Arc::new(LapdDissector::default());
    registry.bind(LINK_TYPE_TABLE, u64::from(LINKTYPE_LAPD), lapd.clone())?;
    registry.register_dissector(lapd)?;

    Ok(())
}

/// Create a registry with all built-in dissectors.
pub fn default_registry() -> DissectorRegistry {
    let mut registry = DissectorRegistry::new();
    if let Err(err) = register_builtins(&mut registry) {
        error!(error = %err, "built-in dissector registration failed");
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = default_registry();

        assert_eq!(registry.lookup(TCP_PORT_TABLE, 443), Some("ssl"));
        assert_eq!(registry.lookup(UDP_PORT_TABLE, 2427), Some("mgcp"));
        assert_eq!(registry.lookup(UDP_PORT_TABLE, 2727), Some("mgcp"));
        assert_eq!(registry.lookup(LINK_TYPE_TABLE, 203), Some("lapd"));
        assert_eq!(registry.heuristic_names(TCP_PORT_TABLE), vec!["ssl"]);
        assert_eq!(registry.heuristic_names(UDP_PORT_TABLE), vec!["mgcp"]);
        assert!(registry.has_table(LAPD_SAPI_TABLE));
        assert_eq!(registry.dissector_names(), vec!["data", "lapd", "mgcp", "ssl"]);
    }

    #[test]
    fn test_register_builtins_is_repeatable() {
        let mut registry = default_registry();
        register_builtins(&mut registry).unwrap();
        assert_eq!(registry.binding_count(UDP_PORT_TABLE), 2);
        assert_eq!(registry.heuristic_names(UDP_PORT_TABLE), vec!["mgcp"]);
    }
}
