//! # dissect-core
//!
//! Protocol-agnostic packet dissection engine.
//!
//! This crate provides the machinery every protocol dissector is built on:
//! bounds-checked byte access, table and heuristic dispatch, per-flow
//! conversation state and the hierarchical field tree a packet decodes
//! into. A handful of built-in dissectors show how protocols plug in.
//!
//! ## Features
//!
//! - **Byte Cursors**: Every read is checked against the captured bytes;
//!   truncation is a value, never a panic
//! - **Dispatch Registry**: Exact-match tables (ports, link types, SAPIs)
//!   with ordered heuristic chains and a generic fallback
//! - **Conversations**: Sharded per-flow state for version pinning and
//!   request/response matching
//! - **Field Trees**: Every decoded field knows the absolute bytes it came from
//!
//! ## Quick Start
//!
//! ```rust
//! use dissect_core::prelude::*;
//!
//! let engine = Engine::with_defaults();
//!
//! let payload = b"RSIP 1 *@gw.example.net MGCP 1.0\r\nRM: restart\r\n".to_vec();
//! let flow = FlowTuple::new(
//!     Transport::Udp,
//!     Endpoint::new([192, 0, 2, 1], 2727),
//!     Endpoint::new([192, 0, 2, 10], 2427),
//! );
//! let packet = Packet::new(1, 0, payload).with_flow(flow);
//!
//! let dissection = engine.dissect(&packet);
//! assert_eq!(dissection.columns.protocol(), "MGCP");
//! assert!(!dissection.has_errors());
//! print!("{}", dissection.tree.render());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        dissect-core                                 |
//! +---------------------------------------------------------------------+
//! |  cursor/       - ByteCursor, bit fields, checksums                  |
//! |  tree/         - FieldTree, TreeNode, FinalizedTree, FieldValue     |
//! |  registry/     - Dissector traits, tables, heuristic chains         |
//! |  conversation/ - ConversationTable, version pinning, transactions   |
//! |  context.rs    - Per-packet DissectionContext and columns           |
//! |  engine.rs     - Engine: packet in, Dissection out                  |
//! |  protocol/     - Built-in dissectors (data, ssl, mgcp, lapd)        |
//! |  error.rs      - Error types                                        |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Supported Protocols
//!
//! | Layer | Protocols |
//! |-------|-----------|
//! | Link | LAPD (Q.921) |
//! | Application | SSL/TLS record layer, MGCP |

pub mod config;
pub mod context;
pub mod conversation;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod packet;
pub mod prelude;
pub mod protocol;
pub mod registry;
pub mod tree;

// Re-export commonly used types at crate root for convenience
pub use config::{EngineConfig, PortPreference, LINK_TYPE_TABLE};
pub use context::{Columns, DissectionContext, COL_INFO, COL_PROTOCOL};
pub use conversation::{
    ConversationKey, ConversationRecord, ConversationTable, ProtocolVersion, VersionState,
};
pub use cursor::{ByteCursor, ChecksumAlgorithm, ChecksumStatus, Endianness, PartialView};
pub use engine::{Dissection, Engine};
pub use error::{DissectError, Error, ErrorKind, RegistryError, Result};
pub use packet::{Endpoint, FlowTuple, Packet, PacketInfo, Transport};
pub use protocol::default_registry;
pub use registry::{
    DispatchOutcome, Dissector, DissectorRegistry, HeuristicDissector, KeyWidth, MatchKind,
};
pub use tree::{
    Annotation, FieldNode, FieldTree, FieldValue, FinalizedTree, NodeKind, OwnedFieldValue,
    TreeNode,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
