//! Convenient re-exports for common usage.
//!
//! This module provides a curated set of the most commonly used types
//! from dissect-core, for writing dissectors or driving the engine with a
//! single `use` statement.
//!
//! # Example
//!
//! ```rust
//! use dissect_core::prelude::*;
//!
//! // Engine with every built-in dissector registered
//! let engine = Engine::with_defaults();
//! let packet = Packet::new(1, 0, vec![0xde, 0xad]);
//! let dissection = engine.dissect(&packet);
//! assert_eq!(dissection.columns.protocol(), "Data");
//! ```

// Engine types
pub use crate::config::EngineConfig;
pub use crate::engine::{Dissection, Engine};
pub use crate::packet::{Endpoint, FlowTuple, Packet, PacketInfo, Transport};

// Dissector-writing types
pub use crate::context::{DissectionContext, COL_INFO, COL_PROTOCOL};
pub use crate::conversation::{ConversationKey, ProtocolVersion, VersionState};
pub use crate::cursor::{ByteCursor, Endianness};
pub use crate::registry::{Dissector, DissectorRegistry, HeuristicDissector, KeyWidth};
pub use crate::tree::{Annotation, FieldValue, TreeNode};

// Protocol registry
pub use crate::protocol::default_registry;

// Error types
pub use crate::error::{DissectError, Error, Result};
