//! Error types for dissect-core.
//!
//! This module provides structured error types for all dissect-core operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`DissectError`] - Errors raised while decoding a packet
//! - [`RegistryError`] - Errors raised while registering dissectors
//!
//! Decode errors never escape [`Engine::dissect`](crate::Engine::dissect): they are
//! caught at the handler boundary and recorded in the field tree as malformed
//! leaves. Non-fatal observations (partial data, duplicate transactions,
//! unsolicited responses) are not errors at all; see [`crate::tree::Annotation`].

use thiserror::Error;

/// Main error type for dissect-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error while decoding packet bytes
    #[error("Dissection error: {0}")]
    Dissect(#[from] DissectError),

    /// Error while registering or binding dissectors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors raised while decoding packet bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DissectError {
    /// A read or strict sub-view reached past the captured bytes of a window.
    ///
    /// This is the out-of-bounds class: it covers both snapshot truncation and
    /// requests that run off the end of the buffer altogether.
    #[error("truncated: need {needed} bytes at offset {offset}, only {captured} captured")]
    Truncated {
        offset: usize,
        needed: usize,
        captured: usize,
    },

    /// Internally inconsistent lengths or field combinations.
    #[error("malformed: {reason}")]
    Malformed { reason: String },

    /// A handler tried to record a field outside the bytes it was given.
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Nested hand-off exceeded the configured depth.
    #[error("recursion limit exceeded (depth {depth}, limit {limit})")]
    RecursionLimitExceeded { depth: usize, limit: usize },
}

impl DissectError {
    /// Shorthand for a [`DissectError::Malformed`] error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        DissectError::Malformed {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`DissectError::InvariantViolation`] error.
    pub fn invariant(reason: impl Into<String>) -> Self {
        DissectError::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// The copyable classification stored in malformed tree leaves.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DissectError::Truncated { .. } => ErrorKind::Truncated,
            DissectError::Malformed { .. } => ErrorKind::Malformed,
            DissectError::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            DissectError::RecursionLimitExceeded { .. } => ErrorKind::RecursionLimitExceeded,
        }
    }

    /// Whether this error must abandon the whole packet instead of a single subtree.
    pub fn is_fatal_to_packet(&self) -> bool {
        matches!(self, DissectError::RecursionLimitExceeded { .. })
    }
}

/// Classification of a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Truncated,
    Malformed,
    InvariantViolation,
    RecursionLimitExceeded,
}

impl ErrorKind {
    /// Return a string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Truncated => "truncated",
            ErrorKind::Malformed => "malformed",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::RecursionLimitExceeded => "recursion_limit_exceeded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors related to dissector registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Binding into a namespace that was never declared
    #[error("unknown dissector table: {namespace}")]
    UnknownTable { namespace: String },

    /// Re-declaring a table with a different key width
    #[error("table {namespace} already declared with {existing}-bit keys, not {requested}-bit")]
    ConflictingTable {
        namespace: String,
        existing: u8,
        requested: u8,
    },

    /// Key does not fit the table's key width
    #[error("key {key:#x} does not fit {bits}-bit table {namespace}")]
    KeyOutOfRange {
        namespace: String,
        key: u64,
        bits: u8,
    },

    /// Dissector names must be non-empty
    #[error("dissector name must not be empty")]
    EmptyName,
}

/// Result type alias for decode operations.
pub type Result<T> = std::result::Result<T, DissectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = DissectError::Truncated {
            offset: 4,
            needed: 2,
            captured: 5,
        };
        assert_eq!(err.kind(), ErrorKind::Truncated);
        assert!(!err.is_fatal_to_packet());

        let err = DissectError::RecursionLimitExceeded { depth: 33, limit: 32 };
        assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
        assert!(err.is_fatal_to_packet());

        assert_eq!(DissectError::malformed("x").kind(), ErrorKind::Malformed);
        assert_eq!(
            DissectError::invariant("x").kind(),
            ErrorKind::InvariantViolation
        );
    }

    #[test]
    fn test_error_display() {
        let err = DissectError::Truncated {
            offset: 10,
            needed: 4,
            captured: 12,
        };
        assert_eq!(
            err.to_string(),
            "truncated: need 4 bytes at offset 10, only 12 captured"
        );

        let err: Error = RegistryError::UnknownTable {
            namespace: "udp.port".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Registry error: unknown dissector table: udp.port"
        );
    }

    #[test]
    fn test_question_mark_wraps_both() {
        fn decode_then_register(data: &[u8]) -> std::result::Result<u8, Error> {
            let first = crate::ByteCursor::from_slice(data).read_u8(0)?;
            let mut registry = crate::DissectorRegistry::new();
            registry.register_table("", crate::KeyWidth::U8)?;
            Ok(first)
        }

        assert!(matches!(
            decode_then_register(&[]),
            Err(Error::Dissect(DissectError::Truncated { .. }))
        ));
        assert!(matches!(
            decode_then_register(&[1]),
            Err(Error::Registry(RegistryError::EmptyName))
        ));
    }
}
