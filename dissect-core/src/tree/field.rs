//! Values carried by field nodes.
//!
//! A value decoded from the packet borrows the packet buffer for as long
//! as the tree does. Values a dissector has to assemble, such as a version
//! name, are owned. [`FinalizedTree::into_owned`](super::FinalizedTree::into_owned)
//! detaches a whole tree by copying every borrowed value.

use compact_str::CompactString;

/// Typed value of a field node.
#[derive(Debug, Clone)]
pub enum FieldValue<'data> {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Int32(i32),
    Bool(bool),
    /// Text as it appears in the packet (an MGCP verb, an endpoint name).
    Str(&'data str),
    /// Raw bytes of the packet.
    Bytes(&'data [u8]),
    /// Text built by the dissector. Inline up to 24 bytes.
    OwnedString(CompactString),
    OwnedBytes(Vec<u8>),
}

/// A value that no longer borrows the packet.
pub type OwnedFieldValue = FieldValue<'static>;

impl<'data> FieldValue<'data> {
    /// Owned string from anything string-like.
    pub fn string(value: impl AsRef<str>) -> Self {
        FieldValue::OwnedString(CompactString::new(value.as_ref()))
    }

    /// Unsigned integer value, widened.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt8(v) => Some(u64::from(*v)),
            FieldValue::UInt16(v) => Some(u64::from(*v)),
            FieldValue::UInt32(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    /// Text value, borrowed or owned.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::OwnedString(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Copy borrowed text and bytes so the value outlives the packet.
    pub fn detach(&self) -> OwnedFieldValue {
        match self {
            FieldValue::UInt8(v) => FieldValue::UInt8(*v),
            FieldValue::UInt16(v) => FieldValue::UInt16(*v),
            FieldValue::UInt32(v) => FieldValue::UInt32(*v),
            FieldValue::Int32(v) => FieldValue::Int32(*v),
            FieldValue::Bool(v) => FieldValue::Bool(*v),
            FieldValue::Str(s) => FieldValue::OwnedString(CompactString::new(s)),
            FieldValue::Bytes(b) => FieldValue::OwnedBytes(b.to_vec()),
            FieldValue::OwnedString(s) => FieldValue::OwnedString(s.clone()),
            FieldValue::OwnedBytes(b) => FieldValue::OwnedBytes(b.clone()),
        }
    }
}

impl std::fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::UInt8(v) => write!(f, "{v}"),
            FieldValue::UInt16(v) => write!(f, "{v}"),
            FieldValue::UInt32(v) => write!(f, "{v}"),
            FieldValue::Int32(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::OwnedString(s) => f.write_str(s),
            FieldValue::Bytes(b) => write!(f, "[{} bytes]", b.len()),
            FieldValue::OwnedBytes(b) => write!(f, "[{} bytes]", b.len()),
        }
    }
}

// Borrowed and owned forms of the same text or bytes compare equal
impl<'b> PartialEq<FieldValue<'b>> for FieldValue<'_> {
    fn eq(&self, other: &FieldValue<'b>) -> bool {
        match (self, other) {
            (FieldValue::UInt8(a), FieldValue::UInt8(b)) => a == b,
            (FieldValue::UInt16(a), FieldValue::UInt16(b)) => a == b,
            (FieldValue::UInt32(a), FieldValue::UInt32(b)) => a == b,
            (FieldValue::Int32(a), FieldValue::Int32(b)) => a == b,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => a == b,
            (FieldValue::Bytes(a), FieldValue::OwnedBytes(b)) => *a == b.as_slice(),
            (FieldValue::OwnedBytes(a), FieldValue::Bytes(b)) => a.as_slice() == *b,
            (FieldValue::OwnedBytes(a), FieldValue::OwnedBytes(b)) => a == b,
            _ => match (self.as_str(), other.as_str()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_borrow_the_packet() {
        let packet = vec![0x45, 0x00, 0x00, 0x28, 0xde, 0xad, 0xbe, 0xef];
        let FieldValue::Bytes(b) = FieldValue::Bytes(&packet[4..]) else {
            panic!("expected Bytes");
        };
        assert_eq!(b, &[0xde, 0xad, 0xbe, 0xef]);
        assert!(std::ptr::eq(b.as_ptr(), packet[4..].as_ptr()));
    }

    #[test]
    fn test_borrowed_and_owned_text_compare_equal() {
        let borrowed = FieldValue::Str("CRCX");
        let owned = FieldValue::string("CRCX");

        assert_eq!(borrowed, owned);
        assert_eq!(owned, borrowed);
        assert_ne!(borrowed, FieldValue::Str("DLCX"));
        assert_ne!(borrowed, FieldValue::Bytes(b"CRCX"));
    }

    #[test]
    fn test_detach() {
        let owned: OwnedFieldValue = {
            let packet = b"200 OK".to_vec();
            let borrowed = FieldValue::Bytes(&packet[..]);
            let owned = borrowed.detach();
            assert_eq!(borrowed, owned);
            owned
        };
        assert_eq!(owned, FieldValue::OwnedBytes(b"200 OK".to_vec()));
        assert_eq!(FieldValue::Int32(-5).detach(), FieldValue::Int32(-5));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(FieldValue::UInt16(443).as_u64(), Some(443));
        assert_eq!(FieldValue::Int32(-5).as_u64(), None);
        assert_eq!(FieldValue::string("TLSv1.2").as_str(), Some("TLSv1.2"));
        assert_eq!(FieldValue::Bytes(b"x").as_str(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(FieldValue::UInt8(7).to_string(), "7");
        assert_eq!(FieldValue::Int32(-40).to_string(), "-40");
        assert_eq!(FieldValue::Bytes(&[1, 2, 3]).to_string(), "[3 bytes]");
        assert_eq!(FieldValue::string("TLS 1.2").to_string(), "TLS 1.2");
    }
}
