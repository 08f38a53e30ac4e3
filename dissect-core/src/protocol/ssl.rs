//! SSL/TLS record layer.
//!
//! Decodes SSLv3/TLS records and SSLv2/PCT records, and pins the
//! negotiated version of the TCP conversation. Only server hellos are
//! authoritative: a client hello merely offers a version and could be
//! answered with a lower one. Once a conversation is pinned, later records
//! are decoded in the pinned format without probing.

use crate::context::{DissectionContext, COL_INFO, COL_PROTOCOL};
use crate::conversation::{ConversationKey, ProtocolVersion, VersionState};
use crate::cursor::ByteCursor;
use crate::error::{DissectError, Result};
use crate::registry::{Dissector, HeuristicDissector};
use crate::tree::{Annotation, FieldValue, TreeNode};

/// TLS/HTTPS port.
pub const SSL_PORT: u16 = 443;

/// SSLv3/TLS record header: type (1) + version (2) + length (2).
const V3_HEADER_LEN: usize = 5;

/// SSLv3/TLS content types.
mod content_type {
    pub const CHANGE_CIPHER_SPEC: u8 = 20;
    pub const ALERT: u8 = 21;
    pub const HANDSHAKE: u8 = 22;
    pub const APPLICATION_DATA: u8 = 23;
    pub const HEARTBEAT: u8 = 24;
}

/// SSLv3/TLS handshake types.
mod handshake_type {
    pub const HELLO_REQUEST: u8 = 0;
    pub const CLIENT_HELLO: u8 = 1;
    pub const SERVER_HELLO: u8 = 2;
    pub const NEW_SESSION_TICKET: u8 = 4;
    pub const ENCRYPTED_EXTENSIONS: u8 = 8;
    pub const CERTIFICATE: u8 = 11;
    pub const SERVER_KEY_EXCHANGE: u8 = 12;
    pub const CERTIFICATE_REQUEST: u8 = 13;
    pub const SERVER_HELLO_DONE: u8 = 14;
    pub const CERTIFICATE_VERIFY: u8 = 15;
    pub const CLIENT_KEY_EXCHANGE: u8 = 16;
    pub const FINISHED: u8 = 20;
}

/// SSLv2 and PCT message types.
mod v2_message {
    pub const CLIENT_HELLO: u8 = 1;
    /// CLIENT-MASTER-KEY in SSLv2, SERVER-HELLO in PCT.
    pub const CLIENT_MASTER_KEY: u8 = 2;
    pub const SERVER_HELLO: u8 = 4;
}

const EXT_SUPPORTED_VERSIONS: u16 = 43;

const WIRE_SSL2: u16 = 0x0002;
const WIRE_PCT: u16 = 0x8001;

/// Map a wire version to a protocol version.
pub fn version_from_wire(version: u16) -> Option<ProtocolVersion> {
    match version {
        WIRE_SSL2 => Some(ProtocolVersion::Ssl2),
        0x0300 => Some(ProtocolVersion::Ssl3),
        0x0301..=0x0304 => Some(ProtocolVersion::Tls {
            minor: (version & 0xff) as u8,
        }),
        WIRE_PCT => Some(ProtocolVersion::Pct),
        _ => None,
    }
}

fn handshake_name(msg_type: u8) -> Option<&'static str> {
    Some(match msg_type {
        handshake_type::HELLO_REQUEST => "Hello Request",
        handshake_type::CLIENT_HELLO => "Client Hello",
        handshake_type::SERVER_HELLO => "Server Hello",
        handshake_type::NEW_SESSION_TICKET => "New Session Ticket",
        handshake_type::ENCRYPTED_EXTENSIONS => "Encrypted Extensions",
        handshake_type::CERTIFICATE => "Certificate",
        handshake_type::SERVER_KEY_EXCHANGE => "Server Key Exchange",
        handshake_type::CERTIFICATE_REQUEST => "Certificate Request",
        handshake_type::SERVER_HELLO_DONE => "Server Hello Done",
        handshake_type::CERTIFICATE_VERIFY => "Certificate Verify",
        handshake_type::CLIENT_KEY_EXCHANGE => "Client Key Exchange",
        handshake_type::FINISHED => "Finished",
        _ => return None,
    })
}

/// Record framing of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordFormat {
    /// SSLv3 and TLS.
    V3,
    /// SSLv2 and PCT.
    V2,
}

impl RecordFormat {
    fn for_state(state: VersionState) -> Option<Self> {
        match state.version()? {
            ProtocolVersion::Ssl2 | ProtocolVersion::Pct => Some(RecordFormat::V2),
            _ => Some(RecordFormat::V3),
        }
    }

    /// Probe the bytes at `offset`. Side-effect free.
    fn detect(cursor: &ByteCursor<'_>, offset: usize) -> Option<Self> {
        if looks_like_v3(cursor, offset) {
            Some(RecordFormat::V3)
        } else if looks_like_v2(cursor, offset) {
            Some(RecordFormat::V2)
        } else {
            None
        }
    }
}

fn looks_like_v3(cursor: &ByteCursor<'_>, offset: usize) -> bool {
    let Ok(header) = cursor.bytes(offset, 3) else {
        return false;
    };
    (content_type::CHANGE_CIPHER_SPEC..=content_type::HEARTBEAT).contains(&header[0])
        && header[1] == 3
        && header[2] <= 4
}

fn looks_like_v2(cursor: &ByteCursor<'_>, offset: usize) -> bool {
    // Only the 2-byte header form is probed; hellos never need padding
    let Ok(header) = cursor.bytes(offset, 5) else {
        return false;
    };
    if header[0] & 0x80 == 0 {
        return false;
    }
    let version = u16::from_be_bytes([header[3], header[4]]);
    match header[2] {
        v2_message::CLIENT_HELLO => {
            matches!(version, WIRE_SSL2 | WIRE_PCT | 0x0300..=0x0304)
        }
        v2_message::SERVER_HELLO | v2_message::CLIENT_MASTER_KEY => {
            // The version of these sits one byte further in
            cursor
                .read_u16_be(offset + 5)
                .is_ok_and(|v| matches!(v, WIRE_SSL2 | WIRE_PCT))
                || cursor
                    .read_u16_be(offset + 4)
                    .is_ok_and(|v| v == WIRE_PCT)
        }
        _ => false,
    }
}

/// SSL/TLS record dissector.
#[derive(Debug, Clone, Copy, Default)]
pub struct SslDissector;

impl SslDissector {
    fn pin(
        &self,
        ctx: &mut DissectionContext<'_>,
        key: Option<&ConversationKey>,
        wire_version: u16,
        authoritative: bool,
    ) {
        let (Some(key), Some(version)) = (key, version_from_wire(wire_version)) else {
            return;
        };
        ctx.conversations().pin_state(key, version, authoritative);
    }

    /// One SSLv3/TLS record. Returns the bytes it spans.
    fn dissect_v3_record<'a>(
        &self,
        cursor: &ByteCursor<'a>,
        offset: usize,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
        key: Option<&ConversationKey>,
    ) -> Result<usize> {
        let content = cursor.read_u8(offset)?;
        let version = cursor.read_u16_be(offset + 1)?;
        let length = cursor.read_u16_be(offset + 3)? as usize;

        // A record may continue in a later segment
        let available = length.min(cursor.remaining_reported(offset + V3_HEADER_LEN));
        let mut record = tree.add_subtree(cursor, offset, V3_HEADER_LEN + available, "record")?;
        record.add_leaf(cursor, offset, 1, "content_type", FieldValue::UInt8(content))?;
        record.add_leaf(cursor, offset + 1, 2, "version", FieldValue::UInt16(version))?;
        record.add_leaf(cursor, offset + 3, 2, "length", FieldValue::UInt16(length as u16))?;

        let view = cursor.sub_view_partial(offset + V3_HEADER_LEN, available)?;
        let body = view.cursor;
        let missing = view.missing + (length - available);
        if missing > 0 {
            record.add_annotation(&body, 0, body.reported_len(), Annotation::PartialData { missing })?;
        }

        match content {
            content_type::HANDSHAKE => {
                let result = self.dissect_handshakes(&body, &mut record, ctx, key);
                match result {
                    Ok(()) => {}
                    // Decode what is present; the annotation marks the rest
                    Err(DissectError::Truncated { .. }) if missing > 0 => {}
                    Err(err) => return Err(err),
                }
            }
            content_type::CHANGE_CIPHER_SPEC => {
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Change Cipher Spec");
                record.add_leaf(&body, 0, body.reported_len(), "change_cipher_spec", FieldValue::Bytes(body.as_slice()))?;
            }
            content_type::ALERT => {
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Alert");
                record.add_leaf(&body, 0, body.reported_len(), "alert", FieldValue::Bytes(body.as_slice()))?;
            }
            content_type::APPLICATION_DATA => {
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Application Data");
                record.add_leaf(&body, 0, body.reported_len(), "encrypted_data", FieldValue::Bytes(body.as_slice()))?;
            }
            content_type::HEARTBEAT => {
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Heartbeat");
                record.add_leaf(&body, 0, body.reported_len(), "heartbeat", FieldValue::Bytes(body.as_slice()))?;
            }
            other => {
                return Err(DissectError::malformed(format!("unknown content type {other}")));
            }
        }

        Ok(V3_HEADER_LEN + available)
    }

    /// Handshake messages packed into one record body.
    fn dissect_handshakes<'a>(
        &self,
        body: &ByteCursor<'a>,
        record: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
        key: Option<&ConversationKey>,
    ) -> Result<()> {
        let mut pos = 0;
        while pos + 4 <= body.captured_len() {
            let msg_type = body.read_u8(pos)?;
            let length = body.read_u24_be(pos + 1)? as usize;

            let name = match handshake_name(msg_type) {
                Some(name) if pos + 4 + length <= body.reported_len() => name,
                // Encrypted handshake (e.g., Finished after Change Cipher Spec)
                _ => {
                    let rest = body.as_slice().get(pos..).unwrap_or_default();
                    record.add_leaf(body, pos, body.reported_len() - pos, "encrypted_handshake", FieldValue::Bytes(rest))?;
                    ctx.columns_mut().append_sep(COL_INFO, ", ", "Encrypted Handshake Message");
                    return Ok(());
                }
            };
            ctx.columns_mut().append_sep(COL_INFO, ", ", name);

            let mut message = record.add_subtree(body, pos, 4 + length, "handshake")?;
            message.set_value(FieldValue::Str(name));
            message.add_leaf(body, pos, 1, "handshake_type", FieldValue::UInt8(msg_type))?;
            message.add_leaf(body, pos + 1, 3, "length", FieldValue::UInt32(length as u32))?;

            let msg = body.sub_view_partial(pos + 4, length)?.cursor;
            match msg_type {
                handshake_type::CLIENT_HELLO => self.client_hello(&msg, &mut message, ctx, key)?,
                handshake_type::SERVER_HELLO => self.server_hello(&msg, &mut message, ctx, key)?,
                _ => {}
            }
            pos += 4 + length;
        }
        Ok(())
    }

    fn client_hello<'a>(
        &self,
        msg: &ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
        key: Option<&ConversationKey>,
    ) -> Result<()> {
        let version = msg.read_u16_be(0)?;
        tree.add_leaf(msg, 0, 2, "client_version", FieldValue::UInt16(version))?;
        // Offered, not negotiated
        self.pin(ctx, key, version, false);

        tree.add_leaf(msg, 2, 32, "random", FieldValue::Bytes(msg.bytes(2, 32)?))?;
        let sid_len = msg.read_u8(34)? as usize;
        tree.add_leaf(msg, 34, 1, "session_id_length", FieldValue::UInt8(sid_len as u8))?;
        if sid_len > 32 {
            return Err(DissectError::malformed(format!("session id length {sid_len} exceeds 32")));
        }
        tree.add_leaf(msg, 35, sid_len, "session_id", FieldValue::Bytes(msg.bytes(35, sid_len)?))?;

        let pos = 35 + sid_len;
        let suites_len = msg.read_u16_be(pos)? as usize;
        tree.add_leaf(msg, pos, 2, "cipher_suites_length", FieldValue::UInt16(suites_len as u16))?;
        if suites_len % 2 != 0 {
            return Err(DissectError::malformed("odd cipher suites length"));
        }
        tree.add_leaf(msg, pos + 2, suites_len, "cipher_suites", FieldValue::Bytes(msg.bytes(pos + 2, suites_len)?))?;
        Ok(())
    }

    fn server_hello<'a>(
        &self,
        msg: &ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
        key: Option<&ConversationKey>,
    ) -> Result<()> {
        let legacy_version = msg.read_u16_be(0)?;
        tree.add_leaf(msg, 0, 2, "server_version", FieldValue::UInt16(legacy_version))?;
        tree.add_leaf(msg, 2, 32, "random", FieldValue::Bytes(msg.bytes(2, 32)?))?;

        let sid_len = msg.read_u8(34)? as usize;
        tree.add_leaf(msg, 34, 1, "session_id_length", FieldValue::UInt8(sid_len as u8))?;
        if sid_len > 32 {
            return Err(DissectError::malformed(format!("session id length {sid_len} exceeds 32")));
        }
        tree.add_leaf(msg, 35, sid_len, "session_id", FieldValue::Bytes(msg.bytes(35, sid_len)?))?;

        let mut pos = 35 + sid_len;
        tree.add_leaf(msg, pos, 2, "cipher_suite", FieldValue::UInt16(msg.read_u16_be(pos)?))?;
        tree.add_leaf(msg, pos + 2, 1, "compression_method", FieldValue::UInt8(msg.read_u8(pos + 2)?))?;
        pos += 3;

        let mut negotiated = legacy_version;
        if pos + 2 <= msg.reported_len() {
            let ext_len = msg.read_u16_be(pos)? as usize;
            tree.add_leaf(msg, pos, 2, "extensions_length", FieldValue::UInt16(ext_len as u16))?;
            pos += 2;
            let end = pos + ext_len;
            if end > msg.reported_len() {
                return Err(DissectError::malformed("extensions overrun the server hello"));
            }

            while pos + 4 <= end {
                let ext_type = msg.read_u16_be(pos)?;
                let len = msg.read_u16_be(pos + 2)? as usize;
                if pos + 4 + len > end {
                    return Err(DissectError::malformed(format!("extension {ext_type} overruns the extension block")));
                }
                let mut ext = tree.add_subtree(msg, pos, 4 + len, "extension")?;
                ext.add_leaf(msg, pos, 2, "type", FieldValue::UInt16(ext_type))?;
                ext.add_leaf(msg, pos + 2, 2, "length", FieldValue::UInt16(len as u16))?;
                if ext_type == EXT_SUPPORTED_VERSIONS && len == 2 {
                    negotiated = msg.read_u16_be(pos + 4)?;
                    ext.add_leaf(msg, pos + 4, 2, "selected_version", FieldValue::UInt16(negotiated))?;
                }
                pos += 4 + len;
            }
        }

        // Pinned only once the whole hello decoded
        self.pin(ctx, key, negotiated, true);
        Ok(())
    }

    /// One SSLv2 or PCT record. Returns the bytes it spans.
    fn dissect_v2_record<'a>(
        &self,
        cursor: &ByteCursor<'a>,
        offset: usize,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
        key: Option<&ConversationKey>,
    ) -> Result<usize> {
        let first = cursor.read_u8(offset)?;
        let second = cursor.read_u8(offset + 1)?;
        let (header_len, length, padding) = if first & 0x80 != 0 {
            (2, (((first & 0x7f) as usize) << 8) | second as usize, 0)
        } else {
            let padding = cursor.read_u8(offset + 2)?;
            (3, (((first & 0x3f) as usize) << 8) | second as usize, padding)
        };
        if (padding as usize) > length {
            return Err(DissectError::malformed(format!("padding {padding} exceeds record length {length}")));
        }

        let available = length.min(cursor.remaining_reported(offset + header_len));
        let mut record = tree.add_subtree(cursor, offset, header_len + available, "record")?;
        record.add_leaf(cursor, offset, 2, "record_length", FieldValue::UInt16(length as u16))?;
        if header_len == 3 {
            record.add_leaf(cursor, offset + 2, 1, "padding_length", FieldValue::UInt8(padding))?;
        }

        let view = cursor.sub_view_partial(offset + header_len, available)?;
        let body = view.cursor;
        let missing = view.missing + (length - available);
        if missing > 0 {
            record.add_annotation(&body, 0, body.reported_len(), Annotation::PartialData { missing })?;
        }
        if body.is_empty() {
            return Ok(header_len + available);
        }

        let msg_type = body.read_u8(0)?;
        record.add_leaf(&body, 0, 1, "msg_type", FieldValue::UInt8(msg_type))?;
        match msg_type {
            v2_message::CLIENT_HELLO => {
                let version = body.read_u16_be(1)?;
                record.add_leaf(&body, 1, 2, "client_version", FieldValue::UInt16(version))?;
                self.pin(ctx, key, version, false);
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Client Hello");
            }
            v2_message::SERVER_HELLO => {
                record.add_leaf(&body, 1, 1, "session_id_hit", FieldValue::Bool(body.read_u8(1)? != 0))?;
                record.add_leaf(&body, 2, 1, "certificate_type", FieldValue::UInt8(body.read_u8(2)?))?;
                let version = body.read_u16_be(3)?;
                record.add_leaf(&body, 3, 2, "server_version", FieldValue::UInt16(version))?;
                self.pin(ctx, key, version, true);
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Server Hello");
            }
            v2_message::CLIENT_MASTER_KEY if body.read_u16_be(2).ok() == Some(WIRE_PCT) => {
                record.add_leaf(&body, 1, 1, "pad", FieldValue::UInt8(body.read_u8(1)?))?;
                record.add_leaf(&body, 2, 2, "server_version", FieldValue::UInt16(WIRE_PCT))?;
                self.pin(ctx, key, WIRE_PCT, true);
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Server Hello");
            }
            _ => {
                let len = body.reported_len() - 1;
                let bytes = body.as_slice().get(1..).unwrap_or_default();
                record.add_leaf(&body, 1, len, "encrypted_data", FieldValue::Bytes(bytes))?;
                ctx.columns_mut().append_sep(COL_INFO, ", ", "Encrypted Data");
            }
        }
        Ok(header_len + available)
    }
}

impl Dissector for SslDissector {
    fn name(&self) -> &'static str {
        "ssl"
    }

    fn display_name(&self) -> &'static str {
        "SSL"
    }

    fn dissect<'a>(
        &self,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<usize> {
        let key = ctx.flow().map(ConversationKey::from_flow);
        if let Some(key) = &key {
            ctx.conversations()
                .touch(key, ctx.frame_number(), ctx.timestamp_us());
        }

        let mut proto = tree.add_protocol(&cursor, 0, cursor.reported_len(), "ssl")?;
        let mut offset = 0;
        while offset < cursor.captured_len() {
            let state = key
                .as_ref()
                .map_or(VersionState::Unknown, |key| ctx.conversations().state(key));
            let format = match RecordFormat::for_state(state) {
                // A pinned flow still needs a record header here; without
                // one this is the middle of a record spanning segments
                Some(RecordFormat::V3) if !looks_like_v3(&cursor, offset) => None,
                Some(pinned) => Some(pinned),
                None => RecordFormat::detect(&cursor, offset),
            };

            let consumed = match format {
                Some(RecordFormat::V3) => {
                    self.dissect_v3_record(&cursor, offset, &mut proto, ctx, key.as_ref())?
                }
                Some(RecordFormat::V2) => {
                    self.dissect_v2_record(&cursor, offset, &mut proto, ctx, key.as_ref())?
                }
                None => {
                    // Mid-stream segment; no reassembly to find the next header
                    proto.add_unparsed(&cursor, offset);
                    ctx.columns_mut().append_sep(COL_INFO, ", ", "Continuation Data");
                    break;
                }
            };
            offset += consumed;
        }

        let state = key
            .as_ref()
            .map_or(VersionState::Unknown, |key| ctx.conversations().state(key));
        let label = match state.version() {
            Some(version) => version.to_string(),
            None => self.display_name().to_string(),
        };
        ctx.columns_mut().set(COL_PROTOCOL, &label);
        proto.set_value(FieldValue::string(&label));
        Ok(cursor.reported_len())
    }
}

impl HeuristicDissector for SslDissector {
    fn accepts(&self, cursor: &ByteCursor<'_>, _ctx: &DissectionContext<'_>) -> bool {
        RecordFormat::detect(cursor, 0).is_some()
    }
}
