//! LAPD (Q.921) data link parser.
//!
//! The two-octet address packs SAPI, C/R, TEI and two extension bits; the
//! information field is handed to the `lapd.sapi` table. Frames carry a
//! trailing CRC-16 FCS, stored least significant byte first.

use crate::context::{DissectionContext, COL_INFO, COL_PROTOCOL};
use crate::cursor::{ByteCursor, ChecksumAlgorithm, ChecksumStatus, Endianness};
use crate::error::{DissectError, Result};
use crate::registry::Dissector;
use crate::tree::{Annotation, FieldValue, TreeNode};

/// Dispatch table keyed by SAPI.
pub const LAPD_SAPI_TABLE: &str = "lapd.sapi";

/// Link type for LAPD frames including the FCS.
pub const LINKTYPE_LAPD: u16 = 203;

const ADDRESS_LEN: usize = 2;
const FCS_LEN: usize = 2;

/// Well-known SAPI values.
pub mod sapi {
    pub const CALL_CONTROL: u8 = 0;
    pub const PACKET_MODE: u8 = 1;
    pub const X25: u8 = 16;
    pub const MANAGEMENT: u8 = 63;
}

/// Unnumbered frame modifiers, P/F bit cleared.
mod u_modifier {
    pub const UI: u8 = 0x03;
    pub const DM: u8 = 0x0F;
    pub const DISC: u8 = 0x43;
    pub const UA: u8 = 0x63;
    pub const SABME: u8 = 0x6F;
    pub const FRMR: u8 = 0x87;
    pub const XID: u8 = 0xAF;
}

fn sapi_name(value: u8) -> &'static str {
    match value {
        sapi::CALL_CONTROL => "Call control",
        sapi::PACKET_MODE => "Packet mode",
        sapi::X25 => "X.25",
        sapi::MANAGEMENT => "Management",
        _ => "Reserved",
    }
}

/// Decoded control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Information { ns: u8, nr: u8, poll: bool },
    Supervisory { kind: u8, nr: u8, poll_final: bool },
    Unnumbered { modifier: u8, poll_final: bool },
}

impl Control {
    fn octets(&self) -> usize {
        match self {
            Control::Unnumbered { .. } => 1,
            _ => 2,
        }
    }

    fn name(&self) -> &'static str {
        match *self {
            Control::Information { .. } => "I",
            Control::Supervisory { kind: 0, .. } => "RR",
            Control::Supervisory { kind: 1, .. } => "RNR",
            Control::Supervisory { kind: 2, .. } => "REJ",
            Control::Supervisory { .. } => "S?",
            Control::Unnumbered { modifier, .. } => match modifier {
                u_modifier::UI => "UI",
                u_modifier::DM => "DM",
                u_modifier::DISC => "DISC",
                u_modifier::UA => "UA",
                u_modifier::SABME => "SABME",
                u_modifier::FRMR => "FRMR",
                u_modifier::XID => "XID",
                _ => "U?",
            },
        }
    }

    /// Whether the frame carries an information field for the upper layer.
    fn has_payload(&self) -> bool {
        matches!(
            self,
            Control::Information { .. }
                | Control::Unnumbered {
                    modifier: u_modifier::UI,
                    ..
                }
        )
    }

    fn parse(cursor: &ByteCursor<'_>, offset: usize) -> Result<Self> {
        let first = cursor.read_u8(offset)?;
        if first & 0x01 == 0 {
            let second = cursor.read_u8(offset + 1)?;
            return Ok(Control::Information {
                ns: first >> 1,
                nr: second >> 1,
                poll: second & 0x01 != 0,
            });
        }
        if first & 0x03 == 0x01 {
            let second = cursor.read_u8(offset + 1)?;
            return Ok(Control::Supervisory {
                kind: (first >> 2) & 0x03,
                nr: second >> 1,
                poll_final: second & 0x01 != 0,
            });
        }
        Ok(Control::Unnumbered {
            modifier: first & !0x10,
            poll_final: first & 0x10 != 0,
        })
    }
}

/// LAPD dissector.
#[derive(Debug, Clone, Copy)]
pub struct LapdDissector {
    has_fcs: bool,
}

impl Default for LapdDissector {
    fn default() -> Self {
        Self { has_fcs: true }
    }
}

impl LapdDissector {
    /// Dissector for frames whose FCS was stripped by the capture device.
    pub fn without_fcs() -> Self {
        Self { has_fcs: false }
    }

    fn check_fcs<'a>(
        &self,
        cursor: &ByteCursor<'a>,
        fcs_at: usize,
        tree: &mut TreeNode<'_, 'a>,
    ) -> Result<()> {
        let status = cursor.verify_checksum(
            0,
            fcs_at,
            fcs_at,
            ChecksumAlgorithm::Crc16Ccitt,
            Endianness::Little,
        );
        if let Ok(stored) = cursor.read_u16_le(fcs_at) {
            tree.add_leaf(cursor, fcs_at, FCS_LEN, "fcs", FieldValue::UInt16(stored))?;
        }
        match status {
            ChecksumStatus::Valid => Ok(()),
            ChecksumStatus::Invalid { expected, actual } => {
                tree.add_annotation(cursor, fcs_at, FCS_LEN, Annotation::ChecksumBad { expected, actual })
            }
            ChecksumStatus::NotComputed => {
                tree.add_annotation(cursor, fcs_at, FCS_LEN, Annotation::ChecksumNotComputed)
            }
        }
    }
}

impl Dissector for LapdDissector {
    fn name(&self) -> &'static str {
        "lapd"
    }

    fn display_name(&self) -> &'static str {
        "LAPD"
    }

    fn dissect<'a>(
        &self,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<usize> {
        let trailer = if self.has_fcs { FCS_LEN } else { 0 };
        if cursor.reported_len() < ADDRESS_LEN + 1 + trailer {
            return Err(DissectError::malformed(format!(
                "{}-byte frame is shorter than a LAPD header",
                cursor.reported_len()
            )));
        }
        ctx.columns_mut().set(COL_PROTOCOL, self.display_name());
        let mut proto = tree.add_protocol(&cursor, 0, cursor.reported_len(), "lapd")?;

        // SAPI(6) C/R(1) EA0(1) | TEI(7) EA1(1)
        let sapi = cursor.read_bits(0, 6)? as u8;
        let command_response = cursor.read_bits(6, 1)? != 0;
        let ea0 = cursor.read_bits(7, 1)?;
        let tei = cursor.read_bits(8, 7)? as u8;
        let ea1 = cursor.read_bits(15, 1)?;
        if ea0 != 0 || ea1 != 1 {
            return Err(DissectError::malformed(format!(
                "address extension bits {ea0}/{ea1}, expected 0/1"
            )));
        }

        {
            let mut address = proto.add_subtree(&cursor, 0, ADDRESS_LEN, "address")?;
            address.add_leaf(&cursor, 0, 1, "sapi", FieldValue::UInt8(sapi))?;
            address.add_leaf(&cursor, 0, 1, "command_response", FieldValue::Bool(command_response))?;
            address.add_leaf(&cursor, 0, 1, "ea0", FieldValue::UInt8(ea0 as u8))?;
            address.add_leaf(&cursor, 1, 1, "tei", FieldValue::UInt8(tei))?;
            address.add_leaf(&cursor, 1, 1, "ea1", FieldValue::UInt8(ea1 as u8))?;
        }

        let control = Control::parse(&cursor, ADDRESS_LEN)?;
        {
            let mut node = proto.add_subtree(&cursor, ADDRESS_LEN, control.octets(), "control")?;
            node.set_value(FieldValue::Str(control.name()));
            match control {
                Control::Information { ns, nr, poll } => {
                    node.add_leaf(&cursor, ADDRESS_LEN, 1, "n_s", FieldValue::UInt8(ns))?;
                    node.add_leaf(&cursor, ADDRESS_LEN + 1, 1, "n_r", FieldValue::UInt8(nr))?;
                    node.add_leaf(&cursor, ADDRESS_LEN + 1, 1, "poll", FieldValue::Bool(poll))?;
                }
                Control::Supervisory { kind, nr, poll_final } => {
                    node.add_leaf(&cursor, ADDRESS_LEN, 1, "supervisory_function", FieldValue::UInt8(kind))?;
                    node.add_leaf(&cursor, ADDRESS_LEN + 1, 1, "n_r", FieldValue::UInt8(nr))?;
                    node.add_leaf(&cursor, ADDRESS_LEN + 1, 1, "poll_final", FieldValue::Bool(poll_final))?;
                }
                Control::Unnumbered { modifier, poll_final } => {
                    node.add_leaf(&cursor, ADDRESS_LEN, 1, "modifier", FieldValue::UInt8(modifier))?;
                    node.add_leaf(&cursor, ADDRESS_LEN, 1, "poll_final", FieldValue::Bool(poll_final))?;
                }
            }
        }

        let header_len = ADDRESS_LEN + control.octets();
        let fcs_at = cursor.reported_len() - trailer;
        if fcs_at < header_len {
            return Err(DissectError::malformed("no room for the FCS after the control field"));
        }

        let info = format!(
            "SAPI {sapi} ({}), TEI {tei}, {}",
            sapi_name(sapi),
            control.name()
        );
        ctx.columns_mut().set(COL_INFO, &info);

        let payload_len = fcs_at - header_len;
        if payload_len > 0 {
            let view = cursor.sub_view_partial(header_len, payload_len)?;
            if view.is_partial() {
                proto.add_annotation(&view.cursor, 0, payload_len, Annotation::PartialData { missing: view.missing })?;
            }
            if control.has_payload() {
                ctx.dispatch(LAPD_SAPI_TABLE, u64::from(sapi), view.cursor, &mut proto)?;
            } else {
                proto.add_unparsed(&view.cursor, 0);
            }
        }

        if self.has_fcs {
            self.check_fcs(&cursor, fcs_at, &mut proto)?;
        }
        Ok(cursor.reported_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationTable;
    use crate::packet::PacketInfo;
    use crate::protocol::test_utils::{dissect_frame, try_dissect, LapdBuilder};
    use crate::registry::{DissectorRegistry, KeyWidth, MatchKind};
    use crate::tree::{FieldTree, NodeKind};
    use std::sync::Arc;

    fn annotations(tree: &crate::tree::FinalizedTree<'_>) -> Vec<Annotation> {
        tree.iter()
            .filter_map(|(_, n)| match n.kind() {
                NodeKind::Annotation(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ui_frame_address_fields() {
        let conversations = ConversationTable::default();
        let frame = LapdBuilder::new()
            .sapi(sapi::MANAGEMENT)
            .tei(127)
            .command(true)
            .control(&[0x03])
            .payload(&[0x0f, 0x12, 0x34, 0x01, 0xff])
            .build();
        let (tree, columns) = dissect_frame(&LapdDissector::default(), &frame, &conversations, 1, 0, None);

        assert!(!tree.has_malformed());
        assert!(annotations(&tree).is_empty());
        assert_eq!(tree.find("sapi").unwrap().value(), Some(&FieldValue::UInt8(63)));
        assert_eq!(tree.find("tei").unwrap().value(), Some(&FieldValue::UInt8(127)));
        assert_eq!(
            tree.find("command_response").unwrap().value(),
            Some(&FieldValue::Bool(true))
        );
        assert_eq!(tree.find("control").unwrap().value(), Some(&FieldValue::Str("UI")));
        assert_eq!(columns.info(), "SAPI 63 (Management), TEI 127, UI");
        assert_eq!(columns.protocol(), "LAPD");

        // No lapd.sapi table in a bare registry: the payload falls back to data
        let data = tree.iter().find(|(_, n)| n.kind() == NodeKind::Unparsed).unwrap().1;
        assert_eq!(data.range(), 3..8);
        assert_eq!(tree.find("fcs").unwrap().range(), 8..10);
    }

    #[test]
    fn test_information_frame_sequence_numbers() {
        let conversations = ConversationTable::default();
        let frame = LapdBuilder::new()
            .sapi(sapi::CALL_CONTROL)
            .tei(64)
            .control(&[5 << 1, (9 << 1) | 1])
            .payload(&[0x08, 0x01, 0x00, 0x05])
            .build();
        let (tree, columns) = dissect_frame(&LapdDissector::default(), &frame, &conversations, 1, 0, None);

        assert_eq!(tree.find("n_s").unwrap().value(), Some(&FieldValue::UInt8(5)));
        assert_eq!(tree.find("n_r").unwrap().value(), Some(&FieldValue::UInt8(9)));
        assert_eq!(tree.find("poll").unwrap().value(), Some(&FieldValue::Bool(true)));
        assert!(columns.info().starts_with("SAPI 0 (Call control), TEI 64, I"));
    }

    #[test]
    fn test_bad_fcs_annotated() {
        let conversations = ConversationTable::default();
        let builder = LapdBuilder::new().control(&[0x7f]);
        let good = builder.clone().build();
        let bad = builder.fcs(0x1234).build();
        let expected = u32::from(u16::from_le_bytes([good[3], good[4]]));

        let (tree, _) = dissect_frame(&LapdDissector::default(), &bad, &conversations, 1, 0, None);
        assert!(!tree.has_malformed());
        assert_eq!(
            annotations(&tree),
            vec![Annotation::ChecksumBad {
                expected,
                actual: 0x1234
            }]
        );
        // SABME with P set
        assert_eq!(tree.find("control").unwrap().value(), Some(&FieldValue::Str("SABME")));
        assert_eq!(tree.find("poll_final").unwrap().value(), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_truncated_frame_not_computed() {
        let registry = DissectorRegistry::new();
        let conversations = ConversationTable::default();
        let frame = LapdBuilder::new().control(&[0x03]).payload(&[0u8; 20]).build();
        let mut ctx = DissectionContext::new(&registry, &conversations, PacketInfo::default(), 8);

        let captured = &frame[..10];
        let cursor = ByteCursor::new(captured, frame.len());
        let mut tree = FieldTree::new("frame", frame.len());
        LapdDissector::default()
            .dissect(cursor, &mut tree.root_mut(), &mut ctx)
            .unwrap();
        let tree = tree.finalize();

        assert_eq!(
            annotations(&tree),
            vec![
                Annotation::PartialData { missing: 13 },
                Annotation::ChecksumNotComputed
            ]
        );
        assert!(tree.find("fcs").is_none());
    }

    #[test]
    fn test_payload_dispatched_by_sapi() {
        let mut registry = DissectorRegistry::new();
        registry.register_table(LAPD_SAPI_TABLE, KeyWidth::U8).unwrap();
        registry
            .bind(LAPD_SAPI_TABLE, u64::from(sapi::CALL_CONTROL), Arc::new(crate::protocol::MgcpDissector))
            .unwrap();
        let conversations = ConversationTable::default();
        let frame = LapdBuilder::new()
            .sapi(sapi::CALL_CONTROL)
            .control(&[0x03])
            .payload(b"RSIP 1 *@gw MGCP 1.0\r\n")
            .build();

        let mut ctx = DissectionContext::new(&registry, &conversations, PacketInfo::default(), 8);
        let cursor = ByteCursor::from_slice(&frame);
        let mut tree = FieldTree::new("frame", frame.len());
        let outcome = registry
            .call("lapd", cursor, &mut tree.root_mut(), &mut ctx)
            .unwrap();
        assert_eq!(outcome.match_kind, MatchKind::Fallback);

        let mut tree = FieldTree::new("frame", frame.len());
        LapdDissector::default()
            .dissect(cursor, &mut tree.root_mut(), &mut ctx)
            .unwrap();
        let tree = tree.finalize();
        assert_eq!(ctx.columns().protocol(), "MGCP");
        assert!(tree.find("mgcp").is_some());
        assert_eq!(tree.find("verb").unwrap().value(), Some(&FieldValue::Str("RSIP")));
    }

    #[test]
    fn test_bad_extension_bits_malformed() {
        let conversations = ConversationTable::default();
        let mut frame = LapdBuilder::new().control(&[0x03]).build();
        frame[1] &= !0x01;
        let result = try_dissect(&LapdDissector::default(), &frame, &conversations, None);
        assert!(matches!(result, Err(DissectError::Malformed { .. })));

        let result = try_dissect(&LapdDissector::default(), &[0x00, 0x01, 0x03], &conversations, None);
        assert!(matches!(result, Err(DissectError::Malformed { .. })));
    }

    #[test]
    fn test_without_fcs() {
        let conversations = ConversationTable::default();
        let frame = [0x00, 0x01, 0x03, 0xaa, 0xbb];
        let (tree, _) = dissect_frame(&LapdDissector::without_fcs(), &frame, &conversations, 1, 0, None);
        assert!(tree.find("fcs").is_none());
        assert!(annotations(&tree).is_empty());
        assert_eq!(tree.coverage(), vec![0..5]);
    }
}
