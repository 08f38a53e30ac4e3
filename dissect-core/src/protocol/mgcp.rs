//! MGCP (Media Gateway Control Protocol) parser.
//!
//! Text protocol over UDP. Commands and responses share a transaction id;
//! the request sender's endpoint keys the conversation, so a response is
//! matched by looking at its destination.
//!
//! Several messages may be piggybacked in one datagram, separated by a
//! line holding a single `.`.

use smallvec::SmallVec;

use crate::context::{DissectionContext, COL_INFO, COL_PROTOCOL};
use crate::conversation::{BeginOutcome, CompleteOutcome, ConversationKey};
use crate::cursor::ByteCursor;
use crate::error::{DissectError, Result};
use crate::registry::{Dissector, HeuristicDissector};
use crate::tree::{Annotation, FieldValue, TreeNode};

/// Gateway port.
pub const MGCP_GATEWAY_PORT: u16 = 2427;
/// Call agent port.
pub const MGCP_CALLAGENT_PORT: u16 = 2727;

/// Command verbs (RFC 3435 section 2.3).
const VERBS: &[&[u8; 4]] = &[
    b"EPCF", b"CRCX", b"MDCX", b"DLCX", b"RQNT", b"NTFY", b"AUEP", b"AUCX", b"RSIP",
];

/// Transaction ids are 1 to 9 decimal digits.
const MAX_TXID_DIGITS: usize = 9;

/// Verbs are case-insensitive.
fn is_verb(token: &[u8]) -> bool {
    VERBS.iter().any(|verb| verb.as_slice().eq_ignore_ascii_case(token))
}

fn is_response_code(token: &[u8]) -> bool {
    token.len() == 3 && token.iter().all(u8::is_ascii_digit)
}

/// Field name of a parameter line code.
fn parameter_label(code: &str) -> &'static str {
    match code {
        "B" => "bearer_information",
        "C" => "call_id",
        "I" => "connection_id",
        "N" => "notified_entity",
        "X" => "request_id",
        "L" => "local_connection_options",
        "M" => "connection_mode",
        "R" => "requested_events",
        "S" => "signal_requests",
        "D" => "digit_map",
        "O" => "observed_events",
        "P" => "connection_parameters",
        "E" => "reason_code",
        "Z" => "specific_endpoint_id",
        "Z2" => "second_endpoint_id",
        "I2" => "second_connection_id",
        "F" => "requested_info",
        "Q" => "quarantine_handling",
        "T" => "detect_events",
        "ES" => "event_states",
        "RM" => "restart_method",
        "RD" => "restart_delay",
        "A" => "capabilities",
        "K" => "response_ack",
        "PL" => "package_list",
        _ => "parameter",
    }
}

/// Whitespace-separated tokens of a line with their offsets.
fn tokens(line: &[u8]) -> SmallVec<[(usize, &[u8]); 6]> {
    let mut out = SmallVec::new();
    let mut start = None;
    for (i, b) in line.iter().enumerate() {
        match (b.is_ascii_whitespace(), start) {
            (true, Some(s)) => {
                out.push((s, &line[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }
    out
}

fn text<'a>(bytes: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| DissectError::malformed("non-UTF-8 text"))
}

fn parse_txid(token: &[u8]) -> Result<u32> {
    if token.is_empty() || token.len() > MAX_TXID_DIGITS || !token.iter().all(u8::is_ascii_digit) {
        return Err(DissectError::malformed(format!(
            "invalid transaction id {:?}",
            String::from_utf8_lossy(token)
        )));
    }
    // At most nine digits, always fits
    Ok(token
        .iter()
        .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0')))
}

/// Where a message starts and ends within the datagram.
struct MessageSpan {
    end: usize,
    next: usize,
}

/// Find the end of the message at `start`: the next `.` line or the end
/// of the captured bytes.
fn message_span(cursor: &ByteCursor<'_>, start: usize) -> MessageSpan {
    let mut pos = start;
    while pos < cursor.captured_len() {
        let Ok((line, next)) = cursor.ascii_line(pos) else {
            break;
        };
        if line == b"." && pos != start {
            return MessageSpan { end: pos, next };
        }
        pos = next;
    }
    MessageSpan {
        end: cursor.captured_len(),
        next: cursor.captured_len(),
    }
}

/// MGCP dissector.
#[derive(Debug, Clone, Copy, Default)]
pub struct MgcpDissector;

impl MgcpDissector {
    fn dissect_message<'a>(
        &self,
        cursor: &ByteCursor<'a>,
        start: usize,
        end: usize,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<()> {
        let (first_line, mut pos) = cursor.ascii_line(start)?;
        let first = tokens(first_line);
        let Some(&(_, lead)) = first.first() else {
            return Err(DissectError::malformed("empty start line"));
        };

        let mut message = if is_verb(lead) {
            let mut node = tree.add_subtree(cursor, start, end - start, "command")?;
            self.command(cursor, start, &first, &mut node, ctx)?;
            node
        } else if is_response_code(lead) {
            let mut node = tree.add_subtree(cursor, start, end - start, "response")?;
            self.response(cursor, start, first_line, &first, &mut node, ctx)?;
            node
        } else {
            return Err(DissectError::malformed(format!(
                "unknown verb {:?}",
                String::from_utf8_lossy(lead)
            )));
        };
        ctx.columns_mut()
            .append_sep(COL_INFO, "; ", text(first_line)?.trim_end());

        // Parameter lines up to an empty line, then a session description
        while pos < end {
            let (line, next) = cursor.ascii_line(pos)?;
            if line.is_empty() {
                if next < end {
                    let body = cursor.bytes(next, end - next)?;
                    message.add_leaf(cursor, next, end - next, "session_description", FieldValue::Bytes(body))?;
                }
                break;
            }
            let line_text = text(line)?;
            match line_text.split_once(':') {
                Some((code, value)) => {
                    let code = code.trim();
                    let label = parameter_label(&code.to_ascii_uppercase());
                    message.add_leaf(cursor, pos, line.len(), label, FieldValue::Str(value.trim()))?;
                }
                None => {
                    return Err(DissectError::malformed(format!(
                        "parameter line without ':' at offset {pos}"
                    )));
                }
            }
            pos = next;
        }
        Ok(())
    }

    fn command<'a>(
        &self,
        cursor: &ByteCursor<'a>,
        start: usize,
        first: &[(usize, &'a [u8])],
        node: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<()> {
        let &[(verb_at, verb), (txid_at, txid), (endpoint_at, endpoint), (proto_at, _), (version_at, version), ..] =
            first
        else {
            return Err(DissectError::malformed("command line needs verb, transaction id, endpoint and version"));
        };
        let verb_text = text(verb)?;
        let transaction_id = parse_txid(txid)?;

        node.add_leaf(cursor, start + verb_at, verb.len(), "verb", FieldValue::Str(verb_text))?;
        node.add_leaf(cursor, start + txid_at, txid.len(), "transaction_id", FieldValue::UInt32(transaction_id))?;
        node.add_leaf(cursor, start + endpoint_at, endpoint.len(), "endpoint", FieldValue::Str(text(endpoint)?))?;
        let version_len = version_at + version.len() - proto_at;
        let version_text = text(cursor.bytes(start + proto_at, version_len)?)?;
        node.add_leaf(cursor, start + proto_at, version_len, "version", FieldValue::Str(version_text))?;

        // Requests are keyed on their sender
        let Some(flow) = ctx.flow().copied() else {
            return Ok(());
        };
        let key = ConversationKey::datagram(flow.transport, flow.src);
        let outcome = ctx.conversations().begin_transaction(
            &key,
            u64::from(transaction_id),
            verb_text,
            ctx.timestamp_us(),
            ctx.frame_number(),
        );
        if let BeginOutcome::DuplicateRequest { first_frame } = outcome {
            node.add_annotation(cursor, start + txid_at, txid.len(), Annotation::DuplicateRequest { first_frame })?;
        }
        Ok(())
    }

    fn response<'a>(
        &self,
        cursor: &ByteCursor<'a>,
        start: usize,
        first_line: &'a [u8],
        first: &[(usize, &'a [u8])],
        node: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<()> {
        let &[(code_at, code), (txid_at, txid), ..] = first else {
            return Err(DissectError::malformed("response line needs code and transaction id"));
        };
        let code_value = text(code)?
            .parse::<u32>()
            .map_err(|_| DissectError::malformed("invalid response code"))?;
        let transaction_id = parse_txid(txid)?;

        node.add_leaf(cursor, start + code_at, code.len(), "response_code", FieldValue::UInt32(code_value))?;
        node.add_leaf(cursor, start + txid_at, txid.len(), "transaction_id", FieldValue::UInt32(transaction_id))?;
        if let Some(&(string_at, _)) = first.get(2) {
            let string = text(&first_line[string_at..])?.trim_end();
            node.add_leaf(cursor, start + string_at, string.len(), "response_string", FieldValue::Str(string))?;
        }

        // Responses travel back to the request sender
        let Some(flow) = ctx.flow().copied() else {
            return Ok(());
        };
        let key = ConversationKey::datagram(flow.transport, flow.dst);
        let outcome = ctx.conversations().complete_transaction(
            &key,
            u64::from(transaction_id),
            ctx.timestamp_us(),
            ctx.frame_number(),
        );
        let annotation = match outcome {
            CompleteOutcome::Completed {
                latency_us,
                request_frame,
                ..
            } => Annotation::ResponseTo {
                request_frame,
                latency_us,
            },
            CompleteOutcome::DuplicateResponse {
                first_response_frame,
            } => Annotation::DuplicateResponse {
                first_response_frame,
            },
            CompleteOutcome::UnsolicitedResponse => Annotation::UnsolicitedResponse,
        };
        node.add_annotation(cursor, start + txid_at, txid.len(), annotation)
    }
}

impl Dissector for MgcpDissector {
    fn name(&self) -> &'static str {
        "mgcp"
    }

    fn display_name(&self) -> &'static str {
        "MGCP"
    }

    fn dissect<'a>(
        &self,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> Result<usize> {
        ctx.columns_mut().set(COL_PROTOCOL, self.display_name());
        let mut proto = tree.add_protocol(&cursor, 0, cursor.reported_len(), "mgcp")?;

        let mut offset = 0;
        while offset < cursor.captured_len() {
            let span = message_span(&cursor, offset);
            self.dissect_message(&cursor, offset, span.end, &mut proto, ctx)?;
            offset = span.next;
        }
        Ok(cursor.reported_len())
    }
}

impl HeuristicDissector for MgcpDissector {
    fn accepts(&self, cursor: &ByteCursor<'_>, _ctx: &DissectionContext<'_>) -> bool {
        if let Ok(head) = cursor.bytes(0, 5) {
            if head[4] == b' ' && is_verb(&head[..4]) {
                return true;
            }
        }
        cursor
            .bytes(0, 4)
            .is_ok_and(|head| head[3] == b' ' && is_response_code(&head[..3]))
    }
}
