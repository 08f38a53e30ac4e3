//! End-to-end dissection tests.
//!
//! These tests drive whole packets through the [`Engine`]: table and
//! heuristic dispatch, conversation state across packets, error isolation
//! between packets, and rebinding at runtime.

use std::sync::Arc;

use dissect_core::protocol::{MgcpDissector, LINKTYPE_LAPD, MGCP_CALLAGENT_PORT, MGCP_GATEWAY_PORT};
use dissect_core::{
    Annotation, ByteCursor, ChecksumAlgorithm, ConversationKey, DissectionContext, Dissector,
    DissectorRegistry, Endpoint, Engine, EngineConfig, FieldValue, FlowTuple, KeyWidth, MatchKind,
    NodeKind, Packet, PortPreference, ProtocolVersion, Transport, TreeNode, VersionState,
};

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const CLIENT: [u8; 4] = [198, 51, 100, 7];
const SERVER: [u8; 4] = [198, 51, 100, 80];

fn flow(transport: Transport, client_port: u16, server_port: u16) -> FlowTuple {
    FlowTuple::new(
        transport,
        Endpoint::new(CLIENT, client_port),
        Endpoint::new(SERVER, server_port),
    )
}

fn tls_record(content_type: u8, version: u16, body: &[u8]) -> Vec<u8> {
    let mut out = vec![content_type];
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![msg_type];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

fn client_hello(version: u16) -> Vec<u8> {
    let mut body = version.to_be_bytes().to_vec();
    body.extend_from_slice(&[0xab; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x02, 0xc0, 0x2f, 0x01, 0x00]);
    tls_record(22, 0x0301, &handshake(1, &body))
}

fn server_hello(version: u16, session_id_len: u8) -> Vec<u8> {
    let mut body = version.to_be_bytes().to_vec();
    body.extend_from_slice(&[0xcd; 32]);
    body.push(session_id_len);
    body.extend_from_slice(&[0xee; 32]);
    body.extend_from_slice(&[0xc0, 0x2f, 0x00]);
    tls_record(22, version, &handshake(2, &body))
}

/// Reads a byte and a big-endian u16, then hands the rest to `e2e.next`.
struct Outer;

impl Dissector for Outer {
    fn name(&self) -> &'static str {
        "outer"
    }

    fn dissect<'a>(
        &self,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        ctx: &mut DissectionContext<'_>,
    ) -> dissect_core::Result<usize> {
        let kind = cursor.read_u8(0)?;
        tree.add_leaf(&cursor, 0, 1, "kind", FieldValue::UInt8(kind))?;
        let length = cursor.read_u16_be(1)?;
        tree.add_leaf(&cursor, 1, 2, "length", FieldValue::UInt16(length))?;

        let rest = cursor.tail(3)?;
        ctx.dispatch("e2e.next", u64::from(length), rest, tree)?;
        Ok(cursor.reported_len())
    }
}

/// Claims its whole input as one subtree with one leaf per byte.
struct Inner;

impl Dissector for Inner {
    fn name(&self) -> &'static str {
        "inner"
    }

    fn dissect<'a>(
        &self,
        cursor: ByteCursor<'a>,
        tree: &mut TreeNode<'_, 'a>,
        _ctx: &mut DissectionContext<'_>,
    ) -> dissect_core::Result<usize> {
        let mut node = tree.add_protocol(&cursor, 0, cursor.reported_len(), "inner")?;
        for (i, b) in cursor.as_slice().iter().enumerate() {
            node.add_leaf(&cursor, i, 1, "octet", FieldValue::UInt8(*b))?;
        }
        Ok(cursor.reported_len())
    }
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_twelve_byte_scenario_covers_buffer() {
    init_tracing();
    let mut registry = DissectorRegistry::new();
    registry.register_table("e2e.first", KeyWidth::U8).unwrap();
    registry.register_table("e2e.next", KeyWidth::U16).unwrap();
    registry.bind("e2e.first", 0x01, Arc::new(Outer)).unwrap();
    registry.bind("e2e.next", 0x0200, Arc::new(Inner)).unwrap();
    let engine = Engine::new(registry, EngineConfig::default());

    let data = vec![0x01, 0x02, 0x00, 0x03, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8];
    let packet = Packet::new(1, 0, data);
    let dissection = engine.dissect_in(&packet, "e2e.first", &[u64::from(packet.data()[0])]);

    assert!(!dissection.has_errors());
    let outcome = dissection.outcome.unwrap();
    assert_eq!(outcome.dissector, "outer");
    assert_eq!(outcome.match_kind, MatchKind::Exact);

    let top = dissection.tree.children();
    assert_eq!(top.len(), 3);
    let ranges: Vec<_> = top.iter().map(|n| n.range()).collect();
    assert_eq!(ranges, vec![0..1, 1..3, 3..12]);
    assert_eq!(dissection.tree.coverage(), vec![0..12]);
    assert_eq!(top[2].children().len(), 9);
    assert_eq!(top[2].children()[0].range(), 3..4);
}

#[test]
fn test_unknown_inner_key_falls_back_to_data() {
    let mut registry = DissectorRegistry::new();
    registry.register_table("e2e.first", KeyWidth::U8).unwrap();
    registry.register_table("e2e.next", KeyWidth::U16).unwrap();
    registry.bind("e2e.first", 0x01, Arc::new(Outer)).unwrap();
    let engine = Engine::new(registry, EngineConfig::default());

    let packet = Packet::new(1, 0, vec![0x01, 0x00, 0x09, 0xff, 0xff]);
    let dissection = engine.dissect_in(&packet, "e2e.first", &[1]);

    let top = dissection.tree.children();
    assert_eq!(top.len(), 3);
    assert_eq!(top[2].kind(), NodeKind::Unparsed);
    assert_eq!(top[2].range(), 3..5);
}

#[test]
fn test_inner_failure_keeps_outer_fields() {
    let mut registry = DissectorRegistry::new();
    registry.register_table("e2e.first", KeyWidth::U8).unwrap();
    registry.register_table("e2e.next", KeyWidth::U16).unwrap();
    registry.bind("e2e.first", 0x01, Arc::new(Outer)).unwrap();
    registry.bind("e2e.next", 0x0001, Arc::new(Outer)).unwrap();
    let engine = Engine::new(registry, EngineConfig::default());

    // The nested Outer runs out of bytes reading its length
    let packet = Packet::new(1, 0, vec![0x01, 0x00, 0x01, 0x07]);
    let dissection = engine.dissect_in(&packet, "e2e.first", &[1]);

    assert!(!dissection.abandoned);
    assert!(dissection.has_errors());
    let top = dissection.tree.children();
    assert_eq!(top.len(), 3);
    assert_eq!(top[0].label(), "kind");
    assert_eq!(top[1].label(), "length");
    assert!(top[2].is_malformed());
    assert_eq!(top[2].range(), 3..4);
    assert!(dissection.columns.info().ends_with("[Malformed]"));
}

// ============================================================================
// SSL/TLS
// ============================================================================

#[test]
fn test_tls_conversation_pins_version() {
    init_tracing();
    let engine = Engine::with_defaults();
    let to_server = flow(Transport::Tcp, 50123, 443);

    let hello = Packet::new(1, 1_000, client_hello(0x0303)).with_flow(to_server);
    let dissection = engine.dissect(&hello);
    assert_eq!(dissection.outcome.unwrap().dissector, "ssl");
    assert_eq!(dissection.columns.protocol(), "SSL");
    assert_eq!(dissection.columns.info(), "Client Hello");

    let reply = Packet::new(2, 2_000, server_hello(0x0303, 32)).with_flow(to_server.reversed());
    let dissection = engine.dissect(&reply);
    assert_eq!(dissection.columns.protocol(), "TLSv1.2");

    let key = ConversationKey::from_flow(&to_server);
    assert_eq!(
        engine.conversations().state(&key),
        VersionState::Pinned(ProtocolVersion::Tls { minor: 3 })
    );

    let data = Packet::new(3, 3_000, tls_record(23, 0x0303, &[0x5a; 48])).with_flow(to_server);
    let dissection = engine.dissect(&data);
    assert_eq!(dissection.columns.protocol(), "TLSv1.2");
    assert_eq!(dissection.columns.info(), "Application Data");

    let record = engine.conversations().get(&key).unwrap();
    assert_eq!(record.packets, 3);
    assert_eq!(record.first_frame, Some(1));
    assert_eq!(record.last_seen_us, Some(3_000));
}

#[test]
fn test_pinned_flow_continuation_segment_is_not_malformed() {
    let engine = Engine::with_defaults();
    let to_server = flow(Transport::Tcp, 50123, 443);

    engine.dissect(&Packet::new(1, 1_000, client_hello(0x0303)).with_flow(to_server));
    engine.dissect(&Packet::new(2, 2_000, server_hello(0x0303, 32)).with_flow(to_server.reversed()));

    // Middle of a large record split across TCP segments
    let segment = Packet::new(3, 3_000, vec![0xaa; 40]).with_flow(to_server);
    let dissection = engine.dissect(&segment);
    assert!(!dissection.has_errors());
    assert_eq!(dissection.outcome.unwrap().dissector, "ssl");
    assert_eq!(dissection.columns.protocol(), "TLSv1.2");
    assert_eq!(dissection.columns.info(), "Continuation Data");
    let ssl = &dissection.tree.children()[0];
    assert_eq!(ssl.children()[0].kind(), NodeKind::Unparsed);
    assert_eq!(dissection.tree.coverage(), vec![0..40]);
}

#[test]
fn test_tls_on_unregistered_port_found_by_heuristic() {
    let engine = Engine::with_defaults();
    let packet = Packet::new(1, 0, client_hello(0x0303)).with_flow(flow(Transport::Tcp, 50123, 8443));

    let dissection = engine.dissect(&packet);
    let outcome = dissection.outcome.unwrap();
    assert_eq!(outcome.dissector, "ssl");
    assert_eq!(outcome.match_kind, MatchKind::Heuristic);
}

#[test]
fn test_malformed_packet_does_not_affect_next() {
    let engine = Engine::with_defaults();
    let to_server = flow(Transport::Tcp, 50123, 443);

    let bad = Packet::new(1, 0, server_hello(0x0303, 200)).with_flow(to_server.reversed());
    let dissection = engine.dissect(&bad);
    assert!(!dissection.abandoned);
    assert!(dissection.has_errors());
    let malformed = &dissection.tree.children()[0];
    assert!(malformed.is_malformed());
    assert_eq!(malformed.range(), 0..bad.reported_len());
    // Nothing was pinned by the broken hello
    let key = ConversationKey::from_flow(&to_server);
    assert_eq!(engine.conversations().state(&key), VersionState::Unknown);

    let good = Packet::new(2, 10, server_hello(0x0302, 32)).with_flow(to_server.reversed());
    let dissection = engine.dissect(&good);
    assert!(!dissection.has_errors());
    assert_eq!(dissection.columns.protocol(), "TLSv1.1");
}

#[test]
fn test_truncated_record_is_partial_not_malformed() {
    let engine = Engine::with_defaults();
    let full = tls_record(23, 0x0303, &[0x77; 100]);
    let packet = Packet::new(1, 0, full[..30].to_vec())
        .with_reported_len(full.len())
        .with_flow(flow(Transport::Tcp, 50123, 443));

    let dissection = engine.dissect(&packet);
    assert!(!dissection.has_errors());
    assert_eq!(dissection.tree.coverage(), vec![0..105]);
    let partial = dissection
        .tree
        .iter()
        .find_map(|(_, n)| match n.kind() {
            NodeKind::Annotation(a @ Annotation::PartialData { .. }) => Some(a),
            _ => None,
        });
    assert_eq!(partial, Some(Annotation::PartialData { missing: 75 }));
}

// ============================================================================
// MGCP
// ============================================================================

#[test]
fn test_mgcp_request_response_latency() {
    init_tracing();
    let engine = Engine::with_defaults();
    let to_gateway = flow(Transport::Udp, MGCP_CALLAGENT_PORT, MGCP_GATEWAY_PORT);

    let request = Packet::new(10, 5_000_000, b"AUEP 4711 aaln/1@gw MGCP 1.0\r\nF: A\r\n".to_vec())
        .with_flow(to_gateway);
    let response = Packet::new(11, 5_012_500, b"200 4711\r\nA: a:PCMU\r\n".to_vec())
        .with_flow(to_gateway.reversed());

    let dissection = engine.dissect(&request);
    assert_eq!(dissection.outcome.unwrap().dissector, "mgcp");
    let dissection = engine.dissect(&response);
    let annotation = dissection.tree.iter().find_map(|(_, n)| match n.kind() {
        NodeKind::Annotation(a) => Some(a),
        _ => None,
    });
    assert_eq!(
        annotation,
        Some(Annotation::ResponseTo {
            request_frame: 10,
            latency_us: 12_500
        })
    );

    let key = ConversationKey::datagram(Transport::Udp, to_gateway.src);
    let record = engine.conversations().get(&key).unwrap();
    assert_eq!(record.transactions().get(4711).unwrap().summary, "AUEP");
}

#[test]
fn test_port_preference_moves_mgcp() {
    let mut engine = Engine::with_defaults();
    let mut pref = PortPreference::new("udp.port", Arc::new(MgcpDissector));
    pref.apply(engine.registry_mut(), Some(u64::from(MGCP_GATEWAY_PORT)))
        .unwrap();
    pref.apply(engine.registry_mut(), Some(3435)).unwrap();

    assert_eq!(engine.registry().lookup("udp.port", 3435), Some("mgcp"));
    assert_eq!(engine.registry().lookup("udp.port", u64::from(MGCP_GATEWAY_PORT)), None);

    // The heuristic still finds MGCP on the old port
    let packet = Packet::new(1, 0, b"RSIP 9 *@gw MGCP 1.0\r\n".to_vec())
        .with_flow(flow(Transport::Udp, 40000, MGCP_GATEWAY_PORT));
    let outcome = engine.dissect(&packet).outcome.unwrap();
    assert_eq!(outcome.match_kind, MatchKind::Heuristic);
}

#[test]
fn test_concurrent_transactions() {
    let engine = Engine::with_defaults();
    let to_gateway = flow(Transport::Udp, MGCP_CALLAGENT_PORT, MGCP_GATEWAY_PORT);

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let engine = &engine;
            scope.spawn(move || {
                for i in 0..50u64 {
                    let txid = worker * 1000 + i + 1;
                    let text = format!("RQNT {txid} aaln/1@gw MGCP 1.0\r\nX: 1\r\n");
                    let packet = Packet::new(txid, txid as i64, text.into_bytes()).with_flow(to_gateway);
                    assert!(!engine.dissect(&packet).has_errors());
                }
            });
        }
    });

    let key = ConversationKey::datagram(Transport::Udp, to_gateway.src);
    let record = engine.conversations().get(&key).unwrap();
    assert_eq!(record.packets, 200);
    assert_eq!(record.transactions().len(), 200);
    assert_eq!(record.duplicate_requests, 0);
}

// ============================================================================
// LAPD
// ============================================================================

#[test]
fn test_lapd_by_link_type() {
    let mut frame = vec![0x00, 0x81, 0x03, 0x08, 0x01, 0x00, 0x05];
    let fcs = ChecksumAlgorithm::Crc16Ccitt.compute(&frame) as u16;
    frame.extend_from_slice(&fcs.to_le_bytes());

    let engine = Engine::with_defaults();
    let packet = Packet::new(1, 0, frame).with_link_type(LINKTYPE_LAPD);
    let dissection = engine.dissect(&packet);

    assert!(!dissection.has_errors());
    assert_eq!(dissection.columns.protocol(), "LAPD");
    assert_eq!(dissection.columns.info(), "SAPI 0 (Call control), TEI 64, UI");
    assert_eq!(dissection.tree.find("fcs").unwrap().value(), Some(&FieldValue::UInt16(fcs)));
    assert!(dissection
        .tree
        .iter()
        .all(|(_, n)| !matches!(n.kind(), NodeKind::Annotation(_))));
}
