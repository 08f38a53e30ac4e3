//! Test utilities for protocol dissectors.
//!
//! Provides builders for constructing test payloads and helpers that run
//! a single dissector against them.

use std::net::Ipv4Addr;

use crate::context::{Columns, DissectionContext};
use crate::conversation::ConversationTable;
use crate::cursor::{ByteCursor, ChecksumAlgorithm};
use crate::error::Result;
use crate::packet::{Endpoint, FlowTuple, PacketInfo, Transport};
use crate::registry::{Dissector, DissectorRegistry};
use crate::tree::{FieldTree, FinalizedTree};

const CLIENT_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
const SERVER_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);

/// Flow between a client and a server; the lower port is the server's.
fn flow(transport: Transport, src_port: u16, dst_port: u16) -> FlowTuple {
    let addr = |port: u16, other: u16| if port <= other { SERVER_ADDR } else { CLIENT_ADDR };
    FlowTuple::new(
        transport,
        Endpoint::new(addr(src_port, dst_port), src_port),
        Endpoint::new(addr(dst_port, src_port), dst_port),
    )
}

pub fn tcp_flow(src_port: u16, dst_port: u16) -> FlowTuple {
    flow(Transport::Tcp, src_port, dst_port)
}

pub fn udp_flow(src_port: u16, dst_port: u16) -> FlowTuple {
    flow(Transport::Udp, src_port, dst_port)
}

/// Run one dissector over `data` outside any registry dispatch.
pub fn run<'a>(
    dissector: &dyn Dissector,
    data: &'a [u8],
    conversations: &ConversationTable,
    info: PacketInfo,
) -> (Result<usize>, FinalizedTree<'a>, Columns) {
    let registry = DissectorRegistry::new();
    let mut ctx = DissectionContext::new(&registry, conversations, info, 8);
    let mut tree = FieldTree::new("frame", data.len());
    let result = dissector.dissect(ByteCursor::from_slice(data), &mut tree.root_mut(), &mut ctx);
    (result, tree.finalize(), ctx.into_columns())
}

/// Dissect one frame, panicking on error.
pub fn dissect_frame<'a>(
    dissector: &dyn Dissector,
    data: &'a [u8],
    conversations: &ConversationTable,
    frame_number: u64,
    timestamp_us: i64,
    flow: Option<FlowTuple>,
) -> (FinalizedTree<'a>, Columns) {
    let info = PacketInfo {
        frame_number,
        timestamp_us,
        captured_len: data.len(),
        reported_len: data.len(),
        flow,
        ..Default::default()
    };
    let (result, tree, columns) = run(dissector, data, conversations, info);
    if let Err(err) = result {
        panic!("{} failed: {err}\n{}", dissector.name(), tree.render());
    }
    (tree, columns)
}

/// Dissect frame 1 at time zero.
pub fn dissect_with<'a>(
    dissector: &dyn Dissector,
    data: &'a [u8],
    conversations: &ConversationTable,
    flow: Option<FlowTuple>,
) -> (FinalizedTree<'a>, Columns) {
    dissect_frame(dissector, data, conversations, 1, 0, flow)
}

/// Dissect frame 1 and return only the handler's result.
pub fn try_dissect(
    dissector: &dyn Dissector,
    data: &[u8],
    conversations: &ConversationTable,
    flow: Option<FlowTuple>,
) -> Result<usize> {
    let info = PacketInfo {
        frame_number: 1,
        flow,
        ..Default::default()
    };
    run(dissector, data, conversations, info).0
}

// === SSL/TLS ===

/// SSLv3/TLS record: type, version, length, body.
pub fn tls_record(content_type: u8, version: u16, body: &[u8]) -> Vec<u8> {
    let mut out = vec![content_type];
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Handshake message: type, 24-bit length, body.
pub fn handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![msg_type];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

/// ClientHello handshake message offering `version`.
pub fn client_hello(version: u16) -> Vec<u8> {
    let mut body = version.to_be_bytes().to_vec();
    body.extend_from_slice(&[0x11; 32]); // random
    body.push(0); // session id length
    body.extend_from_slice(&4u16.to_be_bytes());
    body.extend_from_slice(&[0x13, 0x01, 0xc0, 0x2f]); // cipher suites
    body.extend_from_slice(&[1, 0]); // compression methods
    handshake(1, &body)
}

/// ServerHello handshake message, optionally with a supported_versions extension.
pub fn server_hello(version: u16, selected: Option<u16>) -> Vec<u8> {
    let mut body = version.to_be_bytes().to_vec();
    body.extend_from_slice(&[0x22; 32]); // random
    body.push(32);
    body.extend_from_slice(&[0x33; 32]); // session id
    body.extend_from_slice(&[0xc0, 0x2f]); // cipher suite
    body.push(0); // compression method
    if let Some(selected) = selected {
        body.extend_from_slice(&6u16.to_be_bytes());
        body.extend_from_slice(&43u16.to_be_bytes());
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&selected.to_be_bytes());
    }
    handshake(2, &body)
}

/// SSLv2 record with a two-byte header.
pub fn ssl2_record(body: &[u8]) -> Vec<u8> {
    let len = body.len() as u16;
    let mut out = vec![0x80 | (len >> 8) as u8, len as u8];
    out.extend_from_slice(body);
    out
}

pub fn ssl2_client_hello(version: u16) -> Vec<u8> {
    let mut body = vec![1];
    body.extend_from_slice(&version.to_be_bytes());
    body.extend_from_slice(&3u16.to_be_bytes()); // cipher specs length
    body.extend_from_slice(&0u16.to_be_bytes()); // session id length
    body.extend_from_slice(&16u16.to_be_bytes()); // challenge length
    body.extend_from_slice(&[0x01, 0x00, 0x80]);
    body.extend_from_slice(&[0x44; 16]);
    body
}

pub fn ssl2_server_hello(version: u16) -> Vec<u8> {
    let mut body = vec![4, 0, 1];
    body.extend_from_slice(&version.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes()); // certificate length
    body.extend_from_slice(&0u16.to_be_bytes()); // cipher specs length
    body.extend_from_slice(&16u16.to_be_bytes()); // connection id length
    body.extend_from_slice(&[0x55; 16]);
    body
}

// === LAPD ===

/// Builder for LAPD frames with a trailing FCS.
#[derive(Debug, Clone, Default)]
pub struct LapdBuilder {
    sapi: u8,
    tei: u8,
    command: bool,
    control: Vec<u8>,
    payload: Vec<u8>,
    fcs: Option<u16>,
}

impl LapdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sapi(mut self, sapi: u8) -> Self {
        self.sapi = sapi;
        self
    }

    pub fn tei(mut self, tei: u8) -> Self {
        self.tei = tei;
        self
    }

    pub fn command(mut self, command: bool) -> Self {
        self.command = command;
        self
    }

    pub fn control(mut self, control: &[u8]) -> Self {
        self.control = control.to_vec();
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Override the computed FCS.
    pub fn fcs(mut self, fcs: u16) -> Self {
        self.fcs = Some(fcs);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut frame = vec![
            (self.sapi << 2) | (u8::from(self.command) << 1),
            (self.tei << 1) | 0x01,
        ];
        frame.extend_from_slice(&self.control);
        frame.extend_from_slice(&self.payload);

        let fcs = self
            .fcs
            .unwrap_or_else(|| ChecksumAlgorithm::Crc16Ccitt.compute(&frame) as u16);
        frame.extend_from_slice(&fcs.to_le_bytes());
        frame
    }
}
