//! Fuzz target for whole-packet dissection.
//!
//! Feeds arbitrary bytes through the default engine along every entry point
//! the built-in dissectors are reachable from:
//! - `tcp.port` 443 and an unbound port (SSL table and heuristic paths)
//! - `udp.port` 2427 (MGCP)
//! - `link.type` 203 (LAPD, then the SAPI table)
//!
//! The first input byte selects a reported length larger than the capture
//! so partial-record paths are exercised too.

#![no_main]

use dissect_core::{Endpoint, Engine, FlowTuple, Packet, Transport};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&extra, payload)) = data.split_first() else {
        return;
    };

    let engine = Engine::with_defaults();
    let reported = payload.len() + usize::from(extra);

    let flows = [
        (Transport::Tcp, 443),
        (Transport::Tcp, 8443),
        (Transport::Udp, 2427),
        (Transport::Udp, 9999),
    ];
    for (frame, (transport, port)) in flows.into_iter().enumerate() {
        let flow = FlowTuple::new(
            transport,
            Endpoint::new([192, 0, 2, 1], 50_000),
            Endpoint::new([192, 0, 2, 10], port),
        );
        let packet = Packet::new(frame as u64, 0, payload.to_vec())
            .with_reported_len(reported)
            .with_flow(flow);
        let _ = engine.dissect(&packet);
    }

    // LAPD framing, with and without capture truncation
    let packet = Packet::new(10, 0, payload.to_vec()).with_link_type(203);
    let _ = engine.dissect(&packet);
    let packet = Packet::new(11, 0, payload.to_vec())
        .with_reported_len(reported)
        .with_link_type(203);
    let dissection = engine.dissect(&packet);
    let _ = dissection.tree.render();
});
