//! Packet records handed to the engine by the capture side.

use std::net::IpAddr;

use bytes::Bytes;

/// Transport protocol of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    Tcp,
    Udp,
    Sctp,
    /// Any other IP protocol number.
    Other(u8),
}

impl Transport {
    /// Whether replies are expected on the same endpoint pair.
    pub fn is_connection_oriented(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::Sctp)
    }

    /// IP protocol number.
    pub fn protocol_number(&self) -> u8 {
        match self {
            Transport::Tcp => 6,
            Transport::Udp => 17,
            Transport::Sctp => 132,
            Transport::Other(n) => *n,
        }
    }

    pub fn from_protocol_number(number: u8) -> Self {
        match number {
            6 => Transport::Tcp,
            17 => Transport::Udp,
            132 => Transport::Sctp,
            n => Transport::Other(n),
        }
    }

    /// Return a string representation of the transport.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Sctp => "sctp",
            Transport::Other(_) => "other",
        }
    }
}

/// An address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.addr {
            IpAddr::V4(addr) => write!(f, "{addr}:{}", self.port),
            IpAddr::V6(addr) => write!(f, "[{addr}]:{}", self.port),
        }
    }
}

/// Transport addressing of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    pub transport: Transport,
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl FlowTuple {
    pub fn new(transport: Transport, src: Endpoint, dst: Endpoint) -> Self {
        Self {
            transport,
            src,
            dst,
        }
    }

    /// Ports ordered lower first, as tried for dispatch.
    pub fn ports_low_first(&self) -> [u64; 2] {
        let (a, b) = (self.src.port, self.dst.port);
        [u64::from(a.min(b)), u64::from(a.max(b))]
    }

    /// The same flow seen from the other direction.
    pub fn reversed(&self) -> Self {
        Self {
            transport: self.transport,
            src: self.dst,
            dst: self.src,
        }
    }
}

/// One captured packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Frame number (1-indexed)
    pub frame_number: u64,
    /// Timestamp in microseconds since Unix epoch
    pub timestamp_us: i64,
    /// Link type from the capture header, used when there is no flow.
    pub link_type: u16,
    /// Transport addressing, when the capture side decoded it.
    pub flow: Option<FlowTuple>,
    /// Original length on the wire (>= captured length)
    reported_len: usize,
    /// Captured bytes (potentially zero-copy with Bytes)
    data: Bytes,
}

impl Packet {
    /// Packet whose captured bytes are its whole wire length.
    pub fn new(frame_number: u64, timestamp_us: i64, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            frame_number,
            timestamp_us,
            link_type: 0,
            flow: None,
            reported_len: data.len(),
            data,
        }
    }

    /// Set the original wire length.
    ///
    /// A length below the captured length is raised to it.
    pub fn with_reported_len(mut self, reported_len: usize) -> Self {
        if reported_len < self.data.len() {
            tracing::warn!(
                frame = self.frame_number,
                reported_len,
                captured_len = self.data.len(),
                "reported length below captured length, clamping"
            );
        }
        self.reported_len = reported_len.max(self.data.len());
        self
    }

    pub fn with_flow(mut self, flow: FlowTuple) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_link_type(mut self, link_type: u16) -> Self {
        self.link_type = link_type;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_len(&self) -> usize {
        self.data.len()
    }

    pub fn reported_len(&self) -> usize {
        self.reported_len
    }

    /// Metadata handed to dissectors.
    pub fn info(&self) -> PacketInfo {
        PacketInfo {
            frame_number: self.frame_number,
            timestamp_us: self.timestamp_us,
            captured_len: self.captured_len(),
            reported_len: self.reported_len,
            link_type: self.link_type,
            flow: self.flow,
        }
    }
}

/// Per-packet metadata without the bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketInfo {
    pub frame_number: u64,
    pub timestamp_us: i64,
    pub captured_len: usize,
    pub reported_len: usize,
    pub link_type: u16,
    pub flow: Option<FlowTuple>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn flow() -> FlowTuple {
        FlowTuple::new(
            Transport::Udp,
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 2727),
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 2427),
        )
    }

    #[test]
    fn test_reported_len_clamped() {
        let packet = Packet::new(1, 0, vec![0u8; 10]).with_reported_len(4);
        assert_eq!(packet.reported_len(), 10);

        let packet = Packet::new(1, 0, vec![0u8; 10]).with_reported_len(1500);
        assert_eq!(packet.captured_len(), 10);
        assert_eq!(packet.reported_len(), 1500);
        assert_eq!(packet.info().reported_len, 1500);
    }

    #[test]
    fn test_ports_low_first() {
        assert_eq!(flow().ports_low_first(), [2427, 2727]);
        assert_eq!(flow().reversed().ports_low_first(), [2427, 2727]);
        assert_eq!(flow().reversed().src.port, 2427);
    }

    #[test]
    fn test_transport() {
        assert!(Transport::Tcp.is_connection_oriented());
        assert!(!Transport::Udp.is_connection_oriented());
        assert_eq!(Transport::from_protocol_number(17), Transport::Udp);
        assert_eq!(Transport::Other(47).protocol_number(), 47);
        assert_eq!(
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 2427).to_string(),
            "10.0.0.1:2427"
        );
    }
}
