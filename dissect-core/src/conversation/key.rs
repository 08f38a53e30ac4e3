use crate::packet::{Endpoint, FlowTuple, Transport};

/// Identity of a conversation.
///
/// Stream keys hold both endpoints in normalized order, so either direction
/// maps to the same key. Datagram keys hold only the endpoint expected to
/// stay stable, because replies may come from another address than the one
/// a request was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    transport: Transport,
    a: Endpoint,
    b: Option<Endpoint>,
    transaction: Option<u64>,
}

impl ConversationKey {
    /// Key over both endpoints; ensures `a <= b`.
    pub fn stream(transport: Transport, src: Endpoint, dst: Endpoint) -> Self {
        let (a, b) = if src <= dst { (src, dst) } else { (dst, src) };
        Self {
            transport,
            a,
            b: Some(b),
            transaction: None,
        }
    }

    /// Key over the one endpoint that must match.
    pub fn datagram(transport: Transport, stable: Endpoint) -> Self {
        Self {
            transport,
            a: stable,
            b: None,
            transaction: None,
        }
    }

    /// Stream key of a packet's flow.
    pub fn from_flow(flow: &FlowTuple) -> Self {
        Self::stream(flow.transport, flow.src, flow.dst)
    }

    /// Narrow the key to one transaction identifier.
    pub fn with_transaction(mut self, id: u64) -> Self {
        self.transaction = Some(id);
        self
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The endpoints this key matches on.
    pub fn endpoints(&self) -> (Endpoint, Option<Endpoint>) {
        (self.a, self.b)
    }

    pub fn transaction(&self) -> Option<u64> {
        self.transaction
    }

    /// Whether the key matches both directions of an endpoint pair.
    pub fn is_stream(&self) -> bool {
        self.b.is_some()
    }
}
