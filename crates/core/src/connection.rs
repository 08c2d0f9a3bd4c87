use protocol::{Negotiator, Parser, Protocol};

use crate::{queue::OutgoingQueue, ConnId};

pub(crate) const READ_BUFFER_SIZE: usize = 1024;

/// Lifecycle of one endpoint. `Closed` has no variant: a closed connection is
/// removed from the engine table, which makes delivering further callbacks to
/// it structurally impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Outbound side of a pairing, connect still in flight.
    Connecting,
    /// Read/write active.
    Open,
    /// Close requested, outgoing queue still draining.
    Closing,
}

/// One endpoint of a proxied flow: the socket, its scratch read buffer, its
/// outgoing queue and the pluggable protocol triple bound at construction.
pub(crate) struct ProxyConnection<T, M> {
    pub transport: T,
    pub read_buf: Box<[u8; READ_BUFFER_SIZE]>,
    pub outgoing: OutgoingQueue,
    pub state: ConnState,
    pub close_requested: bool,
    /// `None` until paired; an unpaired connection is its own peer. Once set,
    /// never changed for the connection's lifetime.
    pub peer: Option<ConnId>,
    /// Set on both sides while an upstream connect is in flight; read/write
    /// subscriptions are deferred until the connect completes.
    pub connect_pending: bool,
    pub negotiator: Box<dyn Negotiator>,
    pub parser: Box<dyn Parser<M>>,
    pub protocol: Box<dyn Protocol<M>>,
}

impl<T, M> ProxyConnection<T, M> {
    pub fn new(
        transport: T,
        state: ConnState,
        negotiator: Box<dyn Negotiator>,
        parser: Box<dyn Parser<M>>,
        protocol: Box<dyn Protocol<M>>,
    ) -> Self {
        Self {
            transport,
            read_buf: Box::new([0u8; READ_BUFFER_SIZE]),
            outgoing: OutgoingQueue::default(),
            state,
            close_requested: false,
            peer: None,
            connect_pending: false,
            negotiator,
            parser,
            protocol,
        }
    }

    /// Resolved peer: itself while unpaired.
    pub fn peer_or(&self, own: ConnId) -> ConnId {
        self.peer.unwrap_or(own)
    }
}
