//! Connection-handling core of a non-blocking TCP intercepting proxy.
//!
//! The core turns readiness callbacks from an external dispatcher into
//! read/write/connect actions on non-blocking sockets, pairs each accepted
//! client connection with an upstream one, and relays traffic between the two
//! through per-connection outgoing queues. A pluggable (negotiator, parser,
//! protocol) triple can gate, frame and transform traffic in flight.
//!
//! Single-threaded by design: one callback runs to completion at a time, and
//! ordering between paired connections is guaranteed only by the explicit
//! subscribe/unsubscribe protocol with the dispatcher, never by locks.

use std::fmt::Display;

use derive_more::derive::{Deref, From};

mod connection;
mod dispatcher;
mod engine;
mod error;
mod queue;
mod transport;


pub use connection::ConnState;
pub use dispatcher::{Dispatcher, Interest};
pub use engine::ProxyEngine;
pub use error::ProxyError;
pub use queue::OutgoingQueue;
pub use transport::tcp::{TcpConnector, TcpTransport};
pub use transport::{Connector, Transport};

/// Identifier of one proxied connection endpoint. Monotonic and never reused,
/// so a stale peer reference fails the table lookup instead of aliasing a
/// newer connection.
#[derive(Debug, Hash, PartialEq, Eq, From, Deref, Clone, Copy, PartialOrd, Ord)]
pub struct ConnId(u64);

impl Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}
