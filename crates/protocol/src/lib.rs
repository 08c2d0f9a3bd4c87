//! Pluggable protocol layer that sits between raw proxied bytes and proxy logic.
//!
//! Three seams are defined here: a [`Negotiator`] gates a connection until a
//! pre-payload handshake completes, a [`Parser`] frames raw bytes into
//! messages, and a [`Protocol`] inspects or transforms each decoded message
//! before it is forwarded. A deployment picks one (negotiator, parser,
//! protocol) triple per connection at construction time.

mod error;
mod frame;
mod negotiator;
mod raw;

pub use error::{DecodeError, NegotiateError};
pub use frame::FrameParser;
pub use negotiator::{NullNegotiator, TokenNegotiator};
pub use raw::RawParser;

/// What a negotiator may call back on mid-handshake: queue bytes for the
/// connection it is gating, or give up on it. Both requests follow the
/// connection core's graceful-close and backpressure rules.
pub trait Link {
    fn request_write(&mut self, buf: Vec<u8>);
    fn request_close(&mut self);
}

/// Pre-payload handshake gate. Until [`Negotiator::is_verified`] reports true,
/// the connection core routes every received byte here and none to the codec.
pub trait Negotiator {
    fn is_verified(&self) -> bool;

    /// Consume handshake bytes from the front of `chunk`, optionally emitting
    /// responses through `link`. Returns how many bytes were consumed; once
    /// the handshake verifies mid-chunk, the unconsumed tail belongs to the
    /// message codec. A handshake spanning multiple reads must keep partial
    /// state and resume without losing or double-processing bytes.
    fn handshake(&mut self, link: &mut dyn Link, chunk: &[u8]) -> Result<usize, NegotiateError>;
}

/// Message framing. Decoding must never assume one read equals one message:
/// the parser keeps partial-message state across calls and reports
/// `Ok(None)` while a message is still incomplete.
pub trait Parser<M> {
    /// Feed `chunk` and try to decode one complete message. Call again with
    /// an empty chunk to drain further messages already buffered.
    fn from_bytes(&mut self, chunk: &[u8]) -> Result<Option<M>, DecodeError>;

    /// Inverse encoding, used for anything the proxy produces or rewrites.
    fn to_bytes(&self, msg: &M) -> Vec<u8>;
}

/// Per-message inspection or transformation. `None` means drop the message;
/// `Some` is encoded and queued on the peer connection.
pub trait Protocol<M> {
    fn process(&mut self, msg: M) -> Option<M>;
}

/// Pass-through protocol: forward every message unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Forward;

impl<M> Protocol<M> for Forward {
    fn process(&mut self, msg: M) -> Option<M> {
        Some(msg)
    }
}
