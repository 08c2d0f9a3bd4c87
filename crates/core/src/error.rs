use std::io;

use protocol::{DecodeError, NegotiateError};
use thiserror::Error;

/// Connection-scoped failure taxonomy.
///
/// Transport, end-of-stream, decode and negotiation failures are recovered
/// locally: the failing connection is cleaned up and its peer asked to close,
/// nothing unwinds into the dispatcher loop. Pairing violations indicate a
/// dispatcher/core desynchronization and are fatal to the connection involved.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("end of stream")]
    EndOfStream,

    #[error("protocol decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("negotiation error: {0}")]
    Negotiate(#[from] NegotiateError),

    #[error("pairing violation: {0}")]
    PairingViolation(&'static str),
}
