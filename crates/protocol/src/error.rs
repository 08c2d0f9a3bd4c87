use thiserror::Error;

/// Malformed application data. Never crashes the connection core; the
/// offending connection is closed by policy instead.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame of {got} bytes exceeds limit of {limit}")]
    FrameTooLarge { got: usize, limit: usize },

    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

/// Handshake failure before any payload was allowed to flow.
#[derive(Debug, Error)]
pub enum NegotiateError {
    #[error("handshake token mismatch at byte {at}")]
    TokenMismatch { at: usize },

    #[error("{got} handshake bytes received after verification")]
    AlreadyVerified { got: usize },
}
