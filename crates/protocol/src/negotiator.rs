use crate::{Link, NegotiateError, Negotiator};

/// Open gate for deployments without a pre-payload handshake: payload flows
/// from the first byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNegotiator;

impl Negotiator for NullNegotiator {
    fn is_verified(&self) -> bool {
        true
    }

    fn handshake(&mut self, _link: &mut dyn Link, _chunk: &[u8]) -> Result<usize, NegotiateError> {
        Ok(0)
    }
}

/// Gates a connection behind an exact byte token. The token may arrive split
/// across any number of reads; matching resumes where the previous read left
/// off. Any byte deviating from the expected token fails the handshake.
pub struct TokenNegotiator {
    expected: Vec<u8>,
    matched: usize,
    ack: Option<Vec<u8>>,
    verified: bool,
}

impl TokenNegotiator {
    pub fn new(expected: Vec<u8>) -> Self {
        Self {
            expected,
            matched: 0,
            ack: None,
            verified: false,
        }
    }

    /// Response emitted to the gated connection once the token matches.
    pub fn with_ack(mut self, ack: Vec<u8>) -> Self {
        self.ack = Some(ack);
        self
    }
}

impl Negotiator for TokenNegotiator {
    fn is_verified(&self) -> bool {
        self.verified
    }

    fn handshake(&mut self, link: &mut dyn Link, chunk: &[u8]) -> Result<usize, NegotiateError> {
        if self.verified {
            return Err(NegotiateError::AlreadyVerified { got: chunk.len() });
        }

        let want = self.expected.len() - self.matched;
        let take = want.min(chunk.len());
        let expected = &self.expected[self.matched..self.matched + take];
        if let Some(pos) = chunk[..take].iter().zip(expected).position(|(got, want)| got != want) {
            return Err(NegotiateError::TokenMismatch { at: self.matched + pos });
        }

        self.matched += take;
        if self.matched == self.expected.len() {
            self.verified = true;
            log::info!("[TokenNegotiator] verified after {} bytes", self.matched);
            if let Some(ack) = self.ack.take() {
                link.request_write(ack);
            }
        }
        Ok(take)
    }
}
