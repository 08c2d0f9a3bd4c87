use crate::{DecodeError, Parser};

const DEFAULT_MAX_FRAME: usize = 16 * 1024;
const HEADER_LEN: usize = 2;

/// Length-prefixed framing: a 2-byte big-endian payload length followed by
/// the payload. Frame boundaries are independent of read boundaries, so
/// partial input is buffered across calls until a frame completes.
pub struct FrameParser {
    pending: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameParser {
    pub fn new(max_frame: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_frame,
        }
    }
}

impl Parser<Vec<u8>> for FrameParser {
    fn from_bytes(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u16::from_be_bytes([self.pending[0], self.pending[1]]) as usize;
        if len > self.max_frame {
            return Err(DecodeError::FrameTooLarge {
                got: len,
                limit: self.max_frame,
            });
        }
        if self.pending.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let payload = self.pending[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.pending.drain(..HEADER_LEN + len);
        Ok(Some(payload))
    }

    fn to_bytes(&self, msg: &Vec<u8>) -> Vec<u8> {
        debug_assert!(msg.len() <= u16::MAX as usize);
        let mut out = Vec::with_capacity(HEADER_LEN + msg.len());
        out.extend_from_slice(&(msg.len() as u16).to_be_bytes());
        out.extend_from_slice(msg);
        out
    }
}

#[cfg(test)]
mod test {
    use super::FrameParser;
    use crate::{DecodeError, Parser};

    #[test_log::test]
    fn frame_spanning_reads_completes_late() {
        let mut parser = FrameParser::default();

        // header announcing 3 payload bytes
        assert_eq!(parser.from_bytes(&[0x00, 0x03]).unwrap(), None);
        assert_eq!(parser.from_bytes(b"ab").unwrap(), None);
        assert_eq!(parser.from_bytes(b"c").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(parser.from_bytes(&[]).unwrap(), None);
    }

    #[test_log::test]
    fn two_frames_in_one_chunk() {
        let mut parser = FrameParser::default();
        let mut wire = parser.to_bytes(&b"one".to_vec());
        wire.extend(parser.to_bytes(&b"two".to_vec()));

        assert_eq!(parser.from_bytes(&wire).unwrap(), Some(b"one".to_vec()));
        assert_eq!(parser.from_bytes(&[]).unwrap(), Some(b"two".to_vec()));
        assert_eq!(parser.from_bytes(&[]).unwrap(), None);
    }

    #[test_log::test]
    fn oversize_frame_is_rejected() {
        let mut parser = FrameParser::new(16);

        match parser.from_bytes(&[0x01, 0x00]) {
            Err(DecodeError::FrameTooLarge { got, limit }) => {
                assert_eq!(got, 256);
                assert_eq!(limit, 16);
            }
            other => panic!("expected oversize error, got {other:?}"),
        }
    }

    #[test_log::test]
    fn roundtrip() {
        let mut parser = FrameParser::default();
        let wire = parser.to_bytes(&b"payload".to_vec());

        assert_eq!(parser.from_bytes(&wire).unwrap(), Some(b"payload".to_vec()));
    }
}
