use crate::{DecodeError, Parser};

/// Transparent-relay codec: every received chunk is one complete message and
/// is forwarded byte-for-byte. No accumulation, no framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawParser;

impl Parser<Vec<u8>> for RawParser {
    fn from_bytes(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        if chunk.is_empty() {
            return Ok(None);
        }
        Ok(Some(chunk.to_vec()))
    }

    fn to_bytes(&self, msg: &Vec<u8>) -> Vec<u8> {
        msg.clone()
    }
}

#[cfg(test)]
mod test {
    use super::RawParser;
    use crate::Parser;

    #[test_log::test]
    fn chunk_is_one_message() {
        let mut parser = RawParser;

        assert_eq!(parser.from_bytes(b"hello").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(parser.from_bytes(b"").unwrap(), None);
        assert_eq!(parser.to_bytes(&b"hello".to_vec()), b"hello".to_vec());
    }
}
