use std::collections::VecDeque;

/// Pending write buffers for one connection, flushed strictly in enqueue
/// order. A cursor tracks how much of the head buffer was already sent, so a
/// partial write leaves the head in place and resumes where it stopped; the
/// head is removed only once fully transmitted.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    bufs: VecDeque<Vec<u8>>,
    cursor: usize,
}

impl OutgoingQueue {
    /// Empty buffers are dropped: a queued buffer with nothing to send would
    /// otherwise look like a satisfied write that never drains.
    pub fn push(&mut self, buf: Vec<u8>) {
        if buf.is_empty() {
            return;
        }
        self.bufs.push_back(buf);
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    /// Unsent remainder of the head buffer.
    pub fn pending(&self) -> Option<&[u8]> {
        self.bufs.front().map(|buf| &buf[self.cursor..])
    }

    /// Record `sent` bytes transmitted from the head buffer.
    pub fn advance(&mut self, sent: usize) {
        let head_len = match self.bufs.front() {
            Some(buf) => buf.len(),
            None => return,
        };
        self.cursor += sent;
        debug_assert!(self.cursor <= head_len);
        if self.cursor >= head_len {
            self.bufs.pop_front();
            self.cursor = 0;
        }
    }
}

#[cfg(test)]
mod test {
    use super::OutgoingQueue;

    #[test_log::test]
    fn strict_fifo() {
        let mut queue = OutgoingQueue::default();
        queue.push(b"one".to_vec());
        queue.push(b"two".to_vec());

        assert_eq!(queue.pending(), Some(&b"one"[..]));
        queue.advance(3);
        assert_eq!(queue.pending(), Some(&b"two"[..]));
        queue.advance(3);
        assert_eq!(queue.pending(), None);
        assert!(queue.is_empty());
    }

    #[test_log::test]
    fn partial_send_keeps_head() {
        let mut queue = OutgoingQueue::default();
        queue.push(b"hello".to_vec());

        queue.advance(2);
        assert_eq!(queue.pending(), Some(&b"llo"[..]));
        assert_eq!(queue.len(), 1);

        queue.advance(3);
        assert!(queue.is_empty());
    }

    #[test_log::test]
    fn empty_buffer_is_dropped() {
        let mut queue = OutgoingQueue::default();
        queue.push(Vec::new());

        assert!(queue.is_empty());
        assert_eq!(queue.pending(), None);
    }

    #[test_log::test]
    fn advance_on_empty_queue_is_noop() {
        let mut queue = OutgoingQueue::default();
        queue.advance(10);
        assert!(queue.is_empty());
    }
}
