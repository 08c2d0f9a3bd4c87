use crate::ConnId;

/// Readiness kinds a connection can ask the external dispatcher to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Connect,
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    pub fn is_readable(&self) -> bool {
        matches!(self, Interest::Read | Interest::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Interest::Write | Interest::ReadWrite)
    }
}

/// External event-loop collaborator. The core expresses what readiness it
/// wants next through this interface and the dispatcher calls back into
/// [`ProxyEngine::handle_connect`]/[`handle_read`]/[`handle_write`] when the
/// OS reports it.
///
/// Both calls are idempotent with respect to kinds not currently subscribed,
/// and the dispatcher must never deliver a callback for a kind that was not
/// subscribed at dispatch time.
///
/// [`ProxyEngine::handle_connect`]: crate::ProxyEngine::handle_connect
/// [`handle_read`]: crate::ProxyEngine::handle_read
/// [`handle_write`]: crate::ProxyEngine::handle_write
pub trait Dispatcher {
    fn subscribe(&mut self, id: ConnId, interest: Interest);
    fn unsubscribe(&mut self, id: ConnId, interest: Interest);
}

#[cfg(test)]
mod test {
    use super::Interest;

    #[test_log::test]
    fn interest_kinds() {
        assert!(Interest::Read.is_readable());
        assert!(!Interest::Read.is_writable());
        assert!(Interest::Write.is_writable());
        assert!(Interest::ReadWrite.is_readable() && Interest::ReadWrite.is_writable());
        assert!(!Interest::Connect.is_readable() && !Interest::Connect.is_writable());
    }
}
