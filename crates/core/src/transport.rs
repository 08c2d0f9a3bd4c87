use std::{io, net::SocketAddr};

pub mod tcp;

/// Non-blocking socket surface the core drives. Socket creation and
/// configuration stay outside the core; handlers only ever see this trait.
///
/// `read` returning `Ok(0)` means the remote closed its end; `WouldBlock`
/// from any call means the readiness report was spurious and the operation
/// should be retried on the next callback.
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Poll a pending outbound connect: `Ok(true)` once established,
    /// `Ok(false)` while still in progress.
    fn finish_connect(&mut self) -> io::Result<bool>;

    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Opens the outbound non-blocking socket behind an upstream pairing request.
pub trait Connector {
    type Transport: Transport;

    fn connect(&self, addr: SocketAddr) -> io::Result<Self::Transport>;
}
