use std::{
    io::{self, Read as _, Write as _},
    net::SocketAddr,
};

use mio::net::TcpStream;

use super::{Connector, Transport};

/// mio-backed non-blocking TCP socket.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Registration handle for the event-loop harness.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn finish_connect(&mut self) -> io::Result<bool> {
        // mio reports connect completion as writability; a refused connect
        // surfaces through take_error or a still-unconnected peer_addr.
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(_) => Ok(true),
            Err(err)
                if err.kind() == io::ErrorKind::NotConnected
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

/// Opens upstream `TcpTransport` sockets with a non-blocking connect.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn connect(&self, addr: SocketAddr) -> io::Result<TcpTransport> {
        TcpStream::connect(addr).map(TcpTransport::new)
    }
}
