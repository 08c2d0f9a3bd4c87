use std::{collections::HashMap, io, net::SocketAddr};

use protocol::{Link, Negotiator, Parser, Protocol};

use crate::{
    connection::ProxyConnection,
    dispatcher::{Dispatcher, Interest},
    error::ProxyError,
    queue::OutgoingQueue,
    transport::{Connector, Transport},
    ConnId, ConnState,
};

/// Connection table and per-connection state machine of the proxy core.
///
/// The engine owns every live connection. The external dispatcher delivers
/// readiness through [`handle_connect`]/[`handle_read`]/[`handle_write`] and
/// receives interest changes through the [`Dispatcher`] handed to each call.
/// Callbacks run to completion one at a time; cross-connection interaction
/// happens only by enqueueing onto the peer's outgoing queue.
///
/// [`handle_connect`]: ProxyEngine::handle_connect
/// [`handle_read`]: ProxyEngine::handle_read
/// [`handle_write`]: ProxyEngine::handle_write
pub struct ProxyEngine<C: Connector, M> {
    connector: C,
    conns: HashMap<ConnId, ProxyConnection<C::Transport, M>>,
    next_id: u64,
}

enum ReadStep {
    Data(usize),
    Eof,
    Spurious,
    Failed(io::Error),
}

enum WriteStep {
    Sent(usize),
    Violation,
    Spurious,
    Failed(io::Error),
}

enum ConnectStep {
    Established(Option<ConnId>),
    InFlight,
    Failed(io::Error),
    Violation,
}

enum HandshakeOutcome {
    Closed,
    InProgress,
    Verified { consumed: usize },
}

impl<C: Connector, M> ProxyEngine<C, M> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            conns: HashMap::new(),
            next_id: 0,
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    pub fn state(&self, id: ConnId) -> Option<ConnState> {
        self.conns.get(&id).map(|conn| conn.state)
    }

    /// Resolved peer of `id`: itself while unpaired, `None` once closed.
    pub fn peer(&self, id: ConnId) -> Option<ConnId> {
        self.conns.get(&id).map(|conn| conn.peer_or(id))
    }

    pub fn verified(&self, id: ConnId) -> Option<bool> {
        self.conns.get(&id).map(|conn| conn.negotiator.is_verified())
    }

    pub fn queued_buffers(&self, id: ConnId) -> Option<usize> {
        self.conns.get(&id).map(|conn| conn.outgoing.len())
    }

    /// Socket access for the event-loop harness (poll registration).
    pub fn transport_mut(&mut self, id: ConnId) -> Option<&mut C::Transport> {
        self.conns.get_mut(&id).map(|conn| &mut conn.transport)
    }

    /// Install an accepted inbound socket. The caller follows up with
    /// [`request_read`] or [`request_connect`] to start traffic.
    ///
    /// [`request_read`]: ProxyEngine::request_read
    /// [`request_connect`]: ProxyEngine::request_connect
    pub fn add_connection(
        &mut self,
        transport: C::Transport,
        negotiator: Box<dyn Negotiator>,
        parser: Box<dyn Parser<M>>,
        protocol: Box<dyn Protocol<M>>,
    ) -> ConnId {
        let id = self.alloc_id();
        let conn = ProxyConnection::new(transport, ConnState::Open, negotiator, parser, protocol);
        self.conns.insert(id, conn);
        log::info!("[ProxyEngine] conn {id} added, {} live", self.conns.len());
        id
    }

    /// Open the upstream side of a pairing: a new connection wrapping a
    /// non-blocking outbound socket to `addr`, cross-linked with `id`.
    /// Pairing is one-time; a second call on the same connection is a
    /// pairing violation. The caller goes quiet (read/write unsubscribed)
    /// until the connect resolves.
    pub fn request_connect(
        &mut self,
        id: ConnId,
        addr: SocketAddr,
        negotiator: Box<dyn Negotiator>,
        parser: Box<dyn Parser<M>>,
        protocol: Box<dyn Protocol<M>>,
        d: &mut dyn Dispatcher,
    ) -> Result<ConnId, ProxyError> {
        {
            let conn = self
                .conns
                .get(&id)
                .ok_or(ProxyError::PairingViolation("connect requested on closed connection"))?;
            if conn.peer.is_some() || conn.connect_pending {
                return Err(ProxyError::PairingViolation("connection is already paired"));
            }
        }

        let transport = self.connector.connect(addr)?;
        let upstream_id = self.alloc_id();
        let mut upstream =
            ProxyConnection::new(transport, ConnState::Connecting, negotiator, parser, protocol);
        upstream.peer = Some(id);
        upstream.connect_pending = true;
        self.conns.insert(upstream_id, upstream);

        let conn = self.conns.get_mut(&id).expect("checked live above");
        conn.peer = Some(upstream_id);
        conn.connect_pending = true;

        log::info!("[ProxyEngine] conn {id} pairing with upstream {addr} as conn {upstream_id}");
        d.unsubscribe(id, Interest::ReadWrite);
        d.subscribe(upstream_id, Interest::Connect);
        Ok(upstream_id)
    }

    /// Ask to watch for read readiness. Deferred while a connect is pending;
    /// skipped while output is queued, since reads resume only once the
    /// outgoing queue drains (this bounds buffered memory per connection).
    pub fn request_read(&mut self, id: ConnId, d: &mut dyn Dispatcher) {
        let Some(conn) = self.conns.get(&id) else { return };
        if conn.connect_pending || conn.close_requested {
            return;
        }
        if conn.outgoing.is_empty() {
            d.subscribe(id, Interest::Read);
        }
    }

    /// Queue `buf` on `id`'s outgoing queue and watch for write readiness.
    /// While output is pending the read interest is dropped: the queue is
    /// drained before more input is accepted.
    pub fn request_write(&mut self, id: ConnId, buf: Vec<u8>, d: &mut dyn Dispatcher) {
        let Some(conn) = self.conns.get_mut(&id) else {
            log::debug!("[ProxyEngine] dropping {} bytes for closed conn {id}", buf.len());
            return;
        };
        if buf.is_empty() {
            return;
        }
        conn.outgoing.push(buf);
        if conn.connect_pending {
            // subscription applied once the connect completes
            return;
        }
        d.subscribe(id, Interest::Write);
        d.unsubscribe(id, Interest::Read);
    }

    /// Idempotent graceful close: stop reading now, flush what is already
    /// queued, release the socket once the queue is empty.
    pub fn request_close(&mut self, id: ConnId, d: &mut dyn Dispatcher) {
        let drained = {
            let Some(conn) = self.conns.get_mut(&id) else { return };
            if conn.close_requested {
                return;
            }
            conn.close_requested = true;
            conn.state = ConnState::Closing;
            log::debug!(
                "[ProxyEngine] conn {id} close requested, {} buffers queued",
                conn.outgoing.len()
            );
            conn.outgoing.is_empty()
        };
        d.unsubscribe(id, Interest::Read);
        if drained {
            self.close_now(id, d);
        }
    }

    /// Dispatcher callback: connect readiness on an upstream socket.
    pub fn handle_connect(&mut self, id: ConnId, d: &mut dyn Dispatcher) {
        let step = {
            let Some(conn) = self.conns.get_mut(&id) else { return };
            if conn.state != ConnState::Connecting {
                log::error!(
                    "[ProxyEngine] connect readiness for conn {id} in state {:?}",
                    conn.state
                );
                ConnectStep::Violation
            } else {
                match conn.transport.finish_connect() {
                    Ok(true) => {
                        conn.state = ConnState::Open;
                        log::info!(
                            "[ProxyEngine] conn {id} connected to {:?}",
                            conn.transport.peer_addr()
                        );
                        ConnectStep::Established(conn.peer)
                    }
                    Ok(false) => ConnectStep::InFlight,
                    Err(err) => ConnectStep::Failed(err),
                }
            }
        };
        match step {
            ConnectStep::InFlight => {}
            ConnectStep::Violation => self.fail(
                id,
                ProxyError::PairingViolation("connect readiness outside connecting state"),
                d,
            ),
            ConnectStep::Failed(err) => self.fail(id, ProxyError::Transport(err), d),
            ConnectStep::Established(peer) => {
                d.unsubscribe(id, Interest::Connect);
                self.resume_after_connect(id, d);
                if let Some(peer) = peer {
                    self.resume_after_connect(peer, d);
                }
            }
        }
    }

    /// Dispatcher callback: read readiness. Reads one chunk, routes it to the
    /// negotiator until verified and to the codec afterwards, then resumes
    /// reading unless output is now queued on this side.
    ///
    /// Returns true when the chunk filled the whole read buffer, meaning more
    /// input may already be waiting; edge-triggered harnesses keep calling
    /// until this goes false or the read interest is dropped.
    pub fn handle_read(&mut self, id: ConnId, d: &mut dyn Dispatcher) -> bool {
        let step = {
            let Some(conn) = self.conns.get_mut(&id) else { return false };
            match conn.transport.read(&mut conn.read_buf[..]) {
                Ok(0) => ReadStep::Eof,
                Ok(n) => ReadStep::Data(n),
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::Interrupted =>
                {
                    ReadStep::Spurious
                }
                Err(err) => ReadStep::Failed(err),
            }
        };
        let len = match step {
            ReadStep::Data(len) => len,
            ReadStep::Spurious => return false,
            ReadStep::Eof => {
                self.fail(id, ProxyError::EndOfStream, d);
                return false;
            }
            ReadStep::Failed(err) => {
                self.fail(id, ProxyError::Transport(err), d);
                return false;
            }
        };

        // one in-flight read per connection
        d.unsubscribe(id, Interest::Read);

        let verified = self.verified(id).unwrap_or(false);
        let offset = if verified {
            0
        } else {
            match self.advance_handshake(id, len, d) {
                HandshakeOutcome::Closed => return false,
                HandshakeOutcome::InProgress => len,
                HandshakeOutcome::Verified { consumed } => consumed.min(len),
            }
        };

        if offset < len && !self.run_pipeline(id, offset, len, d) {
            return false;
        }

        self.request_read(id, d);
        len == crate::connection::READ_BUFFER_SIZE
    }

    /// Dispatcher callback: write readiness. Precondition: the outgoing
    /// queue is non-empty; a callback with an empty queue is a dispatcher
    /// contract violation and is fatal to the connection.
    ///
    /// Returns true when bytes went out but the queue is still non-empty;
    /// edge-triggered harnesses keep calling until this goes false.
    pub fn handle_write(&mut self, id: ConnId, d: &mut dyn Dispatcher) -> bool {
        let step = {
            let Some(conn) = self.conns.get_mut(&id) else { return false };
            match conn.outgoing.pending() {
                None => WriteStep::Violation,
                Some(chunk) => match conn.transport.write(chunk) {
                    Ok(sent) => WriteStep::Sent(sent),
                    Err(err)
                        if err.kind() == io::ErrorKind::WouldBlock
                            || err.kind() == io::ErrorKind::Interrupted =>
                    {
                        WriteStep::Spurious
                    }
                    Err(err) => WriteStep::Failed(err),
                },
            }
        };
        match step {
            WriteStep::Spurious => false,
            WriteStep::Violation => {
                self.fail(
                    id,
                    ProxyError::PairingViolation("write readiness with empty outgoing queue"),
                    d,
                );
                false
            }
            WriteStep::Failed(err) => {
                self.fail(id, ProxyError::Transport(err), d);
                false
            }
            WriteStep::Sent(sent) => {
                let (drained, close_requested) = {
                    let Some(conn) = self.conns.get_mut(&id) else { return false };
                    conn.outgoing.advance(sent);
                    (conn.outgoing.is_empty(), conn.close_requested)
                };
                if drained {
                    d.unsubscribe(id, Interest::Write);
                    if close_requested {
                        self.close_now(id, d);
                    } else {
                        // queue drained: this side may accept input again
                        d.subscribe(id, Interest::Read);
                    }
                    false
                } else {
                    sent > 0
                }
            }
        }
    }

    fn alloc_id(&mut self) -> ConnId {
        let id = ConnId::from(self.next_id);
        self.next_id += 1;
        id
    }

    /// Apply subscriptions deferred while a pairing transition was in
    /// flight: flush queued output first, otherwise go back to reading.
    fn resume_after_connect(&mut self, id: ConnId, d: &mut dyn Dispatcher) {
        let (has_output, close_requested) = {
            let Some(conn) = self.conns.get_mut(&id) else { return };
            conn.connect_pending = false;
            (!conn.outgoing.is_empty(), conn.close_requested)
        };
        if has_output {
            d.subscribe(id, Interest::Write);
        } else if close_requested {
            self.close_now(id, d);
        } else {
            d.subscribe(id, Interest::Read);
        }
    }

    /// Route one received chunk to the negotiator. The negotiator sees every
    /// byte until it verifies; a tail left unconsumed by the verifying call
    /// belongs to the codec.
    fn advance_handshake(
        &mut self,
        id: ConnId,
        len: usize,
        d: &mut dyn Dispatcher,
    ) -> HandshakeOutcome {
        let (result, closed_by_negotiator) = {
            let Some(conn) = self.conns.get_mut(&id) else {
                return HandshakeOutcome::Closed;
            };
            let ProxyConnection {
                negotiator,
                outgoing,
                state,
                close_requested,
                connect_pending,
                read_buf,
                ..
            } = conn;
            let mut link = EngineLink {
                id,
                outgoing,
                state,
                close_requested,
                connect_pending: *connect_pending,
                dispatcher: &mut *d,
                close_now: false,
            };
            let result = negotiator.handshake(&mut link, &read_buf[..len]);
            (result, link.close_now)
        };
        match result {
            Err(err) => {
                self.fail(id, ProxyError::Negotiate(err), d);
                HandshakeOutcome::Closed
            }
            Ok(consumed) => {
                if closed_by_negotiator {
                    self.close_now(id, d);
                    return HandshakeOutcome::Closed;
                }
                if self.verified(id).unwrap_or(false) {
                    log::info!("[ProxyEngine] conn {id} handshake verified");
                    HandshakeOutcome::Verified { consumed }
                } else {
                    HandshakeOutcome::InProgress
                }
            }
        }
    }

    /// Decode every complete message in the chunk, run each through the
    /// protocol, and queue what it produces on the peer. Returns false if the
    /// connection was closed by a decode failure.
    fn run_pipeline(&mut self, id: ConnId, offset: usize, len: usize, d: &mut dyn Dispatcher) -> bool {
        let mut out: Vec<Vec<u8>> = Vec::new();
        let peer;
        let decode_err = {
            let Some(conn) = self.conns.get_mut(&id) else { return false };
            peer = conn.peer_or(id);
            let ProxyConnection {
                parser,
                protocol,
                read_buf,
                ..
            } = conn;
            let mut chunk: &[u8] = &read_buf[offset..len];
            loop {
                match parser.from_bytes(chunk) {
                    Ok(Some(msg)) => {
                        chunk = &[];
                        if let Some(resp) = protocol.process(msg) {
                            out.push(parser.to_bytes(&resp));
                        }
                    }
                    Ok(None) => break None,
                    Err(err) => break Some(err),
                }
            }
        };
        if let Some(err) = decode_err {
            self.fail(id, ProxyError::Decode(err), d);
            return false;
        }
        for buf in out {
            self.request_write(peer, buf, d);
        }
        true
    }

    /// Connection-scoped failure recovery: release this side now and ask the
    /// peer to close gracefully. Nothing propagates to the dispatcher loop.
    fn fail(&mut self, id: ConnId, err: ProxyError, d: &mut dyn Dispatcher) {
        match &err {
            ProxyError::EndOfStream => log::info!("[ProxyEngine] conn {id} reached end of stream"),
            err => log::error!("[ProxyEngine] conn {id} failed: {err}"),
        }
        let peer = self.conns.get(&id).map(|conn| conn.peer_or(id));
        self.close_now(id, d);
        if let Some(peer) = peer {
            if peer != id {
                self.request_close(peer, d);
            }
        }
    }

    /// Release the socket and forget the connection. Removal makes further
    /// callbacks to this id structurally impossible.
    fn close_now(&mut self, id: ConnId, d: &mut dyn Dispatcher) {
        if self.conns.remove(&id).is_some() {
            d.unsubscribe(id, Interest::Connect);
            d.unsubscribe(id, Interest::ReadWrite);
            log::info!("[ProxyEngine] conn {id} closed, {} live", self.conns.len());
        }
    }
}

/// Connection capabilities handed to a negotiator mid-handshake. Mirrors the
/// engine's request_write/request_close rules on the connection being gated.
struct EngineLink<'a> {
    id: ConnId,
    outgoing: &'a mut OutgoingQueue,
    state: &'a mut ConnState,
    close_requested: &'a mut bool,
    connect_pending: bool,
    dispatcher: &'a mut dyn Dispatcher,
    close_now: bool,
}

impl Link for EngineLink<'_> {
    fn request_write(&mut self, buf: Vec<u8>) {
        if buf.is_empty() {
            return;
        }
        self.outgoing.push(buf);
        if self.connect_pending {
            return;
        }
        self.dispatcher.subscribe(self.id, Interest::Write);
        self.dispatcher.unsubscribe(self.id, Interest::Read);
    }

    fn request_close(&mut self) {
        if *self.close_requested {
            return;
        }
        *self.close_requested = true;
        *self.state = ConnState::Closing;
        self.dispatcher.unsubscribe(self.id, Interest::Read);
        if self.outgoing.is_empty() {
            self.close_now = true;
        }
    }
}
