use std::{collections::HashMap, io};

use interpose_core::{ConnId, Dispatcher, Interest, ProxyEngine, TcpConnector};
use mio::{Registry, Token};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Wanted {
    connect: bool,
    read: bool,
    write: bool,
}

impl Wanted {
    // mio reports connect completion as writability
    fn to_mio(self) -> Option<mio::Interest> {
        let mut interest = self.read.then_some(mio::Interest::READABLE);
        if self.write || self.connect {
            interest = Some(match interest {
                Some(interest) => interest | mio::Interest::WRITABLE,
                None => mio::Interest::WRITABLE,
            });
        }
        interest
    }
}

/// Maps the core's subscribe/unsubscribe stream onto mio registrations.
///
/// Interest changes only mutate the wanted table; [`sync`] applies them to the
/// poll registry between event batches, so a connection touched several times
/// inside one batch costs a single register/reregister call.
///
/// [`sync`]: MioDispatcher::sync
#[derive(Default)]
pub struct MioDispatcher {
    wanted: HashMap<ConnId, Wanted>,
    applied: HashMap<ConnId, Wanted>,
}

impl Dispatcher for MioDispatcher {
    fn subscribe(&mut self, id: ConnId, interest: Interest) {
        let wanted = self.wanted.entry(id).or_default();
        if interest == Interest::Connect {
            wanted.connect = true;
        }
        if interest.is_readable() {
            wanted.read = true;
        }
        if interest.is_writable() {
            wanted.write = true;
        }
    }

    fn unsubscribe(&mut self, id: ConnId, interest: Interest) {
        let Some(wanted) = self.wanted.get_mut(&id) else { return };
        if interest == Interest::Connect {
            wanted.connect = false;
        }
        if interest.is_readable() {
            wanted.read = false;
        }
        if interest.is_writable() {
            wanted.write = false;
        }
    }
}

impl MioDispatcher {
    // Token(0) belongs to the listener
    pub fn token_of(id: ConnId) -> Token {
        Token(*id as usize + 1)
    }

    pub fn conn_of(token: Token) -> ConnId {
        ConnId::from((token.0 - 1) as u64)
    }

    pub fn wants_connect(&self, id: ConnId) -> bool {
        self.wanted.get(&id).is_some_and(|wanted| wanted.connect)
    }

    pub fn wants_read(&self, id: ConnId) -> bool {
        self.wanted.get(&id).is_some_and(|wanted| wanted.read)
    }

    pub fn wants_write(&self, id: ConnId) -> bool {
        self.wanted.get(&id).is_some_and(|wanted| wanted.write)
    }

    /// Push pending interest changes into the poll registry. Connections the
    /// engine dropped are forgotten; their sockets left the epoll set when
    /// they were closed.
    pub fn sync<M>(
        &mut self,
        registry: &Registry,
        engine: &mut ProxyEngine<TcpConnector, M>,
    ) -> io::Result<()> {
        self.wanted.retain(|id, _| engine.contains(*id));
        self.applied.retain(|id, _| engine.contains(*id));

        for (&id, &wanted) in &self.wanted {
            let applied = self.applied.get(&id).copied().unwrap_or_default();
            if wanted == applied {
                continue;
            }
            let Some(transport) = engine.transport_mut(id) else { continue };
            let stream = transport.stream_mut();
            match (applied.to_mio(), wanted.to_mio()) {
                (None, None) => {}
                (None, Some(interest)) => registry.register(stream, Self::token_of(id), interest)?,
                (Some(_), Some(interest)) => {
                    registry.reregister(stream, Self::token_of(id), interest)?
                }
                (Some(_), None) => registry.deregister(stream)?,
            }
            self.applied.insert(id, wanted);
        }
        Ok(())
    }
}
