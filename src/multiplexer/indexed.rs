/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::io::{Error, ErrorKind, Result};
use std::sync::Mutex;
use std::time::Duration;

use mio::{Events, Interest, Poll, Registry, Token, Waker};

use log::trace;

use super::{Backend, Multiplexer, Readiness, Socket, SocketHandle};
use crate::utilities::{lock, Timeout};

const WAKE: Token = Token(usize::MAX);

/// [`Multiplexer`] backed by `mio` (epoll, kqueue or IOCP)
///
/// Sockets are registered under a token derived from their raw handle, so a
/// readiness event maps back to the socket without any lookup.
pub struct IndexedMultiplexer {
    poller: Mutex<Poller>,
    registry: Registry,
    waker: Waker,
    state: Mutex<Latch>,
}

struct Poller {
    poll: Poll,
    events: Events,
}

#[derive(Default)]
struct Latch {
    registered: HashSet<SocketHandle>,
    ready: HashMap<SocketHandle, Readiness>,
}

impl IndexedMultiplexer {
    pub fn new() -> Result<Self> {
        Self::with_capacity(128)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE)?;
        Ok(Self {
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(capacity.max(1)),
            }),
            registry,
            waker,
            state: Mutex::new(Latch::default()),
        })
    }

    fn token(handle: SocketHandle) -> Token {
        Token(handle as usize)
    }
}

impl Multiplexer for IndexedMultiplexer {
    fn register(&self, socket: &mut dyn Socket, interest: Interest) -> Result<()> {
        let handle = socket.handle();
        let mut state = lock(&self.state);
        if state.registered.contains(&handle) {
            return Err(Error::new(ErrorKind::AlreadyExists, "Socket is already registered!"));
        }
        self.registry.register(socket, Self::token(handle), interest)?;
        state.registered.insert(handle);
        Ok(())
    }

    fn unregister(&self, socket: &mut dyn Socket) -> Result<()> {
        let handle = socket.handle();
        let mut state = lock(&self.state);
        state.ready.remove(&handle);
        if !state.registered.remove(&handle) {
            return Ok(());
        }
        match self.registry.deregister(socket) {
            Err(error) if error.kind() != ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }

    fn wait(&self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> Result<()> {
        events.clear();

        let mut poller = lock(&self.poller);
        let Poller { poll, events: buffer } = &mut *poller;

        let timeout = match lock(&self.state).ready.is_empty() {
            true => Timeout::start(timeout),
            false => Timeout::start(Some(Duration::ZERO)),
        };

        loop {
            match poll.poll(buffer, timeout.remaining_time()) {
                Ok(()) => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => {
                    if timeout.expired() {
                        buffer.clear();
                        break;
                    }
                }
                Err(error) => return Err(error),
            }
        }

        let mut state = lock(&self.state);
        for event in buffer.iter() {
            if event.token() == WAKE {
                trace!("Multiplexer woken up");
                continue;
            }
            let handle = event.token().0 as SocketHandle;
            if !state.registered.contains(&handle) {
                continue;
            }
            let failed = event.is_error();
            let reported = Readiness {
                handle,
                readable: event.is_readable() || event.is_read_closed() || failed,
                writable: event.is_writable() || event.is_write_closed() || failed,
            };
            state.ready.entry(handle).or_insert_with(|| Readiness::new(handle)).merge(&reported);
        }
        events.extend(state.ready.values().copied());
        Ok(())
    }

    fn drained(&self, handle: SocketHandle) {
        lock(&self.state).ready.remove(&handle);
    }

    fn wake(&self) -> Result<()> {
        self.waker.wake()
    }

    fn backend(&self) -> Backend {
        Backend::Indexed
    }
}

impl Debug for IndexedMultiplexer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("IndexedMultiplexer")
            .field("registered", &state.registered.len())
            .field("latched", &state.ready.len())
            .finish()
    }
}
