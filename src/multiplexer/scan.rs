/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::time::Duration;

use mio::Interest;

use log::trace;

use super::{Backend, Multiplexer, Readiness, Socket, SocketHandle};
use crate::utilities::{lock, Timeout};

/// Maximum number of sockets a [`ScanMultiplexer`] accepts.
pub const SCAN_CAPACITY: usize = 1024;

/// [`Multiplexer`] that scans every registered socket with `poll(2)`
///
/// The poll set is rebuilt from the registrations on every `wait()`, which
/// makes delivery naturally level-triggered. A socket pair is used to wake
/// up a blocked `wait()`.
#[derive(Debug)]
pub struct ScanMultiplexer {
    sockets: Mutex<BTreeMap<SocketHandle, Interest>>,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

impl ScanMultiplexer {
    pub fn new() -> Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        Ok(Self {
            sockets: Mutex::new(BTreeMap::new()),
            wake_rx,
            wake_tx,
        })
    }

    fn poll_set(&self) -> Vec<libc::pollfd> {
        let sockets = lock(&self.sockets);
        let mut fds = Vec::with_capacity(sockets.len() + 1);
        fds.push(pollfd(self.wake_rx.as_raw_fd(), libc::POLLIN));
        for (&handle, interest) in sockets.iter() {
            let mut flags = 0;
            if interest.is_readable() {
                flags |= libc::POLLIN;
            }
            if interest.is_writable() {
                flags |= libc::POLLOUT;
            }
            fds.push(pollfd(handle, flags));
        }
        fds
    }

    fn clear_wake_ups(&self) {
        let mut buffer = [0u8; 64];
        while let Ok(count) = (&self.wake_rx).read(&mut buffer) {
            if count == 0 {
                break;
            }
        }
    }
}

impl Multiplexer for ScanMultiplexer {
    fn register(&self, socket: &mut dyn Socket, interest: Interest) -> Result<()> {
        let handle = socket.handle();
        let mut sockets = lock(&self.sockets);
        if sockets.contains_key(&handle) {
            return Err(Error::new(ErrorKind::AlreadyExists, "Socket is already registered!"));
        }
        if sockets.len() >= SCAN_CAPACITY {
            return Err(Error::new(ErrorKind::Other, "Too many sockets for the scan multiplexer!"));
        }
        sockets.insert(handle, interest);
        Ok(())
    }

    fn unregister(&self, socket: &mut dyn Socket) -> Result<()> {
        lock(&self.sockets).remove(&socket.handle());
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> Result<()> {
        events.clear();

        let mut fds = self.poll_set();
        let timeout = Timeout::start(timeout);

        loop {
            let millis = timeout.remaining_time().map_or(-1, to_millis);
            let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
            if result >= 0 {
                break;
            }
            let error = Error::last_os_error();
            if error.kind() != ErrorKind::Interrupted {
                return Err(error);
            }
            if timeout.expired() {
                return Ok(());
            }
        }

        if fds[0].revents != 0 {
            trace!("Multiplexer woken up");
            self.clear_wake_ups();
        }

        let sockets = lock(&self.sockets);
        for fd in fds.iter().skip(1).filter(|fd| fd.revents != 0) {
            if !sockets.contains_key(&fd.fd) {
                continue;
            }
            let failed = (fd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL)) != 0;
            events.push(Readiness {
                handle: fd.fd,
                readable: (fd.revents & libc::POLLIN) != 0 || failed,
                writable: (fd.revents & libc::POLLOUT) != 0 || failed,
            });
        }
        Ok(())
    }

    fn wake(&self) -> Result<()> {
        match (&self.wake_tx).write(&[1u8]) {
            Ok(_) => Ok(()),
            Err(error) if error.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(error) => Err(error),
        }
    }

    fn backend(&self) -> Backend {
        Backend::Scan
    }
}

fn pollfd(fd: SocketHandle, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}

fn to_millis(remaining: Duration) -> libc::c_int {
    let millis = remaining.as_millis();
    match millis {
        0 if !remaining.is_zero() => 1,
        _ => millis.min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use mio::net::TcpListener;

    use super::*;

    #[test]
    fn millisecond_conversion_rounds_up() {
        assert_eq!(to_millis(Duration::ZERO), 0);
        assert_eq!(to_millis(Duration::from_micros(10)), 1);
        assert_eq!(to_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(to_millis(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn refuses_sockets_beyond_capacity() {
        let mux = ScanMultiplexer::new().unwrap();
        {
            let mut sockets = lock(&mux.sockets);
            for fd in 0..SCAN_CAPACITY as SocketHandle {
                sockets.insert(100_000 + fd, Interest::READABLE);
            }
        }
        let mut listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let error = mux.register(&mut listener, Interest::READABLE).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Other);
    }
}
