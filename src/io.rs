/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Read, Write, Result as IoResult, Error as IoError, ErrorKind};
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};

use crate::utilities::Backoff;

/// Result of a single non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Data(usize),
    Closed,
    WouldBlock,
}

pub(crate) fn event_read<R: Read>(mut source: R, buffer: &mut [u8]) -> IoResult<ReadOutcome> {
    loop {
        match source.read(buffer) {
            Ok(0) => return Ok(ReadOutcome::Closed),
            Ok(count) => return Ok(ReadOutcome::Data(count)),
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => (),
                ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                _ => return Err(error),
            },
        }
    }
}

pub(crate) fn event_write<W: Write>(mut sink: W, buffer: &[u8]) -> IoResult<Option<usize>> {
    loop {
        match sink.write(buffer) {
            Ok(count) => return Ok(Some(count)),
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => (),
                ErrorKind::WouldBlock => return Ok(None),
                _ => return Err(error),
            },
        }
    }
}

pub(crate) fn event_accept(listener: &TcpListener) -> IoResult<Option<(TcpStream, SocketAddr)>> {
    loop {
        match listener.accept() {
            Ok(accepted) => return Ok(Some(accepted)),
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => (),
                ErrorKind::WouldBlock => return Ok(None),
                _ => return Err(error),
            },
        }
    }
}

/// Checks whether a non-blocking connect has completed.
pub(crate) fn event_conn(stream: &TcpStream) -> IoResult<bool> {
    loop {
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }
        match stream.peer_addr() {
            Ok(_addr) => return Ok(true),
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => (),
                ErrorKind::NotConnected => return Ok(false),
                _ => return Err(error),
            },
        }
    }
}

/// Writes the whole buffer through `attempt`, which performs one
/// non-blocking write and returns `None` on would-block. Would-block is
/// retried with an escalating [`Backoff`]; every other failure is returned.
pub(crate) fn write_fully<F>(mut buffer: &[u8], mut attempt: F) -> IoResult<()>
where
    F: FnMut(&[u8]) -> IoResult<Option<usize>>,
{
    let mut backoff = Backoff::new();
    while !buffer.is_empty() {
        match attempt(buffer)? {
            Some(0) => return Err(IoError::new(ErrorKind::WriteZero, "The socket accepted no data!")),
            Some(count) => {
                buffer = &buffer[count..];
                backoff.reset();
            },
            None => backoff.snooze(),
        }
    }
    Ok(())
}
