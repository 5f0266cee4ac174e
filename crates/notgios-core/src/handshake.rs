//! Handshake & reconnect (spec §4.2, C2): bind a reverse-connect listener,
//! say hello to the server with exponential backoff, and accept the
//! server-initiated control connection.

use std::io;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::thread;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::config::{ACCEPT_TIMEOUT, CONNECT_BACKOFF_CEILING, CONNECT_BACKOFF_INITIAL};
use crate::error::{HandshakeError, ReadOutcome, WriteOutcome};
use crate::framing::{read_frame, write_frame};

/// Probe `base..base+count` for a port that binds, per spec §4.2 step 1.
/// Returns the bound, non-blocking listener and the port it landed on.
pub fn bind_listener(base_port: u16, count: u16) -> Result<(TcpListener, u16), HandshakeError> {
    for offset in 0..count {
        let port = base_port.wrapping_add(offset);
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)) {
            listener.set_nonblocking(true).map_err(|_| HandshakeError::Generic)?;
            return Ok((listener, port));
        }
    }
    Err(HandshakeError::NoPortAvailable)
}

/// Connect to the server with binary exponential backoff (spec §4.2 step 2).
/// `initial` selects whether a sustained failure is fatal (`true`) or should
/// retry forever (`false`, post-disconnect resume).
pub fn connect_with_backoff(
    hostname: &str,
    port: u16,
    initial: bool,
) -> Result<TcpStream, HandshakeError> {
    let addr = (hostname, port)
        .to_socket_addrs()
        .map_err(|_| HandshakeError::BadHostname)?
        .next()
        .ok_or(HandshakeError::BadHostname)?;

    let mut backoff = CONNECT_BACKOFF_INITIAL;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(_) => {
                if initial && backoff > CONNECT_BACKOFF_CEILING {
                    return Err(HandshakeError::ServerUnreachable);
                }
                thread::sleep(backoff);
                if backoff <= CONNECT_BACKOFF_CEILING {
                    backoff *= 2;
                }
            }
        }
    }
}

/// Send the hello and interpret the reply (spec §4.2 steps 3-4). `listen_port`
/// is the port the agent just bound for the reverse connection.
pub fn say_hello(stream: &TcpStream, listen_port: u16, resume: bool) -> Result<(), HandshakeError> {
    let fd: RawFd = stream.as_raw_fd();
    let greeting = if resume { "NGS HELLO AGAIN" } else { "NGS HELLO" };
    let frame = format!("{greeting}\nCMD PORT {listen_port}\n\n");
    if write_frame(fd, frame.as_bytes()) != WriteOutcome::Complete {
        return Err(HandshakeError::ServerUnreachable);
    }

    // No shutdown-wake participates in the handshake reply wait; reuse the
    // stream's own fd as a no-op wake source that never fires.
    let (outcome, data) = read_frame(fd, fd);
    match outcome {
        ReadOutcome::Frame(_) => {
            let text = String::from_utf8_lossy(&data);
            if text.starts_with("NGS ACK") {
                Ok(())
            } else if text.starts_with("NGS NACK") {
                Err(HandshakeError::ServerRejected)
            } else {
                Err(HandshakeError::Generic)
            }
        }
        _ => Err(HandshakeError::Generic),
    }
}

/// Wait up to [`ACCEPT_TIMEOUT`] for the server to dial back, then accept
/// exactly one connection (spec §4.2 steps 5-6).
pub fn accept_reverse_connection(listener: &TcpListener) -> Result<TcpStream, HandshakeError> {
    let fd = listener.as_raw_fd();
    let mut fds = [PollFd::new(
        unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
        PollFlags::POLLIN,
    )];
    let timeout = PollTimeout::try_from(ACCEPT_TIMEOUT.as_millis() as u32).unwrap_or(PollTimeout::MAX);
    match poll(&mut fds, timeout) {
        Ok(n) if n > 0 => {}
        _ => return Err(HandshakeError::AcceptTimedOut),
    }

    match listener.accept() {
        Ok((stream, _addr)) => {
            stream.set_nonblocking(true).map_err(|_| HandshakeError::Generic)?;
            Ok(stream)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(HandshakeError::AcceptRaced),
        Err(_) => Err(HandshakeError::AcceptRaced),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_listener_finds_a_free_port() {
        let (listener, port) = bind_listener(41089, 20).unwrap();
        assert!(port >= 41089);
        drop(listener);
    }

    #[test]
    fn connect_with_backoff_fails_fast_on_bad_hostname() {
        let err = connect_with_backoff("this.hostname.does.not.resolve.invalid", 1, true).unwrap_err();
        assert_eq!(err, HandshakeError::BadHostname);
    }
}
