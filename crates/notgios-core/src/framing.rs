//! Byte-framed socket I/O (spec §4.1, C1): length-less reads/writes over a
//! non-blocking socket, delimited by a double `'\n'`, multiplexed against a
//! wake fd so shutdown interrupts a blocked read.

use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::{read, write};

use crate::config::{MAX_READ_ERRORS, READ_TIMEOUT, WRITE_TIMEOUT};
use crate::error::{ReadOutcome, WriteOutcome};

/// Read one frame from `fd`, waking early if `wake_fd` becomes readable.
///
/// Returns the accumulated bytes (always empty unless the outcome is
/// [`ReadOutcome::Frame`]) alongside the outcome, matching spec §4.1's "zero
/// `buf` entirely" contract for the wake and timeout paths.
pub fn read_frame(fd: RawFd, wake_fd: RawFd) -> (ReadOutcome, Vec<u8>) {
    let mut acc: Vec<u8> = Vec::new();
    let mut error_count = 0u32;
    let mut scratch = [0u8; 512];

    loop {
        if ends_in_double_newline(&acc) {
            let len = acc.len();
            return (ReadOutcome::Frame(len), acc);
        }

        let mut fds = [
            PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN),
            PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(wake_fd) }, PollFlags::POLLIN),
        ];
        let timeout = PollTimeout::try_from(READ_TIMEOUT.as_millis() as u32).unwrap_or(PollTimeout::MAX);
        let ready = poll(&mut fds, timeout);
        let ready = match ready {
            Ok(n) => n,
            Err(_) => return (ReadOutcome::SocketClosed, Vec::new()),
        };
        if ready == 0 {
            return (ReadOutcome::SocketClosed, Vec::new());
        }

        let wake_ready = fds[1]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false);
        let sock_ready = fds[0]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false);

        if sock_ready {
            match read(fd, &mut scratch) {
                Ok(0) => return (ReadOutcome::SocketClosed, Vec::new()),
                Ok(n) => {
                    error_count = 0;
                    acc.extend_from_slice(&scratch[..n]);
                }
                Err(_) => {
                    error_count += 1;
                    if error_count >= MAX_READ_ERRORS {
                        return (ReadOutcome::SocketClosed, Vec::new());
                    }
                }
            }
        } else if wake_ready {
            return (ReadOutcome::WokeUp, Vec::new());
        } else {
            return (ReadOutcome::SocketClosed, Vec::new());
        }
    }
}

fn ends_in_double_newline(buf: &[u8]) -> bool {
    buf.len() >= 2 && buf[buf.len() - 1] == b'\n' && buf[buf.len() - 2] == b'\n'
}

/// Write all of `data` to `fd`, waiting up to 4 seconds for writability on
/// `EAGAIN`/`EWOULDBLOCK` (spec §4.1). `SIGPIPE` is assumed globally ignored
/// so a dead peer surfaces as `EPIPE`, not a signal.
pub fn write_frame(fd: RawFd, data: &[u8]) -> WriteOutcome {
    let mut written = 0usize;
    while written < data.len() {
        match write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, &data[written..]) {
            Ok(n) => written += n,
            Err(Errno::EAGAIN) => {
                if !wait_writable(fd, WRITE_TIMEOUT) {
                    return WriteOutcome::SocketClosed;
                }
            }
            Err(Errno::EPIPE) => return WriteOutcome::SocketClosed,
            Err(_) => continue,
        }
    }
    WriteOutcome::Complete
}

fn wait_writable(fd: RawFd, timeout: Duration) -> bool {
    let mut fds = [PollFd::new(
        unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
        PollFlags::POLLOUT,
    )];
    let poll_timeout = PollTimeout::try_from(timeout.as_millis() as u32).unwrap_or(PollTimeout::MAX);
    match poll(&mut fds, poll_timeout) {
        Ok(n) if n > 0 => fds[0]
            .revents()
            .map(|r| r.contains(PollFlags::POLLOUT))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;
    use std::os::fd::AsRawFd;
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn read_frame_accumulates_across_partial_writes() {
        let (r, w) = pipe().unwrap();
        let (_wake_r, _wake_w) = pipe().unwrap();
        let writer = thread::spawn(move || {
            write(&w, b"NGS STILL").unwrap();
            thread::sleep(StdDuration::from_millis(20));
            write(&w, b" THERE?\n\n").unwrap();
        });
        let (outcome, data) = read_frame(r.as_raw_fd(), _wake_r.as_raw_fd());
        writer.join().unwrap();
        assert_eq!(outcome, ReadOutcome::Frame(data.len()));
        assert_eq!(&data, b"NGS STILL THERE?\n\n");
    }

    #[test]
    fn read_frame_wakes_on_wake_fd() {
        let (r, _w) = pipe().unwrap();
        let (wake_r, wake_w) = pipe().unwrap();
        let waker = thread::spawn(move || {
            write(&wake_w, b"x").unwrap();
        });
        let (outcome, data) = read_frame(r.as_raw_fd(), wake_r.as_raw_fd());
        waker.join().unwrap();
        assert_eq!(outcome, ReadOutcome::WokeUp);
        assert!(data.is_empty());
    }

    #[test]
    fn write_frame_sends_all_bytes() {
        let (r, w) = pipe().unwrap();
        let outcome = write_frame(w.as_raw_fd(), b"NGS ACK\n\n");
        assert_eq!(outcome, WriteOutcome::Complete);
        let mut buf = [0u8; 64];
        let n = read(r.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"NGS ACK\n\n");
    }
}
