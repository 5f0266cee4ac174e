//! Error types shared across the control plane.

use std::fmt;

/// Errors surfaced by the handshake / reconnect loop (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// No listening port in the configured range would bind.
    NoPortAvailable,
    /// `server_hostname` didn't resolve to any address.
    BadHostname,
    /// Initial handshake failed to connect after the backoff ceiling.
    ServerUnreachable,
    /// Server replied `NGS NACK` to our hello.
    ServerRejected,
    /// Server never initiated the reverse connection in time.
    AcceptTimedOut,
    /// Accept raced a server-side close (`EWOULDBLOCK`/`EAGAIN`).
    AcceptRaced,
    /// Anything else: malformed reply, unexpected I/O error.
    Generic,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPortAvailable => write!(f, "no listening port available in configured range"),
            Self::BadHostname => write!(f, "server hostname did not resolve"),
            Self::ServerUnreachable => write!(f, "server unreachable during initial handshake"),
            Self::ServerRejected => write!(f, "server rejected hello with NACK"),
            Self::AcceptTimedOut => write!(f, "timed out waiting for server to connect back"),
            Self::AcceptRaced => write!(f, "server closed connection mid-accept"),
            Self::Generic => write!(f, "generic handshake error"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Outcome of a framed socket read (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete, double-newline-terminated frame landed in the buffer.
    Frame(usize),
    /// The wake fd fired; buffer has been zeroed, no frame was read.
    WokeUp,
    /// Peer closed, too many consecutive errors, or the wait timed out.
    SocketClosed,
}

/// Outcome of a framed socket write (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All bytes were written.
    Complete,
    /// The peer is gone or the write timeout elapsed while blocked.
    SocketClosed,
}

/// Sentinel returned by registry/queue mutations (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerError {
    /// The container has been frozen (shutdown in progress); no mutation applied.
    Frozen,
    /// The key is already bound.
    Exists,
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frozen => write!(f, "container is frozen"),
            Self::Exists => write!(f, "key already exists"),
        }
    }
}

impl std::error::Error for ContainerError {}

/// Outcome of a single collection attempt (C10, the `Collector` adapter contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// A report was produced and pushed to the queue.
    Success,
    /// Watched process is gone; caller decides transient vs. fatal.
    NoProc,
    /// A required OS facility (e.g. `/proc/<pid>/stat`) is absent.
    UnsupportedDistro,
    /// This (type, metric) combination isn't implemented.
    UnsupportedTask,
    /// Terminal: a FATAL report has already been pushed.
    TaskFatal,
    /// The task descriptor itself was invalid.
    GenericError,
}
