//! Numerical constants and operator-facing configuration (spec §4.1, §4.2, §6).

use std::time::Duration;

/// First port the agent tries to bind its reverse-connect listener on.
pub const LISTEN_BASE_PORT: u16 = 31089;

/// Number of adjacent ports probed, starting at [`LISTEN_BASE_PORT`].
pub const LISTEN_PORT_PROBE_COUNT: u16 = 20;

/// Listen backlog for the reverse-connect socket.
pub const LISTEN_BACKLOG: i32 = 10;

/// How long the control thread waits for the server to open the reverse
/// connection after a successful hello (spec §4.2 step 5).
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Read-side multiplex timeout (spec §4.1).
pub const READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Write-side blocked-writability timeout (spec §4.1).
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(4);

/// Consecutive negative `read()` returns tolerated before giving up (spec §4.1).
pub const MAX_READ_ERRORS: u32 = 5;

/// Initial exponential backoff delay between connect attempts (spec §4.2).
pub const CONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Backoff ceiling; reaching it on the initial handshake is fatal (spec §4.2).
pub const CONNECT_BACKOFF_CEILING: Duration = Duration::from_secs(32);

/// Maximum `(option_type, value)` pairs per descriptor (spec §3).
pub const MAX_OPTIONS: usize = crate::task::MAX_OPTIONS;

/// Lines 2-5 (ID/TYPE/METRIC/FREQ) plus up to [`MAX_OPTIONS`] option lines.
pub const MAX_COMMAND_LINES: usize = 5 + MAX_OPTIONS;

/// Operator-facing runtime configuration, assembled from CLI flags.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_hostname: String,
    pub server_port: u16,
    /// `0` means unbounded (spec §7's default, growing the queue while disconnected).
    pub max_queued_reports: usize,
    pub listen_base_port: u16,
}

impl AgentConfig {
    pub fn new(server_hostname: String, server_port: u16) -> Self {
        AgentConfig {
            server_hostname,
            server_port,
            max_queued_reports: 0,
            listen_base_port: LISTEN_BASE_PORT,
        }
    }
}
