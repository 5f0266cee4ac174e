//! Task identifiers, descriptors and the reports workers produce.

use std::fmt;

/// Maximum length, in bytes, of a caller-assigned task id (spec §3).
pub const MAX_ID_LEN: usize = 12;

/// Maximum number of `(option_type, value)` pairs a descriptor may carry.
pub const MAX_OPTIONS: usize = 4;

/// An opaque, caller-assigned task identifier.
///
/// Globally unique within this agent; never interpreted, only compared
/// and hashed. Truncated defensively at [`MAX_ID_LEN`] bytes since the
/// wire protocol never sends anything longer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(raw: impl Into<String>) -> Self {
        let mut s = raw.into();
        if s.len() > MAX_ID_LEN {
            let mut cut = MAX_ID_LEN;
            while cut > 0 && !s.is_char_boundary(cut) {
                cut -= 1;
            }
            s.truncate(cut);
        }
        TaskId(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:?})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId::new(s)
    }
}

/// What a task collects from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Process,
    Directory,
    Disk,
    Swap,
    Load,
    Total,
}

impl TaskType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESS" => Some(Self::Process),
            "DIRECTORY" => Some(Self::Directory),
            "DISK" => Some(Self::Disk),
            "SWAP" => Some(Self::Swap),
            "LOAD" => Some(Self::Load),
            "TOTAL" => Some(Self::Total),
            _ => None,
        }
    }
}

/// What a task measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    None,
    Memory,
    Cpu,
    Io,
}

impl MetricType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "MEMORY" => Some(Self::Memory),
            "CPU" => Some(Self::Cpu),
            "IO" => Some(Self::Io),
            _ => None,
        }
    }
}

/// A single `(option_type, value)` pair, positionally bound to its owning
/// task's [`TaskType`] per the allowed-options matrix in spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOptionType {
    Keepalive,
    Pidfile,
    Runcmd,
    Mntpnt,
    Path,
}

impl TaskOptionType {
    /// Literal that appears on the wire, e.g. `KEEPALIVE TRUE`.
    pub fn parse(literal: &str) -> Option<Self> {
        match literal {
            "KEEPALIVE" => Some(Self::Keepalive),
            "PIDFILE" => Some(Self::Pidfile),
            "RUNCMD" => Some(Self::Runcmd),
            "PATH" => Some(Self::Path),
            "MNTPNT" => Some(Self::Mntpnt),
            _ => None,
        }
    }

    /// The single [`TaskType`] this option is applicable to, per the
    /// allowed-options matrix (spec §4.3).
    pub fn applies_to(&self) -> TaskType {
        match self {
            Self::Keepalive | Self::Pidfile | Self::Runcmd => TaskType::Process,
            Self::Path => TaskType::Directory,
            Self::Mntpnt => TaskType::Disk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOption {
    pub kind: TaskOptionType,
    pub value: String,
}

/// Immutable-after-creation task descriptor (spec §3).
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub task_type: TaskType,
    pub metric: MetricType,
    pub frequency_secs: u64,
    pub options: Vec<TaskOption>,
}

impl TaskDescriptor {
    pub fn option(&self, kind: TaskOptionType) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.kind == kind)
            .map(|o| o.value.as_str())
    }

    pub fn keepalive(&self) -> bool {
        self.option(TaskOptionType::Keepalive) == Some("TRUE")
    }
}

/// Action requested by a reschedule command (spec §4.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Pause,
    Resume,
    Delete,
}

/// A single collection result, en route to the report queue (spec §3).
#[derive(Debug, Clone)]
pub struct Report {
    pub id: TaskId,
    pub task_type: TaskType,
    pub metric: MetricType,
    pub value: f64,
    pub percentage: f64,
    pub time_taken: u64,
    /// Non-empty carries `"ERROR CAUSE X"` (transient) or `"FATAL CAUSE X"`
    /// (terminal for this task); empty means a normal, well-formed report.
    pub message: String,
}

impl Report {
    pub fn new(id: TaskId, task_type: TaskType, metric: MetricType) -> Self {
        Report {
            id,
            task_type,
            metric,
            value: 0.0,
            percentage: 0.0,
            time_taken: 0,
            message: String::new(),
        }
    }

    pub fn error(mut self, cause: &str) -> Self {
        self.message = format!("ERROR CAUSE {cause}");
        self
    }

    pub fn fatal(mut self, cause: &str) -> Self {
        self.message = format!("FATAL CAUSE {cause}");
        self
    }

    /// A `FATAL ...` message marks the owning task for removal from the registry.
    pub fn is_fatal(&self) -> bool {
        self.message.starts_with("FATAL")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_truncates_overlong_ids() {
        let id = TaskId::new("this-id-is-way-too-long");
        assert_eq!(id.as_str().len(), MAX_ID_LEN);
    }

    #[test]
    fn task_id_truncation_never_splits_a_utf8_codepoint() {
        // 11 ASCII bytes followed by a 2-byte codepoint straddles MAX_ID_LEN.
        let id = TaskId::new("12345678901é");
        assert!(id.as_str().len() <= MAX_ID_LEN);
        assert!(std::str::from_utf8(id.as_str().as_bytes()).is_ok());
    }

    #[test]
    fn task_type_parse_roundtrip() {
        assert_eq!(TaskType::parse("PROCESS"), Some(TaskType::Process));
        assert_eq!(TaskType::parse("BOGUS"), None);
    }

    #[test]
    fn option_applies_to_matrix() {
        assert_eq!(TaskOptionType::Keepalive.applies_to(), TaskType::Process);
        assert_eq!(TaskOptionType::Path.applies_to(), TaskType::Directory);
        assert_eq!(TaskOptionType::Mntpnt.applies_to(), TaskType::Disk);
    }

    #[test]
    fn report_fatal_detection() {
        let r = Report::new(TaskId::new("7"), TaskType::Process, MetricType::Memory)
            .fatal("NO_PIDFILE");
        assert!(r.is_fatal());
        assert_eq!(r.message, "FATAL CAUSE NO_PIDFILE");
    }
}
