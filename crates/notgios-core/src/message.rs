//! Control-message parsing (spec §4.3, C3): turns one framed request into a
//! [`Command`], or a [`NackCause`] for anything the wire syntax itself
//! rejects. Semantic checks that need registry state (`DUPLICATE_ID`,
//! `NO_SUCH_ID`, `SHUTDOWN`) are left to the dispatcher.

use crate::config::MAX_COMMAND_LINES;
use crate::task::{MetricType, TaskAction, TaskDescriptor, TaskId, TaskOption, TaskOptionType, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackCause {
    CommandTooLong,
    UnrecognizedType,
    UnrecognizedMetric,
    UnrecognizedOption,
    InapplicableOption,
    UnrecognizedCommand,
}

impl NackCause {
    pub fn wire_token(&self) -> &'static str {
        match self {
            Self::CommandTooLong => "COMMAND_TOO_LONG",
            Self::UnrecognizedType => "UNRECOGNIZED_TYPE",
            Self::UnrecognizedMetric => "UNRECOGNIZED_METRIC",
            Self::UnrecognizedOption => "UNRECOGNIZED_OPTION",
            Self::InapplicableOption => "INAPPLICABLE_OPTION",
            Self::UnrecognizedCommand => "UNRECOGNIZED_COMMAND",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Add(TaskDescriptor),
    Reschedule(TaskId, TaskAction),
    StillThere,
    Bye,
}

/// Parse one already-framed request (the double trailing newline is kept by
/// [`crate::framing::read_frame`]; this just splits on `'\n'` and drops the
/// resulting empty tail entries).
pub fn parse(frame: &[u8]) -> Result<Command, NackCause> {
    let text = String::from_utf8_lossy(frame);
    let lines: Vec<&str> = text.split('\n').filter(|l| !l.is_empty()).collect();
    if lines.len() > MAX_COMMAND_LINES {
        return Err(NackCause::CommandTooLong);
    }
    let first = lines.first().copied().unwrap_or("");

    if first.starts_with("NGS JOB ADD") {
        parse_add(&lines)
    } else if first.starts_with("NGS JOB PAUS") {
        parse_reschedule(&lines, TaskAction::Pause)
    } else if first.starts_with("NGS JOB RES") {
        parse_reschedule(&lines, TaskAction::Resume)
    } else if first.starts_with("NGS JOB DEL") {
        parse_reschedule(&lines, TaskAction::Delete)
    } else if first.starts_with("NGS STILL THERE?") {
        Ok(Command::StillThere)
    } else if first.starts_with("NGS BYE") {
        Ok(Command::Bye)
    } else {
        Err(NackCause::UnrecognizedCommand)
    }
}

fn field(line: &str, prefix: &str) -> String {
    line.strip_prefix(prefix)
        .unwrap_or("")
        .trim()
        .to_string()
}

fn parse_add(lines: &[&str]) -> Result<Command, NackCause> {
    let id = TaskId::new(field(lines.get(1).copied().unwrap_or(""), "ID "));
    let task_type = TaskType::parse(&field(lines.get(2).copied().unwrap_or(""), "TYPE "))
        .ok_or(NackCause::UnrecognizedType)?;
    let metric = MetricType::parse(&field(lines.get(3).copied().unwrap_or(""), "METRIC "))
        .ok_or(NackCause::UnrecognizedMetric)?;
    let frequency_secs: u64 = field(lines.get(4).copied().unwrap_or(""), "FREQ ")
        .parse()
        .unwrap_or(0);

    let mut options = Vec::new();
    for line in lines.iter().skip(5) {
        let mut parts = line.splitn(2, ' ');
        let literal = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("").trim().to_string();
        let kind = TaskOptionType::parse(literal).ok_or(NackCause::UnrecognizedOption)?;
        if kind.applies_to() != task_type {
            return Err(NackCause::InapplicableOption);
        }
        options.push(TaskOption { kind, value });
    }

    Ok(Command::Add(TaskDescriptor {
        id,
        task_type,
        metric,
        frequency_secs,
        options,
    }))
}

fn parse_reschedule(lines: &[&str], action: TaskAction) -> Result<Command, NackCause> {
    let id = TaskId::new(field(lines.get(1).copied().unwrap_or(""), "ID "));
    Ok(Command::Reschedule(id, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_options() {
        let frame = b"NGS JOB ADD\nID abc\nTYPE PROCESS\nMETRIC MEMORY\nFREQ 5\nKEEPALIVE TRUE\n\n";
        match parse(frame).unwrap() {
            Command::Add(desc) => {
                assert_eq!(desc.id.as_str(), "abc");
                assert_eq!(desc.task_type, TaskType::Process);
                assert_eq!(desc.frequency_secs, 5);
                assert!(desc.keepalive());
            }
            _ => panic!("expected Add"),
        }
    }

    #[test]
    fn rejects_inapplicable_option() {
        let frame = b"NGS JOB ADD\nID abc\nTYPE DIRECTORY\nMETRIC MEMORY\nFREQ 5\nKEEPALIVE TRUE\n\n";
        assert_eq!(parse(frame).unwrap_err(), NackCause::InapplicableOption);
    }

    #[test]
    fn rejects_unrecognized_type() {
        let frame = b"NGS JOB ADD\nID abc\nTYPE BOGUS\nMETRIC MEMORY\nFREQ 5\n\n";
        assert_eq!(parse(frame).unwrap_err(), NackCause::UnrecognizedType);
    }

    #[test]
    fn parses_reschedule() {
        let frame = b"NGS JOB DEL\nID abc\n\n";
        match parse(frame).unwrap() {
            Command::Reschedule(id, action) => {
                assert_eq!(id.as_str(), "abc");
                assert_eq!(action, TaskAction::Delete);
            }
            _ => panic!("expected Reschedule"),
        }
    }

    #[test]
    fn unrecognized_command_is_rejected() {
        let frame = b"NGS BOGUS\n\n";
        assert_eq!(parse(frame).unwrap_err(), NackCause::UnrecognizedCommand);
    }
}
