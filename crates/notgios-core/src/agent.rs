//! Top-level agent wiring: the control thread's main loop, owning the
//! registry, stats, report queue and the collector all the binaries share
//! (spec §9's "Design Notes" — the one legitimate non-static value besides
//! the two signal-handler globals).

use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::child;
use crate::collector::Collector;
use crate::config::AgentConfig;
use crate::container::FrozenQueue;
use crate::control::TaskControl;
use crate::error::{ContainerError, ReadOutcome, WriteOutcome};
use crate::framing::{read_frame, write_frame};
use crate::handshake;
use crate::message::{self, Command, NackCause};
use crate::registry::Registry;
use crate::signals::{self, SelfPipe};
use crate::stats::Stats;
use crate::task::{Report, TaskAction, TaskType};
use crate::worker;

pub struct Agent {
    config: AgentConfig,
    registry: Arc<Registry>,
    stats: Arc<Stats>,
    reports: Arc<FrozenQueue<Report>>,
    collector: Arc<dyn Collector>,
    self_pipe: SelfPipe,
}

/// How control-channel connections are terminated, driving the outer
/// reconnect loop in [`Agent::run`].
enum SessionEnd {
    /// Server sent `NGS BYE`; reconnect immediately, not as an error.
    ServerBye,
    /// Socket closed/erroed; reconnect with backoff.
    SocketLost,
    /// `SIGTERM` observed; tear down and exit the process.
    Shutdown,
}

impl Agent {
    pub fn new(config: AgentConfig, collector: Arc<dyn Collector>) -> nix::Result<Self> {
        let self_pipe = signals::install()?;
        Ok(Agent {
            config,
            registry: Arc::new(Registry::new()),
            stats: Arc::new(Stats::new()),
            reports: Arc::new(FrozenQueue::new(0)),
            collector,
            self_pipe,
        })
    }

    /// The outer loop in spec §4.2's design notes: handshake, run the
    /// control session until it ends, and either reconnect or exit.
    pub fn run(&self) -> i32 {
        let mut initial = true;
        loop {
            let (listener, listen_port) =
                match handshake::bind_listener(self.config.listen_base_port, crate::config::LISTEN_PORT_PROBE_COUNT) {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("failed to open a listening socket: {e}");
                        return libc::EXIT_FAILURE;
                    }
                };
            info!(port = listen_port, "opened listening socket");

            let stream = match handshake::connect_with_backoff(&self.config.server_hostname, self.config.server_port, initial) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("initial handshake failed: {e}");
                    return libc::EXIT_FAILURE;
                }
            };
            if let Err(e) = handshake::say_hello(&stream, listen_port, !initial) {
                error!("hello rejected: {e}");
                return libc::EXIT_FAILURE;
            }
            initial = false;
            info!("handshake complete, waiting for server to connect back");

            let control_stream = match handshake::accept_reverse_connection(&listener) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("failed to accept control connection: {e}");
                    return libc::EXIT_FAILURE;
                }
            };
            info!("control connection established");

            match self.run_session(control_stream.as_raw_fd()) {
                SessionEnd::ServerBye => {
                    info!("server requested reconnect");
                    continue;
                }
                SessionEnd::SocketLost => {
                    warn!("control connection lost, reconnecting");
                    continue;
                }
                SessionEnd::Shutdown => {
                    info!("shutdown complete");
                    return libc::EXIT_SUCCESS;
                }
            }
        }
    }

    fn run_session(&self, socket: i32) -> SessionEnd {
        loop {
            if signals::is_exiting() {
                return self.shutdown(socket);
            }

            let (outcome, frame) = read_frame(socket, self.self_pipe.read_fd);
            match outcome {
                ReadOutcome::WokeUp => return self.shutdown(socket),
                ReadOutcome::SocketClosed => return SessionEnd::SocketLost,
                ReadOutcome::Frame(_) => {}
            }

            let reply = self.dispatch(&frame);
            if write_frame(socket, reply.as_bytes()) != WriteOutcome::Complete {
                return SessionEnd::SocketLost;
            }
            if is_bye(&frame) {
                return SessionEnd::ServerBye;
            }

            self.drain_reports(socket);
            self.reap_dropped_tasks();
            child::reap_dead_children(&self.registry);
        }
    }

    fn dispatch(&self, frame: &[u8]) -> String {
        match message::parse(frame) {
            Ok(Command::Add(descriptor)) => {
                if self.registry.is_frozen() {
                    return "NGS NACK\nCAUSE SHUTDOWN\n\n".to_string();
                }
                if self.registry.contains(&descriptor.id) {
                    return "NGS NACK\nCAUSE DUPLICATE_ID\n\n".to_string();
                }

                let control = Arc::new(TaskControl::new());
                let id = descriptor.id.clone();
                let registry = self.registry.clone();
                let reports = self.reports.clone();
                let stats = self.stats.clone();
                let collector = self.collector.clone();
                let thread_control = control.clone();

                let handle = {
                    let registry_for_worker = registry.clone();
                    thread::spawn(move || {
                        worker::run(descriptor, thread_control, registry_for_worker, reports, stats, collector)
                    })
                };

                match self.registry.insert_task(id, handle, control) {
                    Ok(()) => "NGS ACK\n\n".to_string(),
                    Err(ContainerError::Frozen) => "NGS NACK\nCAUSE SHUTDOWN\n\n".to_string(),
                    Err(ContainerError::Exists) => "NGS NACK\nCAUSE DUPLICATE_ID\n\n".to_string(),
                }
            }
            Ok(Command::Reschedule(id, action)) => self.reschedule(&id, action),
            Ok(Command::StillThere) => "NGS STILL HERE!\n\n".to_string(),
            Ok(Command::Bye) => "NGS BYE\n\n".to_string(),
            Err(cause) if signals::is_exiting() => {
                let _ = cause;
                "NGS NACK\nCAUSE SHUTDOWN\n\n".to_string()
            }
            Err(cause) => format!("NGS NACK\nCAUSE {}\n\n", nack_token(cause)),
        }
    }

    fn reschedule(&self, id: &crate::task::TaskId, action: TaskAction) -> String {
        let Some(control) = self.registry.control(id) else {
            return "NGS NACK\nCAUSE NO_SUCH_ID\n\n".to_string();
        };
        match action {
            TaskAction::Pause => control.pause(),
            TaskAction::Resume => control.resume(),
            TaskAction::Delete => {
                control.kill();
                if let Ok(Some(handle)) = self.registry.remove_task(id) {
                    if let Ok(handle) = Arc::try_unwrap(handle) {
                        let _ = handle.join();
                    }
                } else if self.registry.is_frozen() {
                    return "NGS NACK\nCAUSE SHUTDOWN\n\n".to_string();
                }
            }
        }
        "NGS ACK\n\n".to_string()
    }

    fn drain_reports(&self, socket: i32) {
        while let Some(report) = self.reports.pop() {
            let frame = format_report(&report);
            if write_frame(socket, frame.as_bytes()) != WriteOutcome::Complete {
                break;
            }
        }
    }

    fn reap_dropped_tasks(&self) {
        for id in self.registry.task_ids() {
            let Some(control) = self.registry.control(&id) else { continue };
            if !control.is_dropped() {
                continue;
            }
            if let Ok(Some(handle)) = self.registry.remove_task(&id) {
                if let Ok(handle) = Arc::try_unwrap(handle) {
                    let _ = handle.join();
                }
            }
            debug!(task = %id, "reaped a task that reported a terminal error");
        }
    }

    fn shutdown(&self, socket: i32) -> SessionEnd {
        info!("shutdown initiated, killing tasks");
        self.registry.freeze();
        for id in self.registry.task_ids() {
            if let Some(control) = self.registry.control(&id) {
                control.kill();
            }
        }
        for id in self.registry.task_ids() {
            if let Ok(Some(handle)) = self.registry.remove_task(&id) {
                if let Ok(handle) = Arc::try_unwrap(handle) {
                    let _ = handle.join();
                }
            }
        }
        self.reports.freeze();
        let _ = write_frame(socket, b"NGS BYE\n\n");
        SessionEnd::Shutdown
    }
}

fn is_bye(frame: &[u8]) -> bool {
    frame.starts_with(b"NGS BYE")
}

fn nack_token(cause: NackCause) -> &'static str {
    cause.wire_token()
}

fn format_report(report: &Report) -> String {
    if !report.message.is_empty() {
        return format!("NGS JOB REPORT\nID {}\n{}\n\n", report.id, report.message);
    }
    use crate::task::MetricType;
    match (report.task_type, report.metric) {
        (TaskType::Process, MetricType::Memory) => {
            format!("NGS JOB REPORT\nID {}\nBYTES {}\n\n", report.id, report.value as i64)
        }
        (TaskType::Process, MetricType::Cpu) => {
            format!("NGS JOB REPORT\nID {}\nCPU PERCENT {:.2}\n\n", report.id, report.percentage)
        }
        (TaskType::Process, MetricType::Io) => {
            format!("NGS JOB REPORT\nID {}\nIO PERCENT {:.2}\n\n", report.id, report.percentage)
        }
        (TaskType::Directory, MetricType::Memory) => {
            format!("NGS JOB REPORT\nID {}\nBYTES {}\n\n", report.id, report.value as i64)
        }
        _ => {
            debug!(task_type = ?report.task_type, metric = ?report.metric, "no report formatter for this (type, metric) pair, skipping");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectSample;
    use crate::error::CollectOutcome;
    use crate::task::{MetricType, TaskDescriptor};

    struct StubCollector;
    impl Collector for StubCollector {
        fn collect_once(&self, _descriptor: &TaskDescriptor, _registry: &Registry) -> (CollectOutcome, CollectSample) {
            (CollectOutcome::Success, CollectSample { value: 42.0, ..Default::default() })
        }
    }

    fn make_agent() -> Agent {
        Agent {
            config: AgentConfig::new("localhost".to_string(), 9999),
            registry: Arc::new(Registry::new()),
            stats: Arc::new(Stats::new()),
            reports: Arc::new(FrozenQueue::new(0)),
            collector: Arc::new(StubCollector),
            self_pipe: SelfPipe { read_fd: -1 },
        }
    }

    #[test]
    fn still_there_gets_still_here() {
        let agent = make_agent();
        let reply = agent.dispatch(b"NGS STILL THERE?\n\n");
        assert_eq!(reply, "NGS STILL HERE!\n\n");
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let agent = make_agent();
        let frame = b"NGS JOB ADD\nID dup\nTYPE PROCESS\nMETRIC MEMORY\nFREQ 5\n\n";
        let first = agent.dispatch(frame);
        assert_eq!(first, "NGS ACK\n\n");
        let second = agent.dispatch(frame);
        assert_eq!(second, "NGS NACK\nCAUSE DUPLICATE_ID\n\n");

        if let Some(control) = agent.registry.control(&crate::task::TaskId::new("dup")) {
            control.kill();
        }
    }

    #[test]
    fn delete_waits_for_the_worker_to_join() {
        let agent = make_agent();
        let frame = b"NGS JOB ADD\nID j1\nTYPE PROCESS\nMETRIC MEMORY\nFREQ 0\n\n";
        assert_eq!(agent.dispatch(frame), "NGS ACK\n\n");

        let del = agent.dispatch(b"NGS JOB DEL\nID j1\n\n");
        assert_eq!(del, "NGS ACK\n\n");
        assert!(!agent.registry.contains(&crate::task::TaskId::new("j1")));
    }

    #[test]
    fn unrecognized_command_is_nacked() {
        let agent = make_agent();
        let reply = agent.dispatch(b"NGS GARBAGE\n\n");
        assert_eq!(reply, "NGS NACK\nCAUSE UNRECOGNIZED_COMMAND\n\n");
    }

    #[test]
    fn report_formatting_matches_wire_contract() {
        let report = Report::new(crate::task::TaskId::new("r1"), TaskType::Process, MetricType::Memory);
        let formatted = format_report(&report);
        assert_eq!(formatted, "NGS JOB REPORT\nID r1\nBYTES 0\n\n");
    }
}
