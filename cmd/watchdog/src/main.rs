//! Companion watchdog: launches the monitor binary and relaunches it if it
//! dies, writing its own pid to a lockfile so only one instance runs.
//!
//! Grounded on `examples/original_source/monitor/watchdog.c`; spec.md calls
//! this process an external collaborator ("interface is process lifecycle
//! only; not part of this spec") so only the process-supervision shape is
//! carried over, in the idiom of [`notgios_core::child`] and
//! [`notgios_core::signals`] rather than a line-for-line port.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::process::ExitCode;
use std::sync::OnceLock;

use clap::Parser;
use nix::sys::signal::{self, kill, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execv, fork, getpid, ForkResult, Pid};

/// Launches and restarts `monitor_path`, supervising it for the lifetime of
/// this process.
#[derive(Parser, Debug)]
#[command(name = "notgios-watchdog")]
struct Args {
    /// Pidfile recording this watchdog's own pid, used to refuse a second
    /// instance from double-launching.
    #[arg(short = 'p', long = "pidfile")]
    pidfile: String,

    /// Path to the monitor binary to launch.
    #[arg(short = 'd', long = "monitor-path")]
    monitor_path: String,

    /// Space-separated arguments passed to the monitor binary.
    #[arg(short = 'a', long = "monitor-args")]
    monitor_args: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match check_pidfile(&args.pidfile) {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!("another watchdog instance is already running, exiting");
            return ExitCode::from(libc::EXIT_FAILURE as u8);
        }
        Err(e) => {
            tracing::error!("failed to read or write pidfile {}: {e}", args.pidfile);
            return ExitCode::from(libc::EXIT_FAILURE as u8);
        }
    }

    if let Err(e) = launch_process(&args.monitor_path, &args.monitor_args) {
        tracing::error!("failed to launch monitor: {e}");
        return ExitCode::from(libc::EXIT_FAILURE as u8);
    }

    if let Err(e) = install_child_handler(args.monitor_path.clone(), args.monitor_args.clone()) {
        tracing::error!("failed to install child signal handler, no way to recover: {e}");
        return ExitCode::from(libc::EXIT_FAILURE as u8);
    }

    loop {
        // The SIGCHLD handler does all the work; the main thread only
        // needs to stay alive to receive signals.
        std::thread::park();
    }
}

/// Fork+exec the monitor binary, splitting `args` on spaces into argv. The
/// child never returns on success; on `execv` failure it exits nonzero
/// rather than unwinding back into the parent.
fn launch_process(path: &str, args: &str) -> Result<Pid, std::io::Error> {
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => exec_monitor(path, args),
    }
}

fn exec_monitor(path: &str, args: &str) -> ! {
    let Ok(path_c) = CString::new(path) else {
        std::process::exit(libc::EXIT_FAILURE);
    };
    let mut argv = vec![path_c.clone()];
    for arg in args.split(' ').filter(|a| !a.is_empty()) {
        if let Ok(arg_c) = CString::new(arg) {
            argv.push(arg_c);
        }
    }
    let _ = execv(&path_c, &argv);
    std::process::exit(libc::EXIT_FAILURE);
}

/// Global launch parameters the `SIGCHLD` handler needs to relaunch the
/// monitor. Signal handlers cannot close over captured state, so these are
/// stashed in a process-wide global before the handler is installed — the
/// same `static`-only discipline [`notgios_core::signals`] uses.
static MONITOR_LAUNCH: OnceLock<(String, String)> = OnceLock::new();

fn install_child_handler(path: String, args: String) -> Result<(), nix::Error> {
    let _ = MONITOR_LAUNCH.set((path, args));
    let handler = SigAction::new(
        SigHandler::Handler(handle_sigchld),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGCHLD, &handler) }?;
    Ok(())
}

/// Reaps the dead monitor and relaunches it, exactly mirroring
/// `child_handler` in the original watchdog: exited/signaled children are
/// restarted, stopped children are sent `SIGCONT`.
extern "C" fn handle_sigchld(_signal: libc::c_int) {
    let status = match waitpid(Some(Pid::from_raw(-1)), Some(WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED)) {
        Ok(status) => status,
        Err(_) => return,
    };
    match status {
        WaitStatus::Exited(_, _) | WaitStatus::Signaled(_, _, _) => {
            if let Some((path, args)) = MONITOR_LAUNCH.get() {
                let _ = launch_process(path, args);
            }
        }
        WaitStatus::Stopped(pid, _) => {
            let _ = kill(pid, Signal::SIGCONT);
        }
        _ => {}
    }
}

/// Mirrors `check_pidfile`: if the file names a live pid, refuse to start a
/// second watchdog; otherwise (missing, stale, or unreadable pid) claim it
/// for this process. Returns `Ok(true)` if this process should proceed.
fn check_pidfile(pidfile: &str) -> Result<bool, std::io::Error> {
    let existing = OpenOptions::new().read(true).open(pidfile);
    match existing {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            match contents.trim().parse::<i32>() {
                Ok(raw) => {
                    let other = Pid::from_raw(raw);
                    if kill(other, None).is_ok() {
                        // Another watchdog is alive and owns the pidfile.
                        Ok(false)
                    } else {
                        claim_pidfile(pidfile)?;
                        Ok(true)
                    }
                }
                Err(_) => Ok(true),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            claim_pidfile(pidfile)?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

fn claim_pidfile(pidfile: &str) -> Result<(), std::io::Error> {
    let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(pidfile)?;
    write!(file, "{}", getpid().as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_pidfile_claims_a_missing_file() {
        let dir = std::env::temp_dir().join(format!("notgios-watchdog-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&dir);
        let path = dir.to_str().unwrap();
        assert!(check_pidfile(path).unwrap());
        let contents = std::fs::read_to_string(&dir).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn check_pidfile_refuses_a_live_owner() {
        let dir = std::env::temp_dir().join(format!("notgios-watchdog-test-live-{}", std::process::id()));
        std::fs::write(&dir, std::process::id().to_string()).unwrap();
        assert!(!check_pidfile(dir.to_str().unwrap()).unwrap());
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn check_pidfile_reclaims_a_stale_owner() {
        let dir = std::env::temp_dir().join(format!("notgios-watchdog-test-stale-{}", std::process::id()));
        // pid 1 shouldn't be killable by us, so pick an unlikely-to-exist pid instead.
        std::fs::write(&dir, "999999").unwrap();
        assert!(check_pidfile(dir.to_str().unwrap()).unwrap());
        let _ = std::fs::remove_file(&dir);
    }
}
