//! Child-process supervision for `PROCESS + KEEPALIVE=TRUE` tasks (spec §4.6, C6).

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::{execvp, fork, ForkResult, Pid};

use crate::registry::Registry;
use crate::signals;
use crate::task::TaskId;

/// How long a freshly forked child sleeps before `execvp`, giving the
/// parent time to finish `hash_put`-ing its pid into `children` (spec §4.6
/// step 3: "child sleeps briefly to guarantee the parent has inserted").
const FORK_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildError {
    NoPidfile,
    Frozen,
}

/// Ensure a keep-alive child for `id` exists, forking one if needed, and
/// write its pid to `pidfile`. Mirrors `handle_process`'s keepalive branch.
pub fn ensure_keepalive_child(
    id: &TaskId,
    pidfile: &str,
    runcmd: &str,
    registry: &Registry,
) -> Result<Pid, ChildError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(pidfile)
        .map_err(|_| ChildError::NoPidfile)?;

    if let Some(pid) = registry.child(id) {
        let _ = write!(file, "{}", pid.as_raw());
        return Ok(pid);
    }

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            let result = registry.set_child(id, child);
            let _ = write!(file, "{}", child.as_raw());
            result.map(|()| child).map_err(|_| ChildError::Frozen)
        }
        Ok(ForkResult::Child) => {
            // Never returns on success; on failure, exit rather than unwind
            // back into the parent's call stack.
            thread::sleep(FORK_SETTLE_DELAY);
            exec_runcmd(runcmd);
            std::process::exit(libc::EXIT_FAILURE);
        }
        Err(_) => Err(ChildError::NoPidfile),
    }
}

/// Split `runcmd` on tabs into `argv[0]` + arguments and `execvp` it.
fn exec_runcmd(runcmd: &str) {
    let mut parts = runcmd.split('\t').filter(|p| !p.is_empty());
    let Some(path) = parts.next() else { return };
    let Ok(path_c) = CString::new(path) else { return };
    let mut argv = vec![path_c.clone()];
    for arg in parts {
        if let Ok(arg_c) = CString::new(arg) {
            argv.push(arg_c);
        }
    }
    let _ = execvp(&path_c, &argv);
}

/// For non-keepalive `PROCESS` tasks: read a pid from `pidfile` and probe
/// liveness with a signal-0 `kill` (spec §4.6, "without keepalive" branch).
pub fn probe_watched_pid(pidfile: &str) -> Result<Pid, &'static str> {
    let mut contents = String::new();
    let mut file = std::fs::File::open(pidfile).map_err(|_| "NO_PIDFILE")?;
    file.read_to_string(&mut contents).map_err(|_| "NO_PIDFILE")?;
    let raw: i32 = contents.trim().parse().map_err(|_| "PROC_NOT_RUNNING")?;
    let pid = Pid::from_raw(raw);
    match kill(pid, None) {
        Ok(()) => Ok(pid),
        Err(_) => Err("PROC_NOT_RUNNING"),
    }
}

/// Drain pids reaped by the `SIGCHLD` handler and drop any matching entry
/// from `registry`'s children map, so the owning worker re-forks on its next
/// pass. Safe to call from any ordinary thread; must run outside signal
/// context (spec §9).
pub fn reap_dead_children(registry: &Registry) {
    for reaped in signals::drain_reaped() {
        for id in registry.child_ids() {
            if registry.child(&id) == Some(reaped) {
                registry.drop_child(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_watched_pid_rejects_missing_file() {
        let err = probe_watched_pid("/nonexistent/pidfile").unwrap_err();
        assert_eq!(err, "NO_PIDFILE");
    }

    #[test]
    fn probe_watched_pid_detects_own_pid_alive() {
        let dir = std::env::temp_dir().join(format!("notgios-test-pidfile-{}", std::process::id()));
        std::fs::write(&dir, format!("{}", std::process::id())).unwrap();
        let pid = probe_watched_pid(dir.to_str().unwrap()).unwrap();
        assert_eq!(pid.as_raw(), std::process::id() as i32);
        let _ = std::fs::remove_file(&dir);
    }
}
