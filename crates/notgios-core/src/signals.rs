//! Signal coordination (spec §4.8, §9).
//!
//! Spec §9 only sanctions two process-wide globals: the `exiting` flag and
//! the self-pipe fd, because a signal handler cannot close over non-static
//! state. Everything else — freezing the registry, respawning a dead
//! keep-alive child — is deferred to ordinary threads that observe the
//! globals; the handlers themselves only ever call `waitpid`, `kill` and
//! `write`, which are async-signal-safe.

use std::os::unix::io::RawFd;
use std::os::fd::IntoRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe, Pid};

/// Capacity of the lock-free scratch buffer the SIGCHLD handler uses to
/// hand reaped pids to the (non-signal-context) reaper thread. Generous
/// relative to how many keep-alive children a single agent is expected to
/// manage concurrently; a slot collision only delays a respawn, it never
/// corrupts state.
const REAP_SLOTS: usize = 64;

static EXITING: AtomicBool = AtomicBool::new(false);
static SELF_PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

struct ReapSlot(AtomicI32);
#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: ReapSlot = ReapSlot(AtomicI32::new(-1));
static REAPED_EXITED: [ReapSlot; REAP_SLOTS] = [EMPTY_SLOT; REAP_SLOTS];

/// `true` once `SIGTERM` has been received. Never cleared.
pub fn is_exiting() -> bool {
    EXITING.load(Ordering::Acquire)
}

/// The self-pipe: its read end is multiplexed alongside the control socket
/// in [`crate::framing`] so a blocked 20-second read wakes immediately on
/// shutdown.
pub struct SelfPipe {
    pub read_fd: RawFd,
}

/// Installs `SIGTERM`/`SIGCHLD` handlers and the self-pipe, per spec §4.8:
/// `SIGINT`/`SIGPIPE` ignored, `SIGTERM` and `SIGCHLD` mask each other out
/// while either runs.
pub fn install() -> nix::Result<SelfPipe> {
    let (read_fd, write_fd) = pipe()?;
    let read_fd = read_fd.into_raw_fd();
    let write_fd = write_fd.into_raw_fd();
    nix::fcntl::fcntl(
        read_fd,
        nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
    )?;
    SELF_PIPE_WRITE_FD.store(write_fd, Ordering::Release);

    unsafe {
        signal::sigaction(
            Signal::SIGINT,
            &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
        )?;
        signal::sigaction(
            Signal::SIGPIPE,
            &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
        )?;

        let mut term_mask = SigSet::empty();
        term_mask.add(Signal::SIGCHLD);
        signal::sigaction(
            Signal::SIGTERM,
            &SigAction::new(SigHandler::Handler(handle_sigterm), SaFlags::empty(), term_mask),
        )?;

        let mut child_mask = SigSet::empty();
        child_mask.add(Signal::SIGTERM);
        signal::sigaction(
            Signal::SIGCHLD,
            &SigAction::new(SigHandler::Handler(handle_sigchld), SaFlags::empty(), child_mask),
        )?;
    }

    Ok(SelfPipe { read_fd })
}

extern "C" fn handle_sigterm(_signo: libc::c_int) {
    // Registry freeze and worker teardown happen on the main thread once it
    // observes `is_exiting()` — see spec §9's signal-handler-safety note.
    EXITING.store(true, Ordering::Release);
    wake_self_pipe();
}

extern "C" fn handle_sigchld(_signo: libc::c_int) {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED)) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                record_reaped(pid);
            }
            Ok(WaitStatus::Stopped(pid, _)) => {
                let _ = signal::kill(pid, Signal::SIGCONT);
            }
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            _ => break,
        }
    }
}

fn record_reaped(pid: Pid) {
    let raw = pid.as_raw();
    for slot in REAPED_EXITED.iter() {
        if slot
            .0
            .compare_exchange(-1, raw, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
    }
    // All slots full; the reaper thread is falling behind. Drop the
    // notification rather than block or allocate in signal context.
}

fn wake_self_pipe() {
    let fd = SELF_PIPE_WRITE_FD.load(Ordering::Acquire);
    if fd < 0 {
        return;
    }
    let byte = [1u8];
    loop {
        let n = unsafe { libc::write(fd, byte.as_ptr() as *const libc::c_void, 1) };
        if n >= 1 {
            break;
        }
    }
}

/// Drain pids reaped since the last call. Safe to call from any ordinary
/// thread; never runs in signal context.
pub fn drain_reaped() -> Vec<Pid> {
    let mut out = Vec::new();
    for slot in REAPED_EXITED.iter() {
        let raw = slot.0.swap(-1, Ordering::AcqRel);
        if raw != -1 {
            out.push(Pid::from_raw(raw));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_drain_roundtrip() {
        // Exercise the scratch buffer directly; installing real signal
        // handlers is covered by integration-style manual testing since it
        // mutates global process state other tests would race on.
        record_reaped(Pid::from_raw(1234));
        record_reaped(Pid::from_raw(5678));
        let mut drained = drain_reaped();
        drained.sort();
        assert_eq!(drained, vec![Pid::from_raw(1234), Pid::from_raw(5678)]);
        assert!(drain_reaped().is_empty());
    }
}
