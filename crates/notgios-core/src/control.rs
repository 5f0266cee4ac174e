//! The per-task control record (spec §3, §4.5): a condition-variable-backed
//! pause/kill switch shared between the control thread and a worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The two flags a worker checks on every wake, guarded by one mutex so a
/// waiter that re-checks the predicate after waking observes a consistent
/// pair (spec §4.5: "the predicate is checked while holding the mutex").
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlState {
    pub paused: bool,
    pub killed: bool,
}

/// Shared between a worker thread and the control thread for one task.
///
/// `dropped` is intentionally outside the mutex: spec §3 calls out that it's
/// written once by the worker (on a fatal collection error) and only ever
/// read afterwards by the control thread's drain loop, so an `AtomicBool`
/// is sufficient and avoids taking the control mutex from the drain path.
pub struct TaskControl {
    state: Mutex<ControlState>,
    signal: Condvar,
    dropped: AtomicBool,
}

impl TaskControl {
    pub fn new() -> Self {
        TaskControl {
            state: Mutex::new(ControlState::default()),
            signal: Condvar::new(),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn pause(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.paused = true;
        self.signal.notify_one();
    }

    pub fn resume(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.paused = false;
        self.signal.notify_one();
    }

    /// Set `killed` and clear `paused` so a sleeping worker wakes immediately
    /// instead of waiting out a pause (spec §4.3.2 reschedule DELETE).
    pub fn kill(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.killed = true;
        guard.paused = false;
        self.signal.notify_one();
    }

    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Worker-side loop step. While `paused`, blocks on the condvar,
    /// re-checking the predicate on every wake (spurious or real). Returns
    /// `true` if the worker should exit (`killed` observed).
    pub fn wait_while_paused(&self) -> bool {
        let mut guard = self.state.lock().unwrap();
        while guard.paused && !guard.killed {
            guard = self.signal.wait(guard).unwrap();
        }
        guard.killed
    }

    pub fn is_killed(&self) -> bool {
        self.state.lock().unwrap().killed
    }

    /// Sleep until `frequency` has elapsed or the condvar is signalled
    /// (pause/resume/kill), whichever comes first — the Rust analogue of
    /// `pthread_cond_timedwait` against an absolute deadline (spec §4.5).
    pub fn sleep_for(&self, frequency: Duration) {
        let deadline = Instant::now() + frequency;
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.killed {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let (next_guard, timeout) = self
                .signal
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = next_guard;
            if timeout.timed_out() || guard.killed {
                return;
            }
        }
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pause_blocks_and_resume_wakes() {
        let control = Arc::new(TaskControl::new());
        control.pause();

        let worker_control = control.clone();
        let handle = thread::spawn(move || worker_control.wait_while_paused());

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        control.resume();
        let killed = handle.join().unwrap();
        assert!(!killed);
    }

    #[test]
    fn kill_wakes_a_paused_waiter() {
        let control = Arc::new(TaskControl::new());
        control.pause();

        let worker_control = control.clone();
        let handle = thread::spawn(move || worker_control.wait_while_paused());

        thread::sleep(Duration::from_millis(50));
        control.kill();
        let killed = handle.join().unwrap();
        assert!(killed);
    }

    #[test]
    fn sleep_for_returns_early_on_kill() {
        let control = Arc::new(TaskControl::new());
        let worker_control = control.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            worker_control.sleep_for(Duration::from_secs(30));
            start.elapsed()
        });

        thread::sleep(Duration::from_millis(50));
        control.kill();
        let elapsed = handle.join().unwrap();
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn dropped_flag_is_observable_without_the_mutex() {
        let control = TaskControl::new();
        assert!(!control.is_dropped());
        control.mark_dropped();
        assert!(control.is_dropped());
    }
}
