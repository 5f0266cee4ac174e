//! Per-task-type running counters for observability (spec §4.9).

use std::sync::RwLock;

use crate::task::TaskType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub num_tasks: i64,
    pub num_process_tasks: i64,
    pub num_dir_tasks: i64,
    pub num_disk_tasks: i64,
    pub num_swap_tasks: i64,
    pub num_load_tasks: i64,
    pub num_total_tasks: i64,
}

/// Write-locked even for a `±1` adjustment, matching spec §4.9's
/// "to avoid torn reads of multi-counter snapshots" — a reader must never
/// observe `num_tasks` updated without its matching per-type counter.
pub struct Stats {
    inner: RwLock<StatsSnapshot>,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            inner: RwLock::new(StatsSnapshot::default()),
        }
    }

    pub fn increment(&self, task_type: TaskType) {
        let mut guard = self.inner.write().unwrap();
        guard.num_tasks += 1;
        Self::bump(&mut guard, task_type, 1);
    }

    pub fn decrement(&self, task_type: TaskType) {
        let mut guard = self.inner.write().unwrap();
        guard.num_tasks -= 1;
        Self::bump(&mut guard, task_type, -1);
    }

    fn bump(snapshot: &mut StatsSnapshot, task_type: TaskType, delta: i64) {
        match task_type {
            TaskType::Process => snapshot.num_process_tasks += delta,
            TaskType::Directory => snapshot.num_dir_tasks += delta,
            TaskType::Disk => snapshot.num_disk_tasks += delta,
            TaskType::Swap => snapshot.num_swap_tasks += delta,
            TaskType::Load => snapshot.num_load_tasks += delta,
            TaskType::Total => snapshot.num_total_tasks += delta,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.inner.read().unwrap()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_decrement_balance() {
        let stats = Stats::new();
        stats.increment(TaskType::Process);
        stats.increment(TaskType::Directory);
        let snap = stats.snapshot();
        assert_eq!(snap.num_tasks, 2);
        assert_eq!(snap.num_process_tasks, 1);
        assert_eq!(snap.num_dir_tasks, 1);

        stats.decrement(TaskType::Process);
        let snap = stats.snapshot();
        assert_eq!(snap.num_tasks, 1);
        assert_eq!(snap.num_process_tasks, 0);
    }
}
