//! The task registry (spec §3, §4.4): three parallel maps keyed by
//! [`TaskId`], frozen together at shutdown.

use std::sync::Arc;
use std::thread::JoinHandle;

use nix::unistd::Pid;

use crate::container::FrozenMap;
use crate::control::TaskControl;
use crate::error::ContainerError;
use crate::task::TaskId;

/// `threads[id] -> worker handle`, `controls[id] -> control record`,
/// `children[id] -> child PID` (present only while a keep-alive task has a
/// live child).
///
/// Invariant (spec §3): `threads` and `controls` share the same key set at
/// every well-defined observation point — every mutation that inserts into
/// one inserts into the other in the same call, and removal is symmetric.
pub struct Registry {
    threads: FrozenMap<TaskId, Arc<JoinHandle<()>>>,
    controls: FrozenMap<TaskId, Arc<TaskControl>>,
    children: FrozenMap<TaskId, Pid>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            threads: FrozenMap::new(),
            controls: FrozenMap::new(),
            children: FrozenMap::new(),
        }
    }

    /// Bind a freshly spawned worker's handle and control record together.
    /// Fails with [`ContainerError::Exists`] on a duplicate id (maps to
    /// `DUPLICATE_ID` on the wire) or [`ContainerError::Frozen`] during
    /// shutdown (maps to `SHUTDOWN`).
    pub fn insert_task(
        &self,
        id: TaskId,
        handle: JoinHandle<()>,
        control: Arc<TaskControl>,
    ) -> Result<(), ContainerError> {
        self.controls.put(id.clone(), control)?;
        match self.threads.put(id.clone(), Arc::new(handle)) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Shouldn't happen (controls and threads are only ever
                // mutated together under this method and remove_task), but
                // keep the two maps' key sets symmetric if it does.
                let _ = self.controls.drop_key(&id);
                Err(e)
            }
        }
    }

    pub fn control(&self, id: &TaskId) -> Option<Arc<TaskControl>> {
        self.controls.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.threads.contains(id)
    }

    /// Remove a task's thread handle, control record and any child pid.
    pub fn remove_task(&self, id: &TaskId) -> Result<Option<Arc<JoinHandle<()>>>, ContainerError> {
        let handle = self.threads.drop_key(id)?;
        let _ = self.controls.drop_key(id);
        let _ = self.children.drop_key(id);
        Ok(handle)
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.threads.keys()
    }

    pub fn set_child(&self, id: &TaskId, pid: Pid) -> Result<(), ContainerError> {
        self.children.put(id.clone(), pid)
    }

    pub fn child(&self, id: &TaskId) -> Option<Pid> {
        self.children.get(id)
    }

    pub fn child_ids(&self) -> Vec<TaskId> {
        self.children.keys()
    }

    pub fn drop_child(&self, id: &TaskId) {
        let _ = self.children.drop_key(id);
    }

    /// Freeze every map. Idempotent; called from the main thread once it
    /// observes the shutdown flag (never from the signal handler itself —
    /// see spec §4.8 and §9's signal-handler-safety note).
    pub fn freeze(&self) {
        self.threads.freeze();
        self.controls.freeze();
        self.children.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.threads.is_frozen()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn insert_then_duplicate_is_rejected() {
        let registry = Registry::new();
        let id = TaskId::new("a");
        let handle = thread::spawn(|| {});
        let control = Arc::new(TaskControl::new());
        registry.insert_task(id.clone(), handle, control.clone()).unwrap();

        let handle2 = thread::spawn(|| {});
        let err = registry
            .insert_task(id.clone(), handle2, control)
            .unwrap_err();
        assert_eq!(err, ContainerError::Exists);
    }

    #[test]
    fn threads_and_controls_share_keyset() {
        let registry = Registry::new();
        let id = TaskId::new("a");
        let handle = thread::spawn(|| {});
        let control = Arc::new(TaskControl::new());
        registry.insert_task(id.clone(), handle, control).unwrap();

        assert!(registry.contains(&id));
        assert!(registry.control(&id).is_some());

        registry.remove_task(&id).unwrap();
        assert!(!registry.contains(&id));
        assert!(registry.control(&id).is_none());
    }

    #[test]
    fn freeze_blocks_new_admissions() {
        let registry = Registry::new();
        registry.freeze();
        let handle = thread::spawn(|| {});
        let control = Arc::new(TaskControl::new());
        let err = registry
            .insert_task(TaskId::new("a"), handle, control)
            .unwrap_err();
        assert_eq!(err, ContainerError::Frozen);
    }
}
