//! In-memory registry of active tasks.
//!
//! Owned exclusively by the worker's control flow, so it needs no
//! locking. An entry exists from the moment its process starts until the
//! task either reports its terminal update or is killed.

use std::collections::HashMap;

use transcode_core::task::TaskLifecycle;
use transcode_core::types::{RunId, TaskId};

use crate::supervisor::ProcessHandle;

/// Registry entry for one running task.
#[derive(Debug)]
pub struct RegisteredTask {
    /// Identifies the process this entry was created for.
    pub run_id: RunId,
    pub lifecycle: TaskLifecycle,
    pub process: ProcessHandle,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, returning any entry previously stored under the id.
    pub fn register(&mut self, task_id: TaskId, task: RegisteredTask) -> Option<RegisteredTask> {
        self.tasks.insert(task_id, task)
    }

    pub fn lookup(&self, task_id: &str) -> Option<&RegisteredTask> {
        self.tasks.get(task_id)
    }

    pub fn remove(&mut self, task_id: &str) -> Option<RegisteredTask> {
        self.tasks.remove(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (TaskId, RegisteredTask)> + '_ {
        self.tasks.drain()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    fn entry(run_id: RunId) -> (RegisteredTask, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let (lifecycle, _) = TaskLifecycle::receive(format!("task-{run_id}"));
        (
            RegisteredTask {
                run_id,
                lifecycle,
                process: ProcessHandle::new(Some(1000 + run_id as u32), tx),
            },
            rx,
        )
    }

    #[test]
    fn register_lookup_remove() {
        let mut registry = TaskRegistry::new();
        let (task, _rx) = entry(1);

        assert!(registry.register("t1".into(), task).is_none());
        assert_eq!(registry.size(), 1);
        assert!(registry.contains("t1"));
        assert_eq!(registry.lookup("t1").map(|t| t.run_id), Some(1));

        let removed = registry.remove("t1").expect("entry exists");
        assert_eq!(removed.run_id, 1);
        assert_eq!(registry.size(), 0);
        assert!(registry.lookup("t1").is_none());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut registry = TaskRegistry::new();
        let (task, _rx) = entry(1);
        registry.register("t1".into(), task);

        assert!(registry.remove("nope").is_none());
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn register_same_id_returns_previous() {
        let mut registry = TaskRegistry::new();
        let (first, _rx1) = entry(1);
        let (second, _rx2) = entry(2);

        registry.register("t1".into(), first);
        let previous = registry.register("t1".into(), second);

        assert_eq!(previous.map(|t| t.run_id), Some(1));
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.lookup("t1").map(|t| t.run_id), Some(2));
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = TaskRegistry::new();
        let (a, _rx1) = entry(1);
        let (b, _rx2) = entry(2);
        registry.register("a".into(), a);
        registry.register("b".into(), b);

        let drained: Vec<_> = registry.drain().collect();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.size(), 0);
    }
}
