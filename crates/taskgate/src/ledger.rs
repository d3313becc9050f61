use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use taskgate_config::Config;
use taskgate_resolver::ResolvedTask;

/// Admitted tasks by id, each with everything it holds.
#[derive(Debug, Default)]
pub struct TaskResourceLedger {
    tasks: Mutex<FxHashMap<u32, ResolvedTask>>,
}

impl TaskResourceLedger {
    fn lock(&self) -> MutexGuard<'_, FxHashMap<u32, ResolvedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an admitted task. An entry is never replaced: if `task_id` is taken, the task is
    /// handed back.
    pub fn insert(&self, task_id: u32, task: ResolvedTask) -> Result<(), ResolvedTask> {
        let mut tasks = self.lock();
        if tasks.contains_key(&task_id) {
            return Err(task);
        }
        tasks.insert(task_id, task);
        Ok(())
    }

    pub fn remove(&self, task_id: u32) -> Option<ResolvedTask> {
        self.lock().remove(&task_id)
    }

    /// The admitted configuration of `task_id`.
    pub fn config(&self, task_id: u32) -> Option<Config> {
        self.lock().get(&task_id).map(|task| task.config.clone())
    }

    pub fn contains(&self, task_id: u32) -> bool {
        self.lock().contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
