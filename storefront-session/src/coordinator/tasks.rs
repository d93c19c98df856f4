use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Resolve,
    ForcedSignOut,
}

/// Tracks the coordinator's background work.
/// Spawning under a key that is already running aborts the older task.
pub struct BackgroundTaskManager {
    tasks: HashMap<TaskKey, JoinHandle<()>>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn spawn<F>(&mut self, key: TaskKey, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(handle) = self.tasks.remove(&key) {
            if !handle.is_finished() {
                tracing::debug!(?key, "Replacing running background task");
            }
            handle.abort();
        }

        let handle = tokio::spawn(future);
        self.tasks.insert(key, handle);
    }

    pub fn cancel(&mut self, key: TaskKey) {
        if let Some(handle) = self.tasks.remove(&key) {
            handle.abort();
        }
    }

    /// Abort everything (used on shutdown)
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTaskManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
