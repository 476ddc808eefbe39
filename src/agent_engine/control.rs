//! Per-task status shared between the control API and the running loop.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::agent_engine::state::TaskStatus;

/// Status cell of one task. The control API writes, the loop reads and waits.
pub struct RequestState {
    tx: watch::Sender<TaskStatus>,
}

impl RequestState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TaskStatus::Running);
        Self { tx }
    }

    pub fn status(&self) -> TaskStatus {
        *self.tx.borrow()
    }

    /// Running → Paused. Returns whether the status changed.
    pub fn pause(&self) -> bool {
        self.transition(|s| (*s == TaskStatus::Running).then_some(TaskStatus::Paused))
    }

    /// Paused → Running. Returns whether the status changed.
    pub fn resume(&self) -> bool {
        self.transition(|s| (*s == TaskStatus::Paused).then_some(TaskStatus::Running))
    }

    /// Any → Stopped. Wakes a paused loop.
    pub fn stop(&self) {
        self.transition(|s| (*s != TaskStatus::Stopped).then_some(TaskStatus::Stopped));
    }

    pub fn watcher(&self) -> StatusWatcher {
        StatusWatcher { rx: self.tx.subscribe() }
    }

    fn transition(&self, next: impl FnOnce(&TaskStatus) -> Option<TaskStatus>) -> bool {
        self.tx.send_if_modified(|status| match next(status) {
            Some(s) => {
                *status = s;
                true
            }
            None => false,
        })
    }
}

impl Default for RequestState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side held by the control loop.
pub struct StatusWatcher {
    rx: watch::Receiver<TaskStatus>,
}

impl StatusWatcher {
    /// Returns `false` once the task is stopped. Blocks while paused and
    /// re-checks after every wake-up, so a stop issued during a pause wins.
    pub async fn checkpoint(&mut self) -> bool {
        loop {
            let status = *self.rx.borrow_and_update();
            match status {
                TaskStatus::Running => return true,
                TaskStatus::Stopped => return false,
                TaskStatus::Paused => {
                    tracing::info!("task paused, waiting for resume");
                    if self.rx.changed().await.is_err() {
                        // Sender dropped: the task was unregistered.
                        return false;
                    }
                }
            }
        }
    }
}

/// Active tasks keyed by task id.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, Arc<RequestState>>>>,
}

impl TaskRegistry {
    pub async fn register(&self, task_id: &str) -> Arc<RequestState> {
        let state = Arc::new(RequestState::new());
        self.tasks.lock().await.insert(task_id.to_string(), state.clone());
        state
    }

    pub async fn remove(&self, task_id: &str) {
        self.tasks.lock().await.remove(task_id);
    }

    pub async fn get(&self, task_id: &str) -> Option<Arc<RequestState>> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    pub async fn pause(&self, task_id: &str) -> bool {
        match self.get(task_id).await {
            Some(state) => state.pause(),
            None => false,
        }
    }

    pub async fn resume(&self, task_id: &str) -> bool {
        match self.get(task_id).await {
            Some(state) => state.resume(),
            None => false,
        }
    }

    /// True whenever the task is registered, even if already stopping.
    pub async fn stop(&self, task_id: &str) -> bool {
        match self.get(task_id).await {
            Some(state) => {
                state.stop();
                true
            }
            None => false,
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
