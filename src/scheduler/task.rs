//! Deferred tasks and the queue that owns them.
//!
//! A task is data, not behaviour: its id, its kind, the source shown in an
//! error report, and a `watch` channel carrying its state. Whoever starts an
//! out-of-band retrieval holds the matching [`TaskHandle`] and flips the state
//! to `Ready` or `Failed` whenever the bytes arrive; the scheduler only reads.

use crate::error::TaskError;
use crate::kind::ContentKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Opaque placeholder identifier, unique within one render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "docrender-task-{}", self.0)
    }
}

/// State carried on a task's completion channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting on an external retrieval.
    Fetching,
    /// Content is in hand; the payload is what the adapter receives.
    Ready(String),
    /// Retrieval or validation failed before rendering could start.
    Failed(TaskError),
}

/// Coarse status, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Fetching,
    Ready,
    Error,
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Fetching => TaskStatus::Fetching,
            TaskState::Ready(_) => TaskStatus::Ready,
            TaskState::Failed(_) => TaskStatus::Error,
        }
    }
}

/// One unit of deferred work, owned by the [`TaskQueue`] until drained.
#[derive(Debug)]
pub struct DeferredTask {
    pub id: TaskId,
    pub kind: ContentKind,
    /// What an error report shows: the raw content, or the reference that
    /// was being fetched.
    pub source: String,
    state: watch::Receiver<TaskState>,
}

impl DeferredTask {
    /// Snapshot of the current state.
    ///
    /// A task whose retrieval was dropped without ever resolving counts as
    /// failed, otherwise it would keep the queue polling forever.
    pub fn state(&self) -> TaskState {
        let current = self.state.borrow().clone();
        if current == TaskState::Fetching && self.state.has_changed().is_err() {
            return TaskState::Failed(TaskError::FetchFailed {
                reference: self.source.clone(),
                reason: "retrieval was abandoned".into(),
            });
        }
        current
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status()
    }

    /// Ready or failed: can be drained without waiting.
    pub fn is_drainable(&self) -> bool {
        self.status() != TaskStatus::Fetching
    }
}

/// Write side of a fetching task's completion channel.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    tx: watch::Sender<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Retrieval succeeded; `content` is handed to the adapter.
    pub fn resolve(self, content: String) {
        // The receiver is gone once the session is torn down; nothing to do.
        let _ = self.tx.send(TaskState::Ready(content));
    }

    pub fn fail(self, error: TaskError) {
        let _ = self.tx.send(TaskState::Failed(error));
    }
}

/// Ordered collection of deferred tasks, in registration (document) order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<DeferredTask>,
    next_id: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: ContentKind, source: String, initial: TaskState) -> (TaskId, TaskHandle) {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        let (tx, rx) = watch::channel(initial);
        self.tasks.push(DeferredTask {
            id,
            kind,
            source,
            state: rx,
        });
        (id, TaskHandle { id, tx })
    }

    /// Register a task whose content is already in hand.
    pub fn register_ready(&mut self, kind: ContentKind, content: impl Into<String>) -> TaskId {
        let content = content.into();
        let (id, _) = self.push(kind, content.clone(), TaskState::Ready(content));
        id
    }

    /// Register a task that waits on an out-of-band retrieval.
    ///
    /// The caller owns the returned handle and must resolve or fail it.
    pub fn register_fetching(
        &mut self,
        kind: ContentKind,
        reference: impl Into<String>,
    ) -> (TaskId, TaskHandle) {
        self.push(kind, reference.into(), TaskState::Fetching)
    }

    /// Register a task that is already known to fail.
    pub fn register_failed(
        &mut self,
        kind: ContentKind,
        source: impl Into<String>,
        error: TaskError,
    ) -> TaskId {
        let (id, _) = self.push(kind, source.into(), TaskState::Failed(error));
        id
    }

    /// Index of the earliest-registered task that is ready or failed.
    pub fn first_drainable(&self) -> Option<usize> {
        self.tasks.iter().position(DeferredTask::is_drainable)
    }

    /// Remove and return the task at `index`. Each task leaves exactly once.
    pub fn remove(&mut self, index: usize) -> DeferredTask {
        self.tasks.remove(index)
    }

    pub fn get(&self, id: TaskId) -> Option<&DeferredTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every remaining task. Outstanding handles become no-ops.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

/// Explicit cancellation flag for one render session.
///
/// Cloned into everything that might apply a result later; all clones observe
/// the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let mut q = TaskQueue::new();
        let a = q.register_ready(ContentKind::Diagram, "graph TD");
        let (b, _h) = q.register_fetching(ContentKind::VectorImage, "a.svg");
        assert!(a < b);
        assert_eq!(q.ids(), vec![a, b]);
        assert_eq!(a.to_string(), "docrender-task-1");
    }

    #[test]
    fn ready_task_is_drainable_fetching_is_not() {
        let mut q = TaskQueue::new();
        let (_f, _handle) = q.register_fetching(ContentKind::VectorImage, "a.svg");
        let r = q.register_ready(ContentKind::Diagram, "graph TD");
        assert_eq!(q.first_drainable(), Some(1));
        assert_eq!(q.get(r).map(DeferredTask::status), Some(TaskStatus::Ready));
    }

    #[test]
    fn handle_flips_fetching_to_ready() {
        let mut q = TaskQueue::new();
        let (id, handle) = q.register_fetching(ContentKind::VectorImage, "a.svg");
        assert_eq!(q.first_drainable(), None);
        handle.resolve("<svg/>".into());
        assert_eq!(q.first_drainable(), Some(0));
        assert_eq!(
            q.get(id).map(DeferredTask::state),
            Some(TaskState::Ready("<svg/>".into()))
        );
    }

    #[test]
    fn failed_registration_is_immediately_an_error() {
        let mut q = TaskQueue::new();
        let err = TaskError::UnsupportedResource {
            reference: "data:image/png;base64,AA".into(),
            detail: "not svg".into(),
        };
        let id = q.register_failed(ContentKind::VectorImage, "data:…", err.clone());
        assert_eq!(q.get(id).map(DeferredTask::state), Some(TaskState::Failed(err)));
    }

    #[test]
    fn dropped_handle_fails_the_task() {
        let mut q = TaskQueue::new();
        let (id, handle) = q.register_fetching(ContentKind::VectorImage, "lost.svg");
        drop(handle);
        assert!(matches!(
            q.get(id).map(DeferredTask::state),
            Some(TaskState::Failed(TaskError::FetchFailed { .. }))
        ));
    }

    #[test]
    fn remove_takes_task_once() {
        let mut q = TaskQueue::new();
        q.register_ready(ContentKind::Diagram, "a");
        let t = q.remove(0);
        assert_eq!(t.id, TaskId(1));
        assert!(q.is_empty());
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
