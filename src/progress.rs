//! Progress reporting for the deferred-render queue.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::RenderConfigBuilder::progress_callback`] to drive a
//! visible indicator while the scheduler drains. The contract is small on
//! purpose: show it when a render pass starts with work queued, move it after
//! every completed task (success or failure), hide it when everything is done.
//!
//! # Example
//!
//! ```rust
//! use docrender::{ContentKind, RenderConfig, RenderProgressCallback, TaskId};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl RenderProgressCallback for Printer {
//!     fn on_task_complete(&self, _id: TaskId, kind: ContentKind, completed: usize, total: usize) {
//!         eprintln!("{kind} done ({completed}/{total})");
//!     }
//! }
//!
//! let config = RenderConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn RenderProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::kind::ContentKind;
use crate::scheduler::TaskId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Receives progress events from the scheduler.
///
/// All methods default to no-ops. Implementations must be `Send + Sync`: the
/// callback is shared between sessions and may be invoked from any runtime
/// worker thread.
pub trait RenderProgressCallback: Send + Sync {
    /// The queue holds `total` tasks; show the indicator.
    fn on_render_start(&self, total: usize) {
        let _ = total;
    }

    /// A task's placeholder was replaced with its rendered image.
    fn on_task_complete(&self, id: TaskId, kind: ContentKind, completed: usize, total: usize) {
        let _ = (id, kind, completed, total);
    }

    /// A task's placeholder was replaced with an inline error report.
    fn on_task_error(
        &self,
        id: TaskId,
        kind: ContentKind,
        completed: usize,
        total: usize,
        error: &str,
    ) {
        let _ = (id, kind, completed, total, error);
    }

    /// `completed == total`; hide the indicator.
    fn on_render_complete(&self, total: usize, failed: usize) {
        let _ = (total, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenderConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;

/// Completed/total counters for one render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub completed: usize,
    pub total: usize,
}

impl ProgressState {
    /// Start a pass over `total` tasks.
    pub fn reset(&mut self, total: usize) {
        self.completed = 0;
        self.total = total;
    }

    /// Count one completed task (success or failure).
    pub fn advance(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }

    /// Fraction complete in `[0, 1]`; an empty pass counts as done.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}
