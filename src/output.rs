//! Result types returned by the render entry points.

use crate::error::TaskError;
use crate::kind::ContentKind;
use crate::scheduler::TaskId;
use serde::{Deserialize, Serialize};

/// The finished document plus what happened on the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOutput {
    /// Final, sanitized markup with every slot filled.
    pub html: String,
    pub stats: RenderStats,
    /// One entry per drained task, in drain order.
    pub outcomes: Vec<TaskOutcome>,
    /// The export ceiling was hit and leftover slots got a timeout notice.
    #[serde(default)]
    pub timed_out: bool,
}

/// Aggregate counters for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStats {
    pub total_tasks: usize,
    pub rendered: usize,
    pub failed: usize,
    pub cache_hits: usize,
    /// Time to first paint: parse, extract, stringify, sanitize.
    pub prepare_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl RenderStats {
    /// Tally drained outcomes. `total_tasks` is set by the caller.
    pub fn tally(outcomes: &[TaskOutcome]) -> Self {
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        Self {
            rendered: outcomes.len() - failed,
            failed,
            cache_hits: outcomes.iter().filter(|o| o.cached).count(),
            ..Self::default()
        }
    }
}

/// One drained task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub kind: ContentKind,
    /// Served from the image cache without calling the backend.
    pub cached: bool,
    /// `None` when the slot received an image.
    pub error: Option<TaskError>,
    pub duration_ms: u64,
    /// Markup spliced into the slot. Not serialised: images are already in
    /// [`RenderOutput::html`].
    #[serde(skip)]
    pub html: String,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
