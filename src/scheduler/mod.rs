//! The drain loop.
//!
//! One [`Scheduler`] per render session owns that session's [`TaskQueue`].
//! Draining is cooperative and single-consumer:
//!
//! 1. Take the earliest-registered task that is `ready` or `error`. A ready
//!    task goes through its adapter; an error task becomes an inline report.
//!    Either way its slot in the [`LiveDocument`] is replaced.
//! 2. If every remaining task is still fetching, sleep for the poll interval
//!    and look again. Content already in hand never waits behind a download.
//! 3. Count the task, notify the progress collaborator.
//! 4. When the queue is empty, signal completion.
//!
//! A panic inside an adapter is contained and reported like any other
//! failure, so one bad element never stops the rest of the queue.

pub mod task;

pub use task::{
    CancellationToken, DeferredTask, TaskHandle, TaskId, TaskQueue, TaskState, TaskStatus,
};

use crate::config::RenderConfig;
use crate::document::LiveDocument;
use crate::error::TaskError;
use crate::kind::ContentKind;
use crate::output::TaskOutcome;
use crate::pipeline::encode::{error_markup, image_markup};
use crate::progress::{ProgressCallback, ProgressState};
use crate::raster::AdapterSet;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Drains one session's queue into one live document.
pub struct Scheduler {
    queue: TaskQueue,
    adapters: AdapterSet,
    progress: ProgressState,
    callback: Option<ProgressCallback>,
    cancel: CancellationToken,
    poll_interval: Duration,
    display_scale: f32,
    error_source_limit: usize,
    started: bool,
    finished: bool,
    failed: usize,
}

impl Scheduler {
    pub fn new(queue: TaskQueue, adapters: AdapterSet, config: &RenderConfig) -> Self {
        Self {
            queue,
            adapters,
            progress: ProgressState::default(),
            callback: config.progress_callback.clone(),
            cancel: CancellationToken::new(),
            poll_interval: config.poll_interval(),
            display_scale: config.display_scale,
            error_source_limit: config.error_source_limit,
            started: false,
            finished: false,
            failed: 0,
        }
    }

    /// Share an existing cancellation token instead of the scheduler's own.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn progress(&self) -> ProgressState {
        self.progress
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tear the session down: drop every remaining task.
    ///
    /// Retrievals still in flight finish into closed channels and are lost.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            debug!("Cancelled with {} task(s) outstanding", dropped);
        }
        if self.started {
            self.finish();
        }
    }

    /// Show the indicator once, with however many tasks were registered.
    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let total = self.queue.len();
        self.progress.reset(total);
        if total > 0 {
            info!("Draining {} deferred task(s)", total);
            if let Some(cb) = &self.callback {
                cb.on_render_start(total);
            }
        }
    }

    /// Hide the indicator once the queue is empty.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let total = self.progress.total;
        if total > 0 {
            info!(
                "Drained {} task(s), {} failed",
                self.progress.completed, self.failed
            );
            if let Some(cb) = &self.callback {
                cb.on_render_complete(total, self.failed);
            }
        }
    }

    /// Drain one task into `doc`.
    ///
    /// Returns `None` when the queue is empty or the session was cancelled.
    pub async fn drain_next(&mut self, doc: &mut LiveDocument) -> Option<TaskOutcome> {
        self.start();
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if self.queue.is_empty() {
                self.finish();
                return None;
            }
            if let Some(index) = self.queue.first_drainable() {
                let task = self.queue.remove(index);
                return self.complete(task, doc).await;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Drain until the queue is empty or the session is cancelled.
    pub async fn drain_all(&mut self, doc: &mut LiveDocument) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::with_capacity(self.queue.len());
        while let Some(outcome) = self.drain_next(doc).await {
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn complete(&mut self, task: DeferredTask, doc: &mut LiveDocument) -> Option<TaskOutcome> {
        let start = Instant::now();
        let (result, cached) = match task.state() {
            TaskState::Ready(content) => {
                match self.render_contained(task.kind, &content).await {
                    Ok((html, cached)) => (Ok(html), cached),
                    Err(e) => (Err(e), false),
                }
            }
            TaskState::Failed(e) => (Err(e), false),
            // first_drainable never hands out a fetching task.
            TaskState::Fetching => (
                Err(TaskError::FetchFailed {
                    reference: task.source.clone(),
                    reason: "drained before retrieval finished".into(),
                }),
                false,
            ),
        };

        // The session may have been torn down while the backend was busy.
        if self.cancel.is_cancelled() {
            debug!("Discarding {} after cancellation", task.id);
            return None;
        }

        let (html, error) = match result {
            Ok(html) => (html, None),
            Err(e) => {
                warn!("{} ({}) failed: {}", task.id, task.kind, e);
                let report = error_markup(
                    task.kind,
                    &e.to_string(),
                    &task.source,
                    self.error_source_limit,
                );
                (report, Some(e))
            }
        };

        if doc.replace(task.id, &html) == 0 {
            debug!("{} has no attached placeholder; result dropped", task.id);
        }

        self.progress.advance();
        let (completed, total) = (self.progress.completed, self.progress.total);
        match &error {
            None => {
                debug!(
                    "{} ({}) done{} ({}/{})",
                    task.id,
                    task.kind,
                    if cached { " from cache" } else { "" },
                    completed,
                    total
                );
                if let Some(cb) = &self.callback {
                    cb.on_task_complete(task.id, task.kind, completed, total);
                }
            }
            Some(e) => {
                self.failed += 1;
                if let Some(cb) = &self.callback {
                    cb.on_task_error(task.id, task.kind, completed, total, &e.to_string());
                }
            }
        }

        if self.queue.is_empty() {
            self.finish();
        }

        Some(TaskOutcome {
            task_id: task.id,
            kind: task.kind,
            cached,
            error,
            duration_ms: start.elapsed().as_millis() as u64,
            html,
        })
    }

    /// Adapter call plus image markup, with panics turned into task errors.
    async fn render_contained(
        &self,
        kind: ContentKind,
        content: &str,
    ) -> Result<(String, bool), TaskError> {
        let scale = self.display_scale;
        let work = async {
            let out = self.adapters.render(kind, content).await?;
            Ok::<_, TaskError>((image_markup(kind, &out.image, scale, kind.label()), out.cached))
        };
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(TaskError::Panicked {
                detail: panic_message(panic.as_ref()),
            }),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.queue.len())
            .field("progress", &self.progress)
            .field("failed", &self.failed)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ImageCache;
    use crate::pipeline::encode::placeholder_markup;
    use crate::progress::RenderProgressCallback;
    use crate::raster::adapter::tests::png_base64;
    use crate::raster::{BackendImage, Rasterizer};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Renders every input except the ones containing "FAIL" or "PANIC".
    struct PickyBackend;

    #[async_trait]
    impl Rasterizer for PickyBackend {
        async fn render(&self, content: &str) -> Result<BackendImage, String> {
            if content.contains("PANIC") {
                panic!("backend exploded on {content}");
            }
            if content.contains("FAIL") {
                return Err(format!("cannot parse '{content}'"));
            }
            Ok(BackendImage {
                base64: png_base64(8, 8),
                width: 8,
                height: 8,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RenderProgressCallback for Recorder {
        fn on_render_start(&self, total: usize) {
            self.events.lock().push(format!("start {total}"));
        }
        fn on_task_complete(&self, id: TaskId, _: ContentKind, completed: usize, total: usize) {
            self.events.lock().push(format!("ok {} {completed}/{total}", id.0));
        }
        fn on_task_error(&self, id: TaskId, _: ContentKind, completed: usize, total: usize, _: &str) {
            self.events.lock().push(format!("err {} {completed}/{total}", id.0));
        }
        fn on_render_complete(&self, total: usize, failed: usize) {
            self.events.lock().push(format!("done {total} {failed}"));
        }
    }

    fn adapters() -> AdapterSet {
        AdapterSet::new(Arc::new(ImageCache::in_memory(16)))
            .with_backend(ContentKind::Diagram, Arc::new(PickyBackend))
            .with_backend(ContentKind::VectorImage, Arc::new(PickyBackend))
    }

    fn config(recorder: Option<Arc<Recorder>>) -> RenderConfig {
        let mut b = RenderConfig::builder().poll_interval_ms(5);
        if let Some(r) = recorder {
            b = b.progress_callback(r);
        }
        b.build().unwrap()
    }

    fn doc_for(queue: &TaskQueue) -> LiveDocument {
        let html: String = queue
            .ids()
            .into_iter()
            .map(|id| format!("<p>{}</p>{}", id.0, placeholder_markup(id)))
            .collect();
        LiveDocument::from_html(&html)
    }

    #[tokio::test]
    async fn ready_task_drains_before_earlier_fetching_task() {
        let mut queue = TaskQueue::new();
        let (slow, handle) = queue.register_fetching(ContentKind::VectorImage, "slow.svg");
        let fast = queue.register_ready(ContentKind::Diagram, "graph TD");
        let mut doc = doc_for(&queue);
        let mut scheduler = Scheduler::new(queue, adapters(), &config(None));

        let first = scheduler.drain_next(&mut doc).await.unwrap();
        assert_eq!(first.task_id, fast);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.resolve("<svg/>".into());
        });
        let second = scheduler.drain_next(&mut doc).await.unwrap();
        assert_eq!(second.task_id, slow);
        assert!(second.error.is_none());
        assert!(scheduler.drain_next(&mut doc).await.is_none());
        assert_eq!(doc.pending_count(), 0);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_counted() {
        let recorder = Arc::new(Recorder::default());
        let mut queue = TaskQueue::new();
        for content in ["a", "b", "FAIL c", "d", "e"] {
            queue.register_ready(ContentKind::Diagram, content);
        }
        let mut doc = doc_for(&queue);
        let mut scheduler = Scheduler::new(queue, adapters(), &config(Some(recorder.clone())));

        let outcomes = scheduler.drain_all(&mut doc).await;
        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes.iter().filter(|o| o.error.is_some()).count(), 1);
        assert!(outcomes[2].error.is_some());
        assert_eq!(scheduler.progress(), ProgressState { completed: 5, total: 5 });
        assert_eq!(scheduler.failed(), 1);

        let html = doc.to_html();
        assert_eq!(html.matches("<img").count(), 4);
        assert!(html.contains("docrender-error"));
        assert!(html.contains("FAIL c"));

        let events = recorder.events.lock().clone();
        assert_eq!(events.first().map(String::as_str), Some("start 5"));
        assert!(events.contains(&"err 3 3/5".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("done 5 1"));
    }

    #[tokio::test]
    async fn panicking_backend_becomes_inline_error() {
        let mut queue = TaskQueue::new();
        queue.register_ready(ContentKind::Diagram, "PANIC");
        queue.register_ready(ContentKind::Diagram, "fine");
        let mut doc = doc_for(&queue);
        let mut scheduler = Scheduler::new(queue, adapters(), &config(None));

        let outcomes = scheduler.drain_all(&mut doc).await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[0].error,
            Some(TaskError::Panicked { ref detail }) if detail.contains("exploded")
        ));
        assert!(outcomes[1].error.is_none());
    }

    #[tokio::test]
    async fn error_state_task_skips_rasterisation() {
        let mut queue = TaskQueue::new();
        queue.register_failed(
            ContentKind::VectorImage,
            "data:image/png;base64,AA",
            TaskError::UnsupportedResource {
                reference: "data:image/png;base64,AA".into(),
                detail: "not svg".into(),
            },
        );
        let mut doc = doc_for(&queue);
        let mut scheduler = Scheduler::new(queue, adapters(), &config(None));
        let outcome = scheduler.drain_next(&mut doc).await.unwrap();
        assert!(matches!(outcome.error, Some(TaskError::UnsupportedResource { .. })));
        assert!(doc.to_html().contains("SVG image error"));
    }

    #[tokio::test]
    async fn cancelled_session_applies_nothing() {
        let mut queue = TaskQueue::new();
        queue.register_ready(ContentKind::Diagram, "a");
        let (_id, _handle) = queue.register_fetching(ContentKind::VectorImage, "never.svg");
        let mut doc = doc_for(&queue);
        let mut scheduler = Scheduler::new(queue, adapters(), &config(None));
        let token = scheduler.cancellation_token();

        token.cancel();
        assert!(scheduler.drain_next(&mut doc).await.is_none());
        assert_eq!(doc.pending_count(), 2);

        scheduler.cancel();
        assert!(scheduler.queue().is_empty());
    }

    #[tokio::test]
    async fn cache_hit_is_reported() {
        let mut queue = TaskQueue::new();
        queue.register_ready(ContentKind::Diagram, "same");
        queue.register_ready(ContentKind::Diagram, "same");
        let mut doc = doc_for(&queue);
        let mut scheduler = Scheduler::new(queue, adapters(), &config(None));
        let outcomes = scheduler.drain_all(&mut doc).await;
        assert!(!outcomes[0].cached);
        assert!(outcomes[1].cached);
    }

    #[tokio::test]
    async fn empty_queue_finishes_immediately() {
        let recorder = Arc::new(Recorder::default());
        let mut doc = LiveDocument::from_html("<p>plain</p>");
        let mut scheduler =
            Scheduler::new(TaskQueue::new(), adapters(), &config(Some(recorder.clone())));
        assert!(scheduler.drain_next(&mut doc).await.is_none());
        assert!(recorder.events.lock().is_empty());
        assert!(scheduler.progress().is_done());
    }
}
