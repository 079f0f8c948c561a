//! Document assembly entry points.
//!
//! ```text
//! source ─▶ parse ─▶ extract ─▶ stringify ─▶ vector-image scan ─▶ sanitize
//!                                                          │
//!                                             initial_html ◀┘ (shown now)
//!                                                          │
//!                    drain: splice images / error reports ─┤
//!                                                          ▼
//!                                           re-sanitize ─▶ RenderOutput
//! ```
//!
//! [`Renderer::prepare`] does everything up to first paint synchronously and
//! returns a [`RenderSession`]; the caller shows `initial_html()` right away
//! and then drains. [`Renderer::render`] does both in one call.

use crate::cache::ImageCache;
use crate::config::RenderConfig;
use crate::document::{DocumentTree, LiveDocument, SlotChange};
use crate::error::PipelineError;
use crate::kind::ContentKind;
use crate::output::{RenderOutput, RenderStats, TaskOutcome};
use crate::pipeline::encode::timed_out_markup;
use crate::pipeline::fetch::{DefaultFetcher, ResourceFetcher};
use crate::pipeline::{extract, postprocess, sanitize};
use crate::progress::ProgressState;
use crate::raster::AdapterSet;
use crate::scheduler::{CancellationToken, Scheduler, TaskId, TaskQueue};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Renders documents with one set of backends and one shared cache.
///
/// Cheap to clone; clones share the cache, backends and fetcher.
#[derive(Clone)]
pub struct Renderer {
    config: RenderConfig,
    adapters: AdapterSet,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl Renderer {
    pub fn new(config: RenderConfig, adapters: AdapterSet) -> Self {
        let adapters = adapters.with_render_timeout(config.render_timeout());
        let fetcher = Arc::new(DefaultFetcher::new(config.fetch_timeout()));
        Self {
            config,
            adapters,
            fetcher,
        }
    }

    /// Replace the resource fetcher used for referenced vector images.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        self.adapters.cache()
    }

    /// Everything up to first paint.
    ///
    /// Must be awaited inside a tokio runtime: retrievals for referenced
    /// images start here.
    pub async fn prepare(&self, source: &str) -> Result<RenderSession, PipelineError> {
        self.prepare_with(source, &self.config)
    }

    fn prepare_with(&self, source: &str, config: &RenderConfig) -> Result<RenderSession, PipelineError> {
        let started = Instant::now();
        let assembled = std::panic::catch_unwind(AssertUnwindSafe(|| {
            // ── Parse ───────────────────────────────────────────────────────
            let mut tree = DocumentTree::parse(source);
            debug!("Parsed {} events", tree.len());
            tree.map_raw_html(sanitize::strip_reserved_markers);

            // ── Extract ─────────────────────────────────────────────────────
            let mut queue = TaskQueue::new();
            let extracted = extract::extract(&mut tree, &mut queue, config, &self.adapters);

            // ── Stringify ───────────────────────────────────────────────────
            let markup = tree.stringify();

            // ── Vector-image scan ───────────────────────────────────────────
            let (markup, scan) = postprocess::substitute_vector_images(
                &markup,
                &mut queue,
                &self.fetcher,
                config,
                &self.adapters,
            );

            // ── Sanitize ────────────────────────────────────────────────────
            let markup = sanitize::sanitize(&markup);

            info!(
                "Prepared document: {} diagram(s), {} HTML block(s), {} vector image(s)",
                extracted.diagrams, extracted.html_blocks, scan.tasks
            );
            (queue, markup)
        }));

        let (queue, markup) = assembled.map_err(|panic| {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "document assembly panicked".to_string());
            PipelineError::Internal(detail)
        })?;

        let kinds: HashMap<TaskId, ContentKind> = queue
            .ids()
            .into_iter()
            .filter_map(|id| queue.get(id).map(|t| (id, t.kind)))
            .collect();
        let total_tasks = queue.len();
        let doc = LiveDocument::from_html(&markup);
        let scheduler = Scheduler::new(queue, self.adapters.clone(), config);

        Ok(RenderSession {
            initial_html: markup,
            doc,
            scheduler,
            kinds,
            total_tasks,
            outcomes: Vec::new(),
            timed_out: false,
            started,
            prepare_duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Render `source` completely.
    ///
    /// Per-element failures never fail the call; they are inline in the
    /// output and listed in `outcomes`.
    pub async fn render(&self, source: &str) -> Result<RenderOutput, PipelineError> {
        let mut session = self.prepare(source).await?;
        session.drain().await;
        Ok(session.finish())
    }

    /// Render a file. Relative image references resolve against the file's
    /// directory unless `base_dir` is configured.
    pub async fn render_file(&self, path: impl AsRef<Path>) -> Result<RenderOutput, PipelineError> {
        let path = path.as_ref();
        info!("Rendering {}", path.display());
        let source = read_source(path).await?;

        let mut config = self.config.clone();
        if config.base_dir.is_none() {
            config.base_dir = path.parent().map(Path::to_path_buf);
        }
        let mut session = self.prepare_with(&source, &config)?;
        session.drain().await;
        Ok(session.finish())
    }

    /// Render a file and write the HTML to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn render_to_file(
        &self,
        input: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Result<RenderStats, PipelineError> {
        let output = self.render_file(input).await?;
        let path = output_path.as_ref();
        let write_failed = |source: std::io::Error| PipelineError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        let tmp_path = path.with_extension("html.tmp");
        tokio::fs::write(&tmp_path, &output.html)
            .await
            .map_err(write_failed)?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(write_failed)?;

        Ok(output.stats)
    }

    /// Render for print/export: same as [`Self::render`], but gives up after
    /// `fallback_timeout_secs` and marks whatever is still pending as timed
    /// out instead of waiting forever.
    pub async fn render_for_export(&self, source: &str) -> Result<RenderOutput, PipelineError> {
        let mut session = self.prepare(source).await?;
        let ceiling = self.config.fallback_timeout();
        if tokio::time::timeout(ceiling, session.drain()).await.is_err() {
            warn!(
                "Export ceiling of {}s reached with {} slot(s) pending",
                ceiling.as_secs(),
                session.document().pending_count()
            );
            session.force_complete();
        }
        Ok(session.finish())
    }

    /// Synchronous wrapper around [`Self::render`].
    ///
    /// Creates a temporary current-thread runtime internally; do not call
    /// from inside an async context.
    pub fn render_sync(&self, source: &str) -> Result<RenderOutput, PipelineError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.render(source))
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .field("adapters", &self.adapters)
            .finish()
    }
}

async fn read_source(path: &Path) -> Result<String, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PipelineError::InvalidInput {
            input: path.display().to_string(),
            reason: e.to_string(),
        },
    })?;
    String::from_utf8(bytes).map_err(|e| PipelineError::InvalidInput {
        input: path.display().to_string(),
        reason: format!("not UTF-8 text: {e}"),
    })
}

/// One document being displayed.
///
/// Holds the live document and the scheduler draining into it. Dropping the
/// session abandons any outstanding work.
#[derive(Debug)]
pub struct RenderSession {
    initial_html: String,
    doc: LiveDocument,
    scheduler: Scheduler,
    kinds: HashMap<TaskId, ContentKind>,
    total_tasks: usize,
    outcomes: Vec<TaskOutcome>,
    timed_out: bool,
    started: Instant,
    prepare_duration_ms: u64,
}

impl RenderSession {
    /// Sanitized markup with placeholders, ready to inject.
    pub fn initial_html(&self) -> &str {
        &self.initial_html
    }

    pub fn document(&self) -> &LiveDocument {
        &self.doc
    }

    /// Slot replacements since the last call, for reconciling a host view.
    pub fn take_changes(&mut self) -> Vec<SlotChange> {
        self.doc.take_changes()
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks
    }

    pub fn progress(&self) -> ProgressState {
        self.scheduler.progress()
    }

    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// Drain one task. `None` once the queue is empty or cancelled.
    pub async fn drain_next(&mut self) -> Option<TaskOutcome> {
        let outcome = self.scheduler.drain_next(&mut self.doc).await?;
        self.outcomes.push(outcome.clone());
        Some(outcome)
    }

    /// Drain everything.
    pub async fn drain(&mut self) {
        while self.drain_next().await.is_some() {}
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.scheduler.cancellation_token()
    }

    /// Tear the session down. Outstanding work is discarded; slots stay as
    /// placeholders.
    pub fn cancel(&mut self) {
        info!("Render session cancelled");
        self.scheduler.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.scheduler.is_cancelled()
    }

    /// Stop draining and put a timeout notice in every pending slot.
    pub fn force_complete(&mut self) {
        self.scheduler.cancel();
        let kinds = &self.kinds;
        let filled = self.doc.fill_pending(|task| {
            timed_out_markup(kinds.get(&task).copied().unwrap_or(ContentKind::Diagram))
        });
        if filled > 0 {
            self.timed_out = true;
        }
    }

    /// Re-sanitize the finished document and assemble the output.
    pub fn finish(self) -> RenderOutput {
        let html = sanitize::sanitize(&self.doc.to_html());
        let mut stats = RenderStats::tally(&self.outcomes);
        stats.total_tasks = self.total_tasks;
        stats.prepare_duration_ms = self.prepare_duration_ms;
        stats.total_duration_ms = self.started.elapsed().as_millis() as u64;

        info!(
            "Render complete: {}/{} rendered, {} failed, {} cache hit(s), {}ms",
            stats.rendered, stats.total_tasks, stats.failed, stats.cache_hits, stats.total_duration_ms
        );

        RenderOutput {
            html,
            stats,
            outcomes: self.outcomes,
            timed_out: self.timed_out,
        }
    }
}
