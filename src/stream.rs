//! Streaming render API: emit each slot replacement as it is spliced in.
//!
//! [`Renderer::render`] returns only after every task drained. A host that
//! wants to paint progressively calls [`render_stream`] instead: it gets the
//! placeholder markup immediately and then one [`TaskOutcome`] per task, in
//! drain order. Each outcome's `html` is what replaced the slot(s) carrying
//! its `task_id`.
//!
//! Dropping the stream drops the session, which abandons outstanding work.

use crate::error::PipelineError;
use crate::output::TaskOutcome;
use crate::render::{RenderSession, Renderer};
use futures::stream;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of drained tasks.
pub type TaskStream = Pin<Box<dyn Stream<Item = TaskOutcome> + Send>>;

/// Prepare `source` and return `(initial_html, outcomes)`.
///
/// # Example
/// ```rust,no_run
/// use docrender::{render_stream, AdapterSet, ImageCache, RenderConfig, Renderer};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let renderer = Renderer::new(
///     RenderConfig::default(),
///     AdapterSet::new(Arc::new(ImageCache::in_memory(100))),
/// );
/// let (initial, mut outcomes) = render_stream(&renderer, "# Title").await?;
/// println!("{initial}");
/// while let Some(o) = outcomes.next().await {
///     eprintln!("{} → {} bytes", o.task_id, o.html.len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn render_stream(
    renderer: &Renderer,
    source: &str,
) -> Result<(String, TaskStream), PipelineError> {
    let session = renderer.prepare(source).await?;
    info!("Streaming {} task(s)", session.total_tasks());
    let initial = session.initial_html().to_string();
    Ok((initial, session.into_stream()))
}

impl RenderSession {
    /// Turn the session into a stream of outcomes.
    pub fn into_stream(self) -> TaskStream {
        Box::pin(stream::unfold(self, |mut session| async move {
            let outcome = session.drain_next().await?;
            Some((outcome, session))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ImageCache;
    use crate::config::RenderConfig;
    use crate::kind::ContentKind;
    use crate::raster::adapter::tests::CountingBackend;
    use crate::raster::AdapterSet;
    use crate::scheduler::TaskId;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn streams_outcomes_in_document_order() {
        let adapters = AdapterSet::new(Arc::new(ImageCache::in_memory(8))).with_backend(
            ContentKind::Diagram,
            Arc::new(CountingBackend {
                calls: AtomicUsize::new(0),
            }),
        );
        let config = RenderConfig::builder().poll_interval_ms(5).build().unwrap();
        let renderer = Renderer::new(config, adapters);
        let src = "```mermaid\ngraph A\n```\n\n```mermaid\ngraph B\n```\n";

        let (initial, stream) = render_stream(&renderer, src).await.unwrap();
        assert_eq!(initial.matches("docrender-placeholder").count(), 2);

        let outcomes: Vec<_> = stream.collect().await;
        let ids: Vec<_> = outcomes.iter().map(|o| o.task_id).collect();
        assert_eq!(ids, vec![TaskId(1), TaskId(2)]);
        assert!(outcomes.iter().all(|o| o.html.starts_with("<img")));
    }

    #[tokio::test]
    async fn plain_document_yields_empty_stream() {
        let renderer = Renderer::new(
            RenderConfig::default(),
            AdapterSet::new(Arc::new(ImageCache::in_memory(8))),
        );
        let (initial, stream) = render_stream(&renderer, "just *text*").await.unwrap();
        assert!(initial.contains("<em>text</em>"));
        assert_eq!(stream.count().await, 0);
    }
}
