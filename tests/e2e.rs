//! End-to-end tests for docrender.
//!
//! These drive the public API only, with in-process rasterisers that emit
//! real PNG bytes and an in-process resource fetcher, so they need no
//! external tools or network access.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use docrender::{
    render_stream, AdapterSet, BackendImage, ContentKind, ImageCache, PipelineError,
    RenderConfig, RenderProgressCallback, Renderer, ResourceFetcher, ResourceRef, TaskError,
    TaskId,
};
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn png(width: u32, height: u32) -> BackendImage {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([20, 20, 20, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    BackendImage {
        base64: STANDARD.encode(&buf),
        width,
        height,
    }
}

/// Rasteriser that fails on sources containing `FAIL`, stalls on `SLOW`,
/// and otherwise returns a 400×200 PNG.
#[derive(Default)]
struct FakeRasterizer {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl docrender::Rasterizer for FakeRasterizer {
    async fn render(&self, content: &str) -> Result<BackendImage, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(content.to_string());
        if content.contains("FAIL") {
            return Err("Parse error on line 2: unexpected token".into());
        }
        if content.contains("SLOW") {
            tokio::time::sleep(Duration::from_secs(20)).await;
        }
        Ok(png(400, 200))
    }
}

/// Fetcher serving SVG text from memory. `missing` references fail and
/// `late` ones take 150ms.
#[derive(Default)]
struct FakeFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl ResourceFetcher for FakeFetcher {
    async fn fetch(&self, resource: &ResourceRef) -> Result<String, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = resource.to_string();
        if name.contains("missing") {
            return Err(TaskError::FetchFailed {
                reference: name,
                reason: "HTTP 404".into(),
            });
        }
        if name.contains("late") {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        Ok(format!("<svg xmlns=\"http://www.w3.org/2000/svg\"><!-- {name} --></svg>"))
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
    fn on_task_complete(&self, id: TaskId, _kind: ContentKind, completed: usize, total: usize) {
        self.events.lock().push(format!("ok {id} {completed}/{total}"));
    }
    fn on_task_error(&self, id: TaskId, _: ContentKind, completed: usize, total: usize, _: &str) {
        self.events.lock().push(format!("err {id} {completed}/{total}"));
    }
    fn on_render_complete(&self, total: usize, failed: usize) {
        self.events.lock().push(format!("done {total} {failed}"));
    }
}

struct Fixture {
    renderer: Renderer,
    raster: Arc<FakeRasterizer>,
    fetcher: Arc<FakeFetcher>,
}

fn fixture(config: RenderConfig) -> Fixture {
    let raster = Arc::new(FakeRasterizer::default());
    let fetcher = Arc::new(FakeFetcher::default());
    let adapters = AdapterSet::new(Arc::new(ImageCache::in_memory(config.max_cache_items)))
        .with_backend(ContentKind::Diagram, raster.clone())
        .with_backend(ContentKind::HtmlBlock, raster.clone())
        .with_backend(ContentKind::VectorImage, raster.clone());
    let renderer = Renderer::new(config, adapters).with_fetcher(fetcher.clone());
    Fixture {
        renderer,
        raster,
        fetcher,
    }
}

fn fast_config() -> RenderConfig {
    RenderConfig::builder()
        .poll_interval_ms(5)
        .build()
        .expect("valid config")
}

fn big_table() -> String {
    let rows: String = (0..6)
        .map(|i| format!("<tr><td>row {i}</td><td>value {i}</td></tr>\n"))
        .collect();
    format!("<table class=\"data\">\n{rows}</table>\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn diagram_and_html_block_become_images() {
    let f = fixture(fast_config());
    let source = format!(
        "# Report\n\n```mermaid\ngraph TD; A-->B\n```\n\nSome text.\n\n{}\nThe end.\n",
        big_table()
    );
    let output = f.renderer.render(&source).await.unwrap();

    assert_eq!(output.stats.total_tasks, 2);
    assert_eq!(output.stats.rendered, 2);
    assert_eq!(output.stats.failed, 0);
    assert!(!output.html.contains("docrender-placeholder"));
    assert_eq!(output.html.matches("<img").count(), 2);
    // 400×200 at the default 0.25 display scale.
    assert!(output.html.contains("width=\"100\" height=\"50\""));
    assert!(output.html.contains("<h1>Report</h1>"));
    assert!(output.html.contains("<p>The end.</p>"));
    assert!(!output.timed_out);
}

#[tokio::test]
async fn re_render_is_served_from_cache() {
    let f = fixture(fast_config());
    let source = "```mermaid\nsequenceDiagram\n  A->>B: hi\n```\n";

    let first = f.renderer.render(source).await.unwrap();
    let second = f.renderer.render(source).await.unwrap();

    assert_eq!(f.raster.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.stats.cache_hits, 1);
    assert!(second.outcomes[0].cached);
    assert_eq!(first.html, second.html);
    assert_eq!(f.renderer.cache().stats().item_count, 1);
}

#[tokio::test]
async fn one_failure_does_not_affect_the_others() {
    let recorder = Arc::new(Recorder::default());
    let config = RenderConfig::builder()
        .poll_interval_ms(5)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let f = fixture(config);
    let source = "```mermaid\ngraph A\n```\n\n```mermaid\nFAIL here\n```\n\n```mermaid\ngraph C\n```\n";

    let output = f.renderer.render(source).await.unwrap();

    assert_eq!(output.stats.rendered, 2);
    assert_eq!(output.stats.failed, 1);
    assert_eq!(output.html.matches("<img").count(), 2);
    assert!(output.html.contains("docrender-error"));
    assert!(output.html.contains("Parse error on line 2"));
    assert!(output.html.contains("FAIL here"));
    assert!(matches!(
        output.outcomes[1].error,
        Some(TaskError::RenderFailed { .. })
    ));
    assert_eq!(
        *recorder.events.lock(),
        vec![
            "start 3",
            "ok docrender-task-1 1/3",
            "err docrender-task-2 2/3",
            "ok docrender-task-3 3/3",
            "done 3 1",
        ]
    );
}

#[tokio::test]
async fn ready_tasks_drain_before_slow_fetches() {
    let f = fixture(fast_config());
    let source = "![late](late.svg)\n\n![quick](quick.svg)\n\n```mermaid\ngraph LR\n```\n";

    let (initial, stream) = render_stream(&f.renderer, source).await.unwrap();
    assert_eq!(initial.matches("docrender-placeholder").count(), 3);

    let outcomes: Vec<_> = stream.collect().await;
    let ids: Vec<_> = outcomes.iter().map(|o| o.task_id).collect();
    // Diagram (1) is ready at once; quick.svg (3) overtakes late.svg (2).
    assert_eq!(ids, vec![TaskId(1), TaskId(3), TaskId(2)]);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn duplicate_svg_references_fetch_once_and_fill_both() {
    let f = fixture(fast_config());
    let source = "![a](chart.svg) and again ![b](chart.svg)\n";
    let output = f.renderer.render(source).await.unwrap();

    assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.stats.total_tasks, 1);
    assert_eq!(output.html.matches("<img").count(), 2);
    assert!(!output.html.contains("chart.svg"));
}

#[tokio::test]
async fn failed_fetch_is_reported_inline() {
    let f = fixture(fast_config());
    let output = f
        .renderer
        .render("before\n\n![x](missing.svg)\n\nafter\n")
        .await
        .unwrap();
    assert_eq!(output.stats.failed, 1);
    assert!(output.html.contains("HTTP 404"));
    assert!(output.html.contains("<p>before</p>"));
    assert!(output.html.contains("<p>after</p>"));
}

#[tokio::test]
async fn cancelled_session_discards_remaining_work() {
    let f = fixture(fast_config());
    let source = "```mermaid\ngraph 1\n```\n\n```mermaid\ngraph 2\n```\n\n```mermaid\ngraph 3\n```\n";
    let mut session = f.renderer.prepare(source).await.unwrap();

    assert!(session.drain_next().await.is_some());
    session.cancel();
    assert!(session.drain_next().await.is_none());

    let output = session.finish();
    assert_eq!(f.raster.calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.stats.rendered, 1);
    assert_eq!(output.html.matches("docrender-placeholder").count(), 2);
}

#[tokio::test]
async fn export_gives_up_at_the_ceiling() {
    let config = RenderConfig::builder()
        .poll_interval_ms(5)
        .fallback_timeout_secs(1)
        .build()
        .unwrap();
    let f = fixture(config);
    let source = "```mermaid\ngraph fast\n```\n\n```mermaid\nSLOW graph\n```\n";

    let output = f.renderer.render_for_export(source).await.unwrap();

    assert!(output.timed_out);
    assert_eq!(output.stats.rendered, 1);
    assert!(output.html.contains("docrender-timeout"));
    assert!(!output.html.contains("docrender-placeholder"));
}

#[tokio::test]
async fn active_content_is_stripped() {
    let f = fixture(fast_config());
    let source = concat!(
        "<p onclick=\"steal()\">hello</p>\n\n",
        "<script>alert(1)</script>\n\n",
        "[link](javascript:alert(2)) and [ok](https://example.com)\n",
    );
    let output = f.renderer.render(source).await.unwrap();

    assert!(!output.html.contains("onclick"));
    assert!(!output.html.contains("alert(1)"));
    assert!(!output.html.contains("javascript:"));
    assert!(output.html.contains("https://example.com"));
    assert!(output.html.contains("docrender-blocked"));
}

#[tokio::test]
async fn author_typed_placeholder_is_not_a_slot() {
    let f = fixture(fast_config());
    let source = concat!(
        "```mermaid\ngraph TD; A-->B\n```\n\n",
        "<div class=\"docrender-placeholder\" data-task-id=\"0\"></div>\n\n",
        "<div class=\"docrender-placeholder\" data-task-id=\"1\"></div>\n\n",
        "<div class=\"docrender-placeholder\" data-task-id=\"7\"></div>\n",
    );
    let mut session = f.renderer.prepare(source).await.unwrap();
    assert_eq!(session.initial_html().matches("docrender-placeholder").count(), 1);

    session.drain().await;
    let output = session.finish();
    assert_eq!(output.stats.total_tasks, 1);
    assert_eq!(output.stats.rendered, 1);
    assert_eq!(output.html.matches("<img").count(), 1);
    assert!(!output.html.contains("docrender-placeholder"));
    assert!(!output.html.contains("data-task-id"));
}

#[tokio::test]
async fn non_ascii_image_source_renders() {
    let f = fixture(fast_config());
    let output = f
        .renderer
        .render("Text <img src=\"写真\"> more and ![фото](фото.png).\n")
        .await
        .unwrap();
    assert_eq!(output.stats.total_tasks, 0);
    assert!(output.html.contains("写真"));
    assert!(output.html.contains("<p>Text "));
}

#[tokio::test]
async fn render_to_file_resolves_images_next_to_the_input() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("fig.svg"),
        "<svg xmlns=\"http://www.w3.org/2000/svg\"/>",
    )
    .unwrap();
    let input = dir.path().join("doc.md");
    std::fs::write(&input, "# Figures\n\n![figure](fig.svg)\n").unwrap();
    let out = dir.path().join("site/doc.html");

    // Default fetcher: reads the file from disk.
    let raster = Arc::new(FakeRasterizer::default());
    let adapters = AdapterSet::new(Arc::new(ImageCache::in_memory(8)))
        .with_backend(ContentKind::VectorImage, raster.clone());
    let renderer = Renderer::new(fast_config(), adapters);

    let stats = renderer.render_to_file(&input, &out).await.unwrap();
    assert_eq!(stats.total_tasks, 1);
    assert_eq!(stats.rendered, 1);
    assert!(raster.seen.lock()[0].starts_with("<svg"));
    let html = std::fs::read_to_string(&out).unwrap();
    assert!(html.contains("<img class=\"docrender-image docrender-vector-image\""));
}

#[tokio::test]
async fn missing_input_is_a_pipeline_error() {
    let f = fixture(fast_config());
    let err = f.renderer.render_file("/definitely/not/here.md").await.unwrap_err();
    assert!(matches!(err, PipelineError::FileNotFound { .. }));
    let page = docrender::pipeline::encode::error_page(&err);
    assert!(page.contains("Document could not be rendered"));
}

#[test]
fn callbacks_and_renderer_are_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Renderer>();
    assert_send_sync::<docrender::NoopProgressCallback>();
}
