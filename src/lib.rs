//! # docrender
//!
//! Render Markdown documents to HTML, rasterising the expensive parts
//! (diagrams, large HTML blocks, SVG images) asynchronously and caching the
//! resulting images by content fingerprint.
//!
//! ## Why this crate?
//!
//! A preview that waits for every diagram to render before showing anything
//! feels broken on long documents. Here the document is shown immediately
//! with lightweight placeholders, and each placeholder is swapped for its
//! image as soon as that image exists. A failing diagram turns into a
//! readable error box in place; it never blanks the rest of the page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Parse      pulldown-cmark event tree (tables, footnotes, math …)
//!  ├─ 2. Extract    diagrams + significant HTML blocks → placeholders + tasks
//!  ├─ 3. Stringify  tree → HTML
//!  ├─ 4. Scan       <img src="….svg"> → placeholders + retrievals
//!  ├─ 5. Sanitize   strip scripts, handlers, unsafe URLs   ◀── first paint
//!  ├─ 6. Drain      one task at a time, document order, cache first
//!  └─ 7. Finish     re-sanitize, stats, per-task outcomes
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docrender::{AdapterSet, CommandRasterizer, ContentKind, ImageCache, RenderConfig, Renderer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RenderConfig::default();
//!     let cache = Arc::new(ImageCache::in_memory(config.max_cache_items));
//!     let mermaid = CommandRasterizer::new("mmdc-png", ["--stdout"]);
//!     let adapters = AdapterSet::new(cache).with_backend(ContentKind::Diagram, Arc::new(mermaid));
//!
//!     let renderer = Renderer::new(config, adapters);
//!     let output = renderer.render_file("README.md").await?;
//!     println!("{}", output.html);
//!     eprintln!("{} rendered, {} failed, {} from cache",
//!         output.stats.rendered, output.stats.failed, output.stats.cache_hits);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docrender` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docrender = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod kind;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod raster;
pub mod render;
pub mod scheduler;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheStats, DiskStore, ImageCache, MemoryStore};
pub use config::{RenderConfig, RenderConfigBuilder};
pub use document::{LiveDocument, ScrollAnchor, SlotChange};
pub use error::{CacheError, PipelineError, TaskError};
pub use kind::ContentKind;
pub use output::{RenderOutput, RenderStats, TaskOutcome};
pub use pipeline::fetch::{DefaultFetcher, ResourceFetcher, ResourceRef};
pub use progress::{NoopProgressCallback, ProgressCallback, ProgressState, RenderProgressCallback};
pub use raster::{AdapterSet, BackendImage, CommandRasterizer, RasterImage, Rasterizer};
pub use render::{RenderSession, Renderer};
pub use scheduler::{CancellationToken, TaskId, TaskStatus};
pub use stream::{render_stream, TaskStream};
