//! Configuration types for document rendering.
//!
//! All rendering behaviour is controlled through [`RenderConfig`], built via
//! its [`RenderConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config between sessions, log it, and diff two runs.
//!
//! Backends and the image cache are *not* configuration: they are injected
//! into [`crate::render::Renderer`] as an [`crate::raster::AdapterSet`] so
//! several renderers can share one cache.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for rendering a document.
///
/// # Example
/// ```rust
/// use docrender::RenderConfig;
///
/// let config = RenderConfig::builder()
///     .display_scale(0.5)
///     .poll_interval_ms(50)
///     .diagram_languages(["mermaid", "plantuml"])
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_interval_ms, 50);
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// Maximum number of cached images. Default: 1000.
    ///
    /// Used by the binary when it constructs the process-wide cache; a cache
    /// built by the caller carries its own capacity.
    pub max_cache_items: usize,

    /// Fraction of the backend's native resolution at which rendered images
    /// are displayed. Range: (0, 1]. Default: 0.25.
    ///
    /// Backends deliberately over-render so the output stays sharp on
    /// high-density screens and in print; a quarter of native size matches
    /// the intended layout size.
    pub display_scale: f32,

    /// Delay between scheduler polls while every remaining task is still
    /// fetching, in milliseconds. Default: 100.
    pub poll_interval_ms: u64,

    /// Hard ceiling for [`crate::render::Renderer::render_for_export`], in
    /// seconds. Default: 120.
    pub fallback_timeout_secs: u64,

    /// Bounded wait for a single backend call, in seconds. Default: 30.
    pub render_timeout_secs: u64,

    /// Bounded wait for a single resource fetch, in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Minimum trimmed length (bytes) for a raw HTML block to be rasterised.
    /// Default: 100.
    ///
    /// Short fragments (`<br>`, a lone `<div></div>`) render fine as markup
    /// and are never worth a round-trip to the HTML backend.
    pub html_min_len: usize,

    /// Fenced-code language tags treated as diagrams (case-insensitive).
    /// Default: `["mermaid"]`.
    pub diagram_languages: Vec<String>,

    /// Directory relative image references are resolved against.
    pub base_dir: Option<PathBuf>,

    /// Characters of original source included in an inline error report.
    /// Default: 1000.
    pub error_source_limit: usize,

    /// Directory for the persistent image cache. None = in-memory only.
    pub cache_dir: Option<PathBuf>,

    /// Optional progress indicator.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_cache_items: 1000,
            display_scale: 0.25,
            poll_interval_ms: 100,
            fallback_timeout_secs: 120,
            render_timeout_secs: 30,
            fetch_timeout_secs: 30,
            html_min_len: 100,
            diagram_languages: vec!["mermaid".to_string()],
            base_dir: None,
            error_source_limit: 1000,
            cache_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("max_cache_items", &self.max_cache_items)
            .field("display_scale", &self.display_scale)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("fallback_timeout_secs", &self.fallback_timeout_secs)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("html_min_len", &self.html_min_len)
            .field("diagram_languages", &self.diagram_languages)
            .field("base_dir", &self.base_dir)
            .field("error_source_limit", &self.error_source_limit)
            .field("cache_dir", &self.cache_dir)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Whether a fenced code block's info string marks a diagram.
    ///
    /// Only the first word counts: ```` ```mermaid {theme=dark} ```` matches.
    pub fn is_diagram_language(&self, info: &str) -> bool {
        let lang = info.split_whitespace().next().unwrap_or("");
        !lang.is_empty()
            && self
                .diagram_languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(lang))
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn max_cache_items(mut self, n: usize) -> Self {
        self.config.max_cache_items = n.max(1);
        self
    }

    pub fn display_scale(mut self, scale: f32) -> Self {
        self.config.display_scale = scale;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(1);
        self
    }

    pub fn fallback_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fallback_timeout_secs = secs;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs.max(1);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn html_min_len(mut self, len: usize) -> Self {
        self.config.html_min_len = len;
        self
    }

    pub fn diagram_languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.diagram_languages = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.base_dir = Some(dir.into());
        self
    }

    pub fn error_source_limit(mut self, chars: usize) -> Self {
        self.config.error_source_limit = chars;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, PipelineError> {
        let c = &self.config;
        if !(c.display_scale > 0.0 && c.display_scale <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "display scale must be in (0, 1], got {}",
                c.display_scale
            )));
        }
        if c.fallback_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "fallback timeout must be ≥ 1s".into(),
            ));
        }
        if c.diagram_languages.iter().any(|l| l.trim().is_empty()) {
            return Err(PipelineError::InvalidConfig(
                "diagram language tags must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
