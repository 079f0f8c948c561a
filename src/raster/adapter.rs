//! Per-kind adapters: cache lookup → backend call → validation → cache fill.
//!
//! An adapter never caches a failure. A backend that times out, errors, or
//! hands back bytes that are not an image leaves the cache untouched, so the
//! next render retries it.

use super::{describe, BackendImage, RasterImage, Rasterizer};
use crate::cache::ImageCache;
use crate::error::TaskError;
use crate::fingerprint::cache_key;
use crate::kind::ContentKind;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default bounded wait for one backend call.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of [`RasterAdapter::render`].
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    pub image: RasterImage,
    /// `true` when served from the cache without calling the backend.
    pub cached: bool,
}

/// One backend bound to one [`ContentKind`], fronted by the shared cache.
#[derive(Clone)]
pub struct RasterAdapter {
    kind: ContentKind,
    backend: Arc<dyn Rasterizer>,
    cache: Arc<ImageCache>,
    timeout: Duration,
}

impl RasterAdapter {
    pub fn new(kind: ContentKind, backend: Arc<dyn Rasterizer>, cache: Arc<ImageCache>) -> Self {
        Self {
            kind,
            backend,
            cache,
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Rasterise `content`, consulting the cache first.
    pub async fn render(&self, content: &str) -> Result<AdapterOutput, TaskError> {
        let key = cache_key(content, self.kind);
        if let Some(image) = self.cache.get(&key) {
            return Ok(AdapterOutput {
                image,
                cached: true,
            });
        }

        let start = Instant::now();
        let answer = tokio::time::timeout(self.timeout, self.backend.render(content))
            .await
            .map_err(|_| TaskError::RenderTimeout {
                kind: self.kind,
                secs: self.timeout.as_secs(),
            })?;
        let backend_image = answer.map_err(|detail| TaskError::RenderFailed {
            kind: self.kind,
            detail,
        })?;
        let image = decode_backend_image(self.kind, backend_image)?;

        debug!(
            "Rasterised {} → {}x{} {} in {:?}",
            describe(self.kind, content),
            image.width,
            image.height,
            image.mime,
            start.elapsed()
        );

        self.cache.put(&key, image.clone(), self.kind);
        Ok(AdapterOutput {
            image,
            cached: false,
        })
    }
}

/// Normalise a backend answer into a validated [`RasterImage`].
///
/// Accepts bare base64 or a full `data:` URI. Rejects empty payloads and bytes
/// that do not sniff as a known image format. When the backend reports a zero
/// dimension the real size is read from the image itself.
pub fn decode_backend_image(
    kind: ContentKind,
    answer: BackendImage,
) -> Result<RasterImage, TaskError> {
    let invalid = |detail: String| TaskError::InvalidOutput { kind, detail };

    let encoded = answer.base64.trim();
    let encoded = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    if encoded.is_empty() {
        return Err(invalid("empty image".into()));
    }

    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| invalid(format!("not base64: {e}")))?;
    if bytes.is_empty() {
        return Err(invalid("empty image".into()));
    }

    let format =
        image::guess_format(&bytes).map_err(|e| invalid(format!("not an image: {e}")))?;

    let (width, height) = if answer.width > 0 && answer.height > 0 {
        (answer.width, answer.height)
    } else {
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| invalid(format!("undecodable image: {e}")))?;
        (decoded.width(), decoded.height())
    };

    Ok(RasterImage {
        bytes,
        width,
        height,
        mime: format.to_mime_type().to_string(),
    })
}

/// Every configured adapter plus the cache they share.
///
/// Kinds without a backend are simply not extracted: the renderer leaves that
/// content as ordinary markup.
#[derive(Clone)]
pub struct AdapterSet {
    cache: Arc<ImageCache>,
    adapters: HashMap<ContentKind, RasterAdapter>,
    timeout: Duration,
}

impl AdapterSet {
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self {
            cache,
            adapters: HashMap::new(),
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    /// Register `backend` for `kind`, replacing any previous one.
    pub fn with_backend(mut self, kind: ContentKind, backend: Arc<dyn Rasterizer>) -> Self {
        let adapter =
            RasterAdapter::new(kind, backend, Arc::clone(&self.cache)).with_timeout(self.timeout);
        self.adapters.insert(kind, adapter);
        self
    }

    /// Bounded wait applied to every adapter, present and future.
    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        for adapter in self.adapters.values_mut() {
            adapter.timeout = timeout;
        }
        self
    }

    pub fn get(&self, kind: ContentKind) -> Option<&RasterAdapter> {
        self.adapters.get(&kind)
    }

    pub fn supports(&self, kind: ContentKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Dispatch to the adapter for `kind`.
    pub async fn render(&self, kind: ContentKind, content: &str) -> Result<AdapterOutput, TaskError> {
        match self.get(kind) {
            Some(adapter) => adapter.render(content).await,
            None => Err(TaskError::NoBackend { kind }),
        }
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.adapters.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("AdapterSet")
            .field("kinds", &kinds)
            .field("timeout", &self.timeout)
            .finish()
    }
}
