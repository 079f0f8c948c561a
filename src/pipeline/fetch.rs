//! Resource references: resolve an image `src` and retrieve its bytes.
//!
//! Vector images usually arrive by reference (`![chart](figures/q3.svg)`,
//! `<img src="https://…/logo.svg">`) and have to be retrieved before the SVG
//! backend can rasterise them. Resolution is synchronous and decides the
//! task's initial state: inline SVG is `ready` at once, an unsupported scheme
//! or non-SVG `data:` URI is an `error` at once, everything else is
//! `fetching` until the [`ResourceFetcher`] answers.

use crate::error::TaskError;
use crate::fingerprint::fingerprint;
use crate::pipeline::sanitize::decode_entities;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const SVG_MIME: &str = "image/svg+xml";

/// A resolved image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    /// `http://` or `https://` URL.
    Remote(Url),
    /// Filesystem path, already joined to the base directory.
    Local(PathBuf),
    /// SVG text carried in a `data:` URI.
    Inline(String),
}

impl ResourceRef {
    /// Identity used to de-duplicate references to the same resource.
    pub fn dedup_key(&self) -> String {
        match self {
            ResourceRef::Remote(url) => url.as_str().to_string(),
            ResourceRef::Local(path) => format!("file:{}", path.display()),
            ResourceRef::Inline(svg) => format!("inline:{}", fingerprint(svg)),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ResourceRef::Inline(_))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Remote(url) => write!(f, "{url}"),
            ResourceRef::Local(path) => write!(f, "{}", path.display()),
            ResourceRef::Inline(svg) => write!(f, "inline SVG ({} bytes)", svg.len()),
        }
    }
}

/// Whether `src` points at a vector image.
///
/// True for paths ending in `.svg` (ignoring query and fragment, any case)
/// and for `data:image/svg+xml` URIs.
pub fn is_vector_reference(src: &str) -> bool {
    let src = src.trim();
    if has_prefix_ignore_case(src, "data:") {
        return has_prefix_ignore_case(&src[5..], SVG_MIME);
    }
    let path = src.split(['?', '#']).next().unwrap_or("");
    let bytes = path.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].eq_ignore_ascii_case(b".svg")
}

/// Resolve an image `src` attribute value.
pub fn resolve_reference(src: &str, base_dir: Option<&Path>) -> Result<ResourceRef, TaskError> {
    let src = decode_entities(src.trim());
    let unsupported = |detail: &str| TaskError::UnsupportedResource {
        reference: src.clone(),
        detail: detail.to_string(),
    };

    if has_prefix_ignore_case(&src, "data:") {
        return resolve_data_uri(&src).map_err(|detail| unsupported(&detail));
    }

    // Protocol-relative: //cdn.example.org/a.svg
    let absolute = if src.starts_with("//") {
        format!("https:{src}")
    } else {
        src.clone()
    };

    match Url::parse(&absolute) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(ResourceRef::Remote(url)),
            "file" => url
                .to_file_path()
                .map(ResourceRef::Local)
                .map_err(|_| unsupported("file URL does not name a local path")),
            // `C:\figures\a.svg` parses as scheme `c`.
            s if s.len() == 1 => Ok(ResourceRef::Local(join_base(&src, base_dir))),
            s => Err(unsupported(&format!("scheme '{s}' is not supported"))),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = src.split(['?', '#']).next().unwrap_or("");
            if path.is_empty() {
                return Err(unsupported("empty path"));
            }
            let decoded = percent_decode_str(path).decode_utf8_lossy();
            Ok(ResourceRef::Local(join_base(&decoded, base_dir)))
        }
        Err(e) => Err(unsupported(&e.to_string())),
    }
}

fn join_base(path: &str, base_dir: Option<&Path>) -> PathBuf {
    let p = PathBuf::from(path);
    match base_dir {
        Some(base) if p.is_relative() => base.join(p),
        _ => p,
    }
}

/// `data:[<mime>][;base64],<payload>` → inline SVG text.
fn resolve_data_uri(src: &str) -> Result<ResourceRef, String> {
    let rest = &src[5..];
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "malformed data URI".to_string())?;
    let mut params = meta.split(';');
    let mime = params.next().unwrap_or("").trim().to_ascii_lowercase();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    if mime != SVG_MIME {
        let shown = if mime.is_empty() { "text/plain" } else { &mime };
        return Err(format!("inline '{shown}' data is not a vector image"));
    }

    let text = if is_base64 {
        let bytes = STANDARD
            .decode(payload.trim().as_bytes())
            .map_err(|e| format!("invalid base64 payload: {e}"))?;
        String::from_utf8(bytes).map_err(|_| "SVG payload is not UTF-8".to_string())?
    } else {
        percent_decode_str(payload)
            .decode_utf8()
            .map_err(|_| "SVG payload is not UTF-8".to_string())?
            .into_owned()
    };

    if text.trim().is_empty() {
        return Err("empty SVG payload".into());
    }
    Ok(ResourceRef::Inline(text))
}

fn has_prefix_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Out-of-band retrieval collaborator. May fail; failures become inline
/// error reports.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Retrieve the resource as text (SVG is XML).
    async fn fetch(&self, resource: &ResourceRef) -> Result<String, TaskError>;
}

/// `reqwest` for remote URLs, `tokio::fs` for local paths.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> Self {
        // Builder only fails when the TLS backend cannot initialise; fall
        // back to a default client, which surfaces the same problem per
        // request instead of at construction.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    async fn fetch_remote(&self, url: &Url) -> Result<String, TaskError> {
        info!("Fetching {}", url);
        let failed = |reason: String| TaskError::FetchFailed {
            reference: url.to_string(),
            reason,
        };

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                TaskError::FetchTimeout {
                    reference: url.to_string(),
                    secs: self.timeout.as_secs(),
                }
            } else {
                failed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        response.text().await.map_err(|e| failed(e.to_string()))
    }

    async fn fetch_local(&self, path: &Path) -> Result<String, TaskError> {
        debug!("Reading {}", path.display());
        tokio::fs::read_to_string(path).await.map_err(|e| {
            let reason = match e.kind() {
                std::io::ErrorKind::NotFound => "file not found".to_string(),
                std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
                _ => e.to_string(),
            };
            TaskError::FetchFailed {
                reference: path.display().to_string(),
                reason,
            }
        })
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ResourceFetcher for DefaultFetcher {
    async fn fetch(&self, resource: &ResourceRef) -> Result<String, TaskError> {
        match resource {
            ResourceRef::Remote(url) => self.fetch_remote(url).await,
            ResourceRef::Local(path) => self.fetch_local(path).await,
            ResourceRef::Inline(svg) => Ok(svg.clone()),
        }
    }
}
