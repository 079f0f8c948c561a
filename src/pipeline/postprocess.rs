//! Post-stringification pass: vector images referenced from markup.
//!
//! Image syntax reaches the markup as `<img src=…>`, not as a node the
//! extraction pass inspects, so SVG references are found here with a text
//! scan. Each one becomes a placeholder exactly as in extraction; the
//! retrieval starts immediately on the runtime and flips the task to `ready`
//! or `error` whenever it finishes.
//!
//! References are de-duplicated by resolved resource + kind: the second
//! `<img src="chart.svg">` binds to the first one's task, so the file is
//! fetched and rasterised once and fills both slots.

use crate::config::RenderConfig;
use crate::error::TaskError;
use crate::kind::ContentKind;
use crate::pipeline::encode::inline_placeholder_markup;
use crate::pipeline::fetch::{is_vector_reference, resolve_reference, ResourceFetcher, ResourceRef};
use crate::pipeline::sanitize::decode_entities;
use crate::raster::AdapterSet;
use crate::scheduler::{TaskHandle, TaskId, TaskQueue};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

static RE_IMG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img\b(?:"[^"]*"|'[^']*'|[^'">])*>"#).unwrap());

static RE_SRC_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

/// Counters for one substitution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorScan {
    /// `<img>` elements replaced by a placeholder.
    pub substitutions: usize,
    /// Distinct tasks registered (≤ substitutions).
    pub tasks: usize,
}

/// Replace every vector-image `<img>` in `html` with a placeholder.
///
/// Must run inside a tokio runtime for fetches to start; without one, tasks
/// that need a retrieval are failed immediately.
pub fn substitute_vector_images(
    html: &str,
    queue: &mut TaskQueue,
    fetcher: &Arc<dyn ResourceFetcher>,
    config: &RenderConfig,
    adapters: &AdapterSet,
) -> (String, VectorScan) {
    let mut scan = VectorScan::default();
    if !adapters.supports(ContentKind::VectorImage) {
        return (html.to_string(), scan);
    }

    let kind = ContentKind::VectorImage;
    let mut seen: HashMap<String, TaskId> = HashMap::new();
    let base_dir = config.base_dir.as_deref();

    let out = RE_IMG_TAG.replace_all(html, |caps: &Captures<'_>| {
        let tag = &caps[0];
        let Some(src) = image_source(tag) else {
            return tag.to_string();
        };
        if !is_vector_reference(&decode_entities(&src)) {
            return tag.to_string();
        }

        let resolved = resolve_reference(&src, base_dir);
        let key = match &resolved {
            Ok(r) => format!("{}|{}", kind, r.dedup_key()),
            Err(_) => format!("{}|unresolved:{}", kind, src),
        };

        let id = match seen.get(&key) {
            Some(id) => {
                debug!("{} already queued as {}", src, id);
                *id
            }
            None => {
                let id = match resolved {
                    Ok(ResourceRef::Inline(svg)) => queue.register_ready(kind, svg),
                    Ok(resource) => {
                        let (id, handle) = queue.register_fetching(kind, resource.to_string());
                        start_fetch(resource, handle, Arc::clone(fetcher), config.fetch_timeout());
                        id
                    }
                    Err(e) => {
                        warn!("Cannot resolve image '{}': {}", src, e);
                        queue.register_failed(kind, src.clone(), e)
                    }
                };
                seen.insert(key, id);
                scan.tasks += 1;
                id
            }
        };
        scan.substitutions += 1;
        inline_placeholder_markup(id)
    });

    (out.into_owned(), scan)
}

fn image_source(tag: &str) -> Option<String> {
    let caps = RE_SRC_ATTR.captures(tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_string())
}

/// Run the retrieval on the current runtime, resolving `handle` when done.
fn start_fetch(
    resource: ResourceRef,
    handle: TaskHandle,
    fetcher: Arc<dyn ResourceFetcher>,
    timeout: Duration,
) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        handle.fail(TaskError::FetchFailed {
            reference: resource.to_string(),
            reason: "no async runtime to run the retrieval on".into(),
        });
        return;
    };

    runtime.spawn(async move {
        debug!("Retrieving {} for {}", resource, handle.id());
        match tokio::time::timeout(timeout, fetcher.fetch(&resource)).await {
            Ok(Ok(text)) => handle.resolve(text),
            Ok(Err(e)) => handle.fail(e),
            Err(_) => handle.fail(TaskError::FetchTimeout {
                reference: resource.to_string(),
                secs: timeout.as_secs(),
            }),
        }
    });
}
