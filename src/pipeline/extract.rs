//! Extraction pass: pull expensive content out of the tree.
//!
//! One traversal, document order. A fenced code block tagged with a diagram
//! language, or a raw HTML block rooted at `<div>`, `<table>` or `<svg>` that
//! is long enough to be worth rasterising, is collapsed into a placeholder and
//! registered as a `ready` task. Kinds without a configured backend are left
//! alone so they still display as ordinary markup.

use crate::config::RenderConfig;
use crate::document::DocumentTree;
use crate::kind::ContentKind;
use crate::pipeline::encode::placeholder_markup;
use crate::pipeline::sanitize::{is_blank_markup, sanitize};
use crate::raster::AdapterSet;
use crate::scheduler::{TaskId, TaskQueue};
use pulldown_cmark::{CodeBlockKind, Event, Tag, TagEnd};
use std::ops::Range;
use tracing::debug;

/// Root elements that make an HTML block structurally significant.
const SIGNIFICANT_ROOTS: &[&str] = &["div", "table", "svg"];

/// What one extraction pass registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub diagrams: usize,
    pub html_blocks: usize,
}

impl ExtractionSummary {
    pub fn total(&self) -> usize {
        self.diagrams + self.html_blocks
    }
}

/// Replace matching nodes in `tree` with placeholders, registering one task
/// per match in `queue`.
pub fn extract(
    tree: &mut DocumentTree,
    queue: &mut TaskQueue,
    config: &RenderConfig,
    adapters: &AdapterSet,
) -> ExtractionSummary {
    let want_diagrams = adapters.supports(ContentKind::Diagram);
    let want_html = adapters.supports(ContentKind::HtmlBlock);
    let mut summary = ExtractionSummary::default();
    let mut matches: Vec<(Range<usize>, TaskId)> = Vec::new();

    let events = tree.events();
    let mut i = 0;
    while i < events.len() {
        match &events[i] {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info)))
                if want_diagrams && config.is_diagram_language(info) =>
            {
                let (end, content) = collect_until(events, i, |e| {
                    matches!(e, Event::End(TagEnd::CodeBlock))
                });
                let id = queue.register_ready(ContentKind::Diagram, content);
                debug!("Extracted diagram → {}", id);
                summary.diagrams += 1;
                matches.push((i..end + 1, id));
                i = end + 1;
            }
            Event::Start(Tag::HtmlBlock) if want_html => {
                let (end, content) = collect_until(events, i, |e| {
                    matches!(e, Event::End(TagEnd::HtmlBlock))
                });
                if is_significant_html(&content, config.html_min_len) {
                    let cleaned = sanitize(&content);
                    if is_blank_markup(&cleaned) {
                        debug!("Skipping HTML block that is blank after sanitizing");
                    } else {
                        let id = queue.register_ready(ContentKind::HtmlBlock, cleaned);
                        debug!("Extracted HTML block ({} bytes) → {}", content.len(), id);
                        summary.html_blocks += 1;
                        matches.push((i..end + 1, id));
                    }
                }
                i = end + 1;
            }
            _ => i += 1,
        }
    }

    // Back to front keeps earlier ranges valid.
    for (range, id) in matches.into_iter().rev() {
        tree.replace_range(range, format!("{}\n", placeholder_markup(id)));
    }
    summary
}

/// Concatenate text from `start + 1` up to the closing event.
///
/// Returns the closing event's index, or the last index if the stream ends
/// first.
fn collect_until(
    events: &[Event<'static>],
    start: usize,
    is_end: impl Fn(&Event<'static>) -> bool,
) -> (usize, String) {
    let mut content = String::new();
    let mut j = start + 1;
    while j < events.len() {
        match &events[j] {
            e if is_end(e) => return (j, content),
            Event::Text(t) | Event::Html(t) | Event::InlineHtml(t) => content.push_str(t),
            _ => {}
        }
        j += 1;
    }
    (events.len().saturating_sub(1), content)
}

/// Whether a raw HTML block is rooted at a significant element and longer
/// than `min_len` once trimmed.
pub fn is_significant_html(content: &str, min_len: usize) -> bool {
    let trimmed = content.trim();
    if trimmed.len() <= min_len {
        return false;
    }
    let lower = trimmed.to_ascii_lowercase();
    SIGNIFICANT_ROOTS.iter().any(|root| {
        lower
            .strip_prefix('<')
            .and_then(|rest| rest.strip_prefix(root))
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
    })
}
