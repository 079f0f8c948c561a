//! Markup the core itself produces: placeholders, images, error reports.
//!
//! Everything here is deliberately plain HTML with class hooks so a host can
//! restyle it. Every piece of text taken from the document or from a backend
//! is escaped before it lands in an attribute or element body.

use crate::error::PipelineError;
use crate::kind::ContentKind;
use crate::raster::RasterImage;
use crate::scheduler::TaskId;
use tracing::debug;

/// Class carried by every placeholder element.
pub const PLACEHOLDER_CLASS: &str = "docrender-placeholder";

/// Stand-in element for deferred content.
///
/// The exact shape matters: [`crate::document::LiveDocument`] locates slots by
/// matching this markup, and the sanitizer passes it through untouched.
pub fn placeholder_markup(id: TaskId) -> String {
    format!(
        r#"<div class="{}" data-task-id="{}"></div>"#,
        PLACEHOLDER_CLASS, id.0
    )
}

/// Phrasing-content variant of [`placeholder_markup`], for slots inside a
/// paragraph where a `<div>` would break the surrounding block.
pub fn inline_placeholder_markup(id: TaskId) -> String {
    format!(
        r#"<span class="{}" data-task-id="{}"></span>"#,
        PLACEHOLDER_CLASS, id.0
    )
}

/// Image element displayed at `scale` × the backend's native size.
pub fn image_markup(kind: ContentKind, image: &RasterImage, scale: f32, alt: &str) -> String {
    let (w, h) = image.display_size(scale);
    let uri = image.to_data_uri();
    debug!(
        "Encoded {} image {}x{} → {}x{} ({} bytes data URI)",
        kind,
        image.width,
        image.height,
        w,
        h,
        uri.len()
    );
    format!(
        r#"<img class="docrender-image docrender-{}" src="{}" width="{}" height="{}" alt="{}">"#,
        kind.as_str(),
        uri,
        w,
        h,
        html_escape(alt)
    )
}

/// Inline, red-bordered error report for one failed task.
///
/// Shows the kind, the diagnostic, and up to `source_limit` characters of the
/// original source so the author can find the problem.
pub fn error_markup(kind: ContentKind, message: &str, source: &str, source_limit: usize) -> String {
    let (shown, truncated) = truncate_chars(source, source_limit);
    let mut out = String::with_capacity(shown.len() + message.len() + 256);
    out.push_str(&format!(
        r#"<div class="docrender-error docrender-{}" style="border: 2px solid #d32f2f; border-radius: 4px; padding: 8px; margin: 8px 0; color: #b71c1c;">"#,
        kind.as_str()
    ));
    out.push_str(&format!(
        "<strong>{} error</strong><p>{}</p>",
        html_escape(kind.label()),
        html_escape(message)
    ));
    if !shown.is_empty() {
        out.push_str("<pre><code>");
        out.push_str(&html_escape(shown));
        if truncated {
            out.push_str("\n… (truncated)");
        }
        out.push_str("</code></pre>");
    }
    out.push_str("</div>");
    out
}

/// Notice left behind where an active-content element was removed.
pub fn blocked_markup(tag: &str) -> String {
    format!(
        r#"<div class="docrender-blocked">Blocked &lt;{}&gt; element</div>"#,
        html_escape(tag)
    )
}

/// Notice for slots the export fallback gave up on.
pub fn timed_out_markup(kind: ContentKind) -> String {
    format!(
        r#"<div class="docrender-timeout docrender-{}">{} still rendering; timed out</div>"#,
        kind.as_str(),
        html_escape(kind.label())
    )
}

/// Full-document error page. Replaces the entire rendering area.
pub fn error_page(error: &PipelineError) -> String {
    format!(
        r#"<div class="docrender-fatal" style="border: 2px solid #d32f2f; padding: 16px; color: #b71c1c;"><h2>Document could not be rendered</h2><pre>{}</pre></div>"#,
        html_escape(&error.to_string())
    )
}

/// Escape text for use in element bodies and double-quoted attributes.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn truncate_chars(s: &str, limit: usize) -> (&str, bool) {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
