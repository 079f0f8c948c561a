//! Markup sanitizer.
//!
//! Runs on the stringified document before it is injected, and once more on
//! the finished document after every slot has been filled.
//!
//! ## Passes
//!
//! 1. Active-content elements (`script`, `iframe`, `object`, `embed`,
//!    `audio`, `video`) are removed together with their content and replaced
//!    by a visible notice, so a reader can tell something was there.
//! 2. Every remaining start tag is rebuilt attribute by attribute:
//!    event handlers (`on…`) are dropped, URL-bearing attributes must pass the
//!    scheme allow-list, each `srcset` candidate is checked on its own, and
//!    `style` values that can execute script are dropped.
//!
//! Rebuilt tags are canonical (`name="value"`, double-quoted), so markup the
//! crate generated itself passes through byte-for-byte.

use crate::pipeline::encode::blocked_markup;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

/// Elements removed outright, with their content.
pub const BLOCKED_ELEMENTS: &[&str] = &["script", "iframe", "object", "embed", "audio", "video"];

/// Attributes whose value is a URL.
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "action",
    "formaction",
    "xlink:href",
    "poster",
    "background",
    "cite",
    "longdesc",
    "data",
];

/// Schemes a URL attribute may use. Relative URLs have no scheme and pass.
const ALLOWED_SCHEMES: &[&str] = &[
    "http",
    "https",
    "mailto",
    "tel",
    "file",
    "chrome-extension",
    "moz-extension",
];

// ── Pass 1: active content ───────────────────────────────────────────────────

/// Per element: a paired form (`<x …>…</x>`) and a lone-tag form.
static RE_BLOCKED: Lazy<Vec<(&'static str, Regex, Regex)>> = Lazy::new(|| {
    BLOCKED_ELEMENTS
        .iter()
        .map(|tag| {
            let paired = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap();
            let lone = Regex::new(&format!(r"(?i)</?{tag}\b[^>]*>")).unwrap();
            (*tag, paired, lone)
        })
        .collect()
});

fn remove_active_content(html: &str, blocked: &mut usize) -> String {
    let mut out = html.to_string();
    for (tag, paired, lone) in RE_BLOCKED.iter() {
        let lower = out.to_ascii_lowercase();
        if !lower.contains(&format!("<{tag}")) && !lower.contains(&format!("</{tag}")) {
            continue;
        }
        let after_pairs = paired
            .replace_all(&out, |_: &Captures<'_>| {
                *blocked += 1;
                blocked_markup(tag)
            })
            .into_owned();
        out = lone
            .replace_all(&after_pairs, |caps: &Captures<'_>| {
                if caps[0].starts_with("</") {
                    String::new()
                } else {
                    *blocked += 1;
                    blocked_markup(tag)
                }
            })
            .into_owned();
    }
    out
}

// ── Pass 2: attributes ───────────────────────────────────────────────────────

/// A start tag; quoted values may contain `>`.
static RE_START_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([a-zA-Z][a-zA-Z0-9:-]*)((?:"[^"]*"|'[^']*'|[^'">])*)>"#).unwrap()
});

static RE_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#).unwrap()
});

fn rebuild_tags<F>(html: &str, removed: &mut usize, clean: F) -> String
where
    F: Fn(&str, Option<&str>) -> Option<Option<String>>,
{
    RE_START_TAG
        .replace_all(html, |caps: &Captures<'_>| {
            let name = &caps[1];
            let interior = &caps[2];
            let self_closing = interior.trim_end().ends_with('/');

            let mut tag = String::with_capacity(caps[0].len());
            tag.push('<');
            tag.push_str(name);
            for attr in RE_ATTRIBUTE.captures_iter(interior) {
                let attr_name = &attr[1];
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .or_else(|| attr.get(4))
                    .map(|m| m.as_str());
                match clean(attr_name, value) {
                    Some(kept) => {
                        tag.push(' ');
                        tag.push_str(attr_name);
                        if let Some(v) = kept {
                            tag.push_str("=\"");
                            tag.push_str(&v.replace('"', "&quot;"));
                            tag.push('"');
                        }
                    }
                    None => *removed += 1,
                }
            }
            if self_closing {
                tag.push_str(" /");
            }
            tag.push('>');
            tag
        })
        .into_owned()
}

/// `None` drops the attribute; `Some(value)` keeps it with that value.
fn clean_attribute(name: &str, value: Option<&str>) -> Option<Option<String>> {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("on") {
        return None;
    }
    let Some(value) = value else {
        return Some(None);
    };
    if URL_ATTRIBUTES.contains(&lower.as_str()) {
        return is_safe_url(value).then(|| Some(value.to_string()));
    }
    match lower.as_str() {
        "srcset" => clean_srcset(value).map(Some),
        "style" => {
            let squashed: String = decode_entities(value)
                .chars()
                .filter(|c| !c.is_whitespace() && !c.is_control())
                .collect::<String>()
                .to_ascii_lowercase();
            let unsafe_style = squashed.contains("expression(")
                || squashed.contains("javascript:")
                || squashed.contains("vbscript:");
            (!unsafe_style).then(|| Some(value.to_string()))
        }
        _ => Some(Some(value.to_string())),
    }
}

/// Markers owned by generated placeholders.
const RESERVED_ATTRIBUTE: &str = "data-task-id";
const RESERVED_CLASS_PREFIX: &str = "docrender-";

fn clean_reserved(name: &str, value: Option<&str>) -> Option<Option<String>> {
    let lower = name.to_ascii_lowercase();
    if lower == RESERVED_ATTRIBUTE {
        return None;
    }
    let Some(value) = value else {
        return Some(None);
    };
    if lower != "class" {
        return Some(Some(value.to_string()));
    }
    let kept: Vec<&str> = value
        .split_ascii_whitespace()
        .filter(|token| !token.to_ascii_lowercase().starts_with(RESERVED_CLASS_PREFIX))
        .collect();
    (!kept.is_empty()).then(|| Some(kept.join(" ")))
}

/// Remove placeholder markers from author-written markup.
///
/// Must run on raw HTML nodes before extraction inserts the real
/// placeholders; otherwise a hand-typed slot would bind to a task.
pub fn strip_reserved_markers(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    if !lower.contains(RESERVED_ATTRIBUTE) && !lower.contains(RESERVED_CLASS_PREFIX) {
        return html.to_string();
    }
    let mut removed = 0;
    let out = rebuild_tags(html, &mut removed, clean_reserved);
    if removed > 0 {
        debug!("Stripped {} reserved placeholder attribute(s) from author markup", removed);
    }
    out
}

/// Scheme allow-list check for one URL.
///
/// Entities are decoded and whitespace/control characters removed before
/// the scheme is read, so `jav&#x09;ascript:` and ` javascript:` are caught.
pub fn is_safe_url(raw: &str) -> bool {
    let url: String = decode_entities(raw)
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    let lower = url.to_ascii_lowercase();

    let scheme_end = lower.find([':', '/', '?', '#']);
    let scheme = match scheme_end {
        Some(i) if lower.as_bytes()[i] == b':' => &lower[..i],
        _ => return true,
    };

    if scheme == "data" {
        return lower[5..].starts_with("image/");
    }
    ALLOWED_SCHEMES.contains(&scheme)
}

/// Keep the `srcset` candidates whose URL is safe; `None` if none remain.
fn clean_srcset(value: &str) -> Option<String> {
    let kept: Vec<String> = srcset_candidates(value)
        .into_iter()
        .filter(|(url, _)| is_safe_url(url))
        .map(|(url, descriptor)| {
            if descriptor.is_empty() {
                url.to_string()
            } else {
                format!("{url} {descriptor}")
            }
        })
        .collect();
    (!kept.is_empty()).then(|| kept.join(", "))
}

/// Split a `srcset` value into `(url, descriptor)` pairs.
///
/// A URL runs to the next whitespace (so `data:` URLs keep their commas);
/// a descriptor runs to the next comma.
fn srcset_candidates(value: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut rest = value;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let url_end = rest.find(|c: char| c.is_ascii_whitespace()).unwrap_or(rest.len());
        let url = &rest[..url_end];
        rest = &rest[url_end..];
        if url.ends_with(',') {
            out.push((url.trim_end_matches(','), ""));
            continue;
        }
        let desc_end = rest.find(',').unwrap_or(rest.len());
        out.push((url, rest[..desc_end].trim()));
        rest = &rest[desc_end..];
    }
    out
}

// ── Entities ─────────────────────────────────────────────────────────────────

static RE_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);?").unwrap());

/// Decode character references, including numeric ones without `;`.
pub(crate) fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    RE_ENTITY
        .replace_all(s, |caps: &Captures<'_>| {
            let body = &caps[1];
            let decoded = if let Some(num) = body.strip_prefix('#') {
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                code.and_then(char::from_u32)
            } else {
                match body.to_ascii_lowercase().as_str() {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "colon" => Some(':'),
                    "tab" => Some('\t'),
                    "newline" => Some('\n'),
                    "nbsp" => Some('\u{a0}'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Collapse runs of whitespace; used to decide whether markup is empty.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r#"</?[a-zA-Z][^>]*>"#).unwrap());

/// Markup with nothing to show: no text once tags, comments and whitespace
/// are gone, and no image or vector graphic either.
pub fn is_blank_markup(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    if lower.contains("<img") || lower.contains("<svg") {
        return false;
    }
    let no_comments = RE_COMMENT.replace_all(html, "");
    let text = RE_ANY_TAG.replace_all(&no_comments, " ");
    collapse_whitespace(&text).is_empty()
}

/// Sanitize a markup string.
pub fn sanitize(html: &str) -> String {
    let mut blocked = 0;
    let mut removed = 0;
    let out = remove_active_content(html, &mut blocked);
    let out = rebuild_tags(&out, &mut removed, clean_attribute);
    if blocked > 0 || removed > 0 {
        debug!(
            "Sanitizer blocked {} element(s), removed {} attribute(s)",
            blocked, removed
        );
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────
