//! The live document: an arena of markup segments and placeholder slots.
//!
//! Injected markup is cut at every placeholder into `Static` segments and
//! `Slot`s. Completing a task replaces its slot(s) in the arena and appends a
//! [`SlotChange`] to a journal; hosts reconcile their own surface (a browser
//! DOM, a terminal buffer, a file) from that journal instead of searching
//! rendered output for ids.
//!
//! Scroll position is kept as a [`ScrollAnchor`] relative to a segment, so a
//! slot growing from an empty placeholder to a 40 KB image above the viewport
//! does not move what the reader is looking at.

use crate::pipeline::encode::{inline_placeholder_markup, placeholder_markup};
use crate::scheduler::TaskId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"<div class="docrender-placeholder" data-task-id="(\d+)"\s*>\s*</div>"#,
        r#"|<span class="docrender-placeholder" data-task-id="(\d+)"\s*>\s*</span>"#,
    ))
    .unwrap()
});

/// One arena cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Markup that never changes after injection.
    Static(String),
    /// Stand-in for a deferred task; `filled` is `None` while pending.
    /// `inline` slots sit inside phrasing content and use a `<span>`.
    Slot {
        task: TaskId,
        inline: bool,
        filled: Option<String>,
    },
}

fn pending_markup(task: TaskId, inline: bool) -> String {
    if inline {
        inline_placeholder_markup(task)
    } else {
        placeholder_markup(task)
    }
}

impl Segment {
    fn markup(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Segment::Static(s) => s.as_str().into(),
            Segment::Slot {
                filled: Some(html), ..
            } => html.as_str().into(),
            Segment::Slot {
                task,
                inline,
                filled: None,
            } => pending_markup(*task, *inline).into(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Segment::Static(s) => s.len(),
            Segment::Slot {
                filled: Some(html), ..
            } => html.len(),
            Segment::Slot {
                task,
                inline,
                filled: None,
            } => pending_markup(*task, *inline).len(),
        }
    }
}

/// One applied replacement, in the order replacements happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChange {
    pub task: TaskId,
    /// Arena index of the replaced slot.
    pub segment: usize,
    /// Byte offset of the slot in the output at the time of the change.
    pub offset: usize,
    /// Length of the placeholder markup that was replaced.
    pub old_len: usize,
    /// Replacement markup.
    pub html: String,
}

/// Position relative to an arena segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollAnchor {
    pub segment: usize,
    pub offset: usize,
}

/// The displayed document.
#[derive(Debug, Clone, Default)]
pub struct LiveDocument {
    segments: Vec<Segment>,
    changes: Vec<SlotChange>,
}

impl LiveDocument {
    /// Cut `html` at every placeholder.
    pub fn from_html(html: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in RE_PLACEHOLDER.captures_iter(html) {
            let inline = caps.get(2).is_some();
            let (Some(whole), Some(id)) = (caps.get(0), caps.get(1).or_else(|| caps.get(2))) else {
                continue;
            };
            let Ok(id) = id.as_str().parse::<u64>() else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Static(html[last..whole.start()].to_string()));
            }
            segments.push(Segment::Slot {
                task: TaskId(id),
                inline,
                filled: None,
            });
            last = whole.end();
        }
        if last < html.len() {
            segments.push(Segment::Static(html[last..].to_string()));
        }
        Self {
            segments,
            changes: Vec::new(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Current markup.
    pub fn to_html(&self) -> String {
        let mut out = String::with_capacity(self.len());
        for seg in &self.segments {
            out.push_str(&seg.markup());
        }
        out
    }

    /// Byte length of [`Self::to_html`].
    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace every pending slot bound to `task` with `html`.
    ///
    /// Returns the number of slots filled. Zero means the placeholder is no
    /// longer attached, and the call changed nothing.
    pub fn replace(&mut self, task: TaskId, html: &str) -> usize {
        let mut offset = 0;
        let mut filled = 0;
        for (index, seg) in self.segments.iter_mut().enumerate() {
            let old_len = seg.len();
            if let Segment::Slot {
                task: t,
                filled: slot @ None,
                ..
            } = seg
            {
                if *t == task {
                    *slot = Some(html.to_string());
                    self.changes.push(SlotChange {
                        task,
                        segment: index,
                        offset,
                        old_len,
                        html: html.to_string(),
                    });
                    filled += 1;
                    offset += html.len();
                    continue;
                }
            }
            offset += old_len;
        }
        filled
    }

    /// Drain the reconciliation journal.
    pub fn take_changes(&mut self) -> Vec<SlotChange> {
        std::mem::take(&mut self.changes)
    }

    /// Whether a pending slot for `task` is still attached.
    pub fn contains(&self, task: TaskId) -> bool {
        self.segments.iter().any(|s| {
            matches!(s, Segment::Slot { task: t, filled: None, .. } if *t == task)
        })
    }

    pub fn pending_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Slot { filled: None, .. }))
            .count()
    }

    /// Distinct tasks that still have a pending slot, in document order.
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        let mut tasks = Vec::new();
        for seg in &self.segments {
            if let Segment::Slot { task, filled: None, .. } = seg {
                if !tasks.contains(task) {
                    tasks.push(*task);
                }
            }
        }
        tasks
    }

    /// Force-complete every pending slot with `markup(task)`.
    pub fn fill_pending(&mut self, mut markup: impl FnMut(TaskId) -> String) -> usize {
        self.pending_tasks()
            .into_iter()
            .map(|task| {
                let html = markup(task);
                self.replace(task, &html)
            })
            .sum()
    }

    /// Remove all slots without filling them. Used when a session is torn down.
    pub fn detach_all(&mut self) {
        for seg in &mut self.segments {
            if let Segment::Slot { filled: None, .. } = seg {
                *seg = Segment::Static(String::new());
            }
        }
    }

    /// Translate a byte offset in the current output into an anchor.
    pub fn anchor_at(&self, offset: usize) -> ScrollAnchor {
        let mut start = 0;
        for (index, seg) in self.segments.iter().enumerate() {
            let len = seg.len();
            if offset < start + len {
                return ScrollAnchor {
                    segment: index,
                    offset: offset - start,
                };
            }
            start += len;
        }
        match self.segments.len() {
            0 => ScrollAnchor {
                segment: 0,
                offset: 0,
            },
            n => ScrollAnchor {
                segment: n - 1,
                offset: self.segments[n - 1].len(),
            },
        }
    }

    /// Byte offset of `anchor` in the current output.
    ///
    /// An anchor inside a slot that has since shrunk is clamped to the slot's
    /// end.
    pub fn resolve_anchor(&self, anchor: &ScrollAnchor) -> usize {
        let before: usize = self
            .segments
            .iter()
            .take(anchor.segment)
            .map(Segment::len)
            .sum();
        let within = self
            .segments
            .get(anchor.segment)
            .map_or(0, |seg| anchor.offset.min(seg.len()));
        before + within
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(ids: &[u64]) -> LiveDocument {
        let mut html = String::from("<p>intro</p>\n");
        for id in ids {
            html.push_str(&placeholder_markup(TaskId(*id)));
            html.push_str("\n<p>between</p>\n");
        }
        LiveDocument::from_html(&html)
    }

    #[test]
    fn round_trips_markup() {
        let html = format!(
            "<p>a</p>{}<p>b</p>{}",
            placeholder_markup(TaskId(1)),
            placeholder_markup(TaskId(2))
        );
        let doc = LiveDocument::from_html(&html);
        assert_eq!(doc.to_html(), html);
        assert_eq!(doc.pending_count(), 2);
        assert_eq!(doc.len(), html.len());
    }

    #[test]
    fn inline_slots_keep_their_span() {
        let html = format!(
            "<p>see {} here</p>{}",
            inline_placeholder_markup(TaskId(4)),
            placeholder_markup(TaskId(5))
        );
        let mut doc = LiveDocument::from_html(&html);
        assert_eq!(doc.pending_count(), 2);
        assert_eq!(doc.to_html(), html);

        assert_eq!(doc.replace(TaskId(4), "<img>"), 1);
        assert_eq!(doc.to_html(), format!("<p>see <img> here</p>{}", placeholder_markup(TaskId(5))));
        let changes = doc.take_changes();
        assert_eq!(changes[0].old_len, inline_placeholder_markup(TaskId(4)).len());
    }

    #[test]
    fn replace_fills_slot_and_journals() {
        let mut doc = doc_with(&[1, 2]);
        assert_eq!(doc.replace(TaskId(2), "<img>"), 1);
        assert_eq!(doc.pending_count(), 1);
        assert!(doc.to_html().contains("<img>"));

        let changes = doc.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].task, TaskId(2));
        assert_eq!(changes[0].old_len, placeholder_markup(TaskId(2)).len());
        assert_eq!(
            &doc.to_html()[changes[0].offset..changes[0].offset + 5],
            "<img>"
        );
        assert!(doc.take_changes().is_empty());
    }

    #[test]
    fn replacing_detached_slot_is_noop() {
        let mut doc = doc_with(&[1]);
        assert_eq!(doc.replace(TaskId(1), "<img>"), 1);
        assert_eq!(doc.replace(TaskId(1), "<b>again</b>"), 0);
        assert_eq!(doc.replace(TaskId(9), "<b>ghost</b>"), 0);
        assert!(!doc.to_html().contains("again"));
    }

    #[test]
    fn one_task_fills_every_bound_slot() {
        let mut doc = doc_with(&[3, 3]);
        assert_eq!(doc.pending_tasks(), vec![TaskId(3)]);
        assert_eq!(doc.replace(TaskId(3), "<img>"), 2);
        assert_eq!(doc.to_html().matches("<img>").count(), 2);
    }

    #[test]
    fn anchor_survives_growth_above_it() {
        let mut doc = doc_with(&[1]);
        let html = doc.to_html();
        let target = html.rfind("between").unwrap();
        let anchor = doc.anchor_at(target);

        doc.replace(TaskId(1), &"x".repeat(5000));
        let moved = doc.resolve_anchor(&anchor);
        assert_eq!(&doc.to_html()[moved..moved + 7], "between");
    }

    #[test]
    fn anchor_past_end_clamps() {
        let doc = doc_with(&[1]);
        let anchor = doc.anchor_at(usize::MAX);
        assert_eq!(doc.resolve_anchor(&anchor), doc.len());
    }

    #[test]
    fn fill_pending_completes_everything() {
        let mut doc = doc_with(&[1, 2, 2]);
        assert_eq!(doc.fill_pending(|t| format!("<i>{}</i>", t.0)), 3);
        assert_eq!(doc.pending_count(), 0);
        assert!(doc.to_html().contains("<i>2</i>"));
    }

    #[test]
    fn detach_all_removes_placeholders() {
        let mut doc = doc_with(&[1, 2]);
        doc.detach_all();
        assert!(!doc.contains(TaskId(1)));
        assert!(!doc.to_html().contains("docrender-placeholder"));
    }
}
