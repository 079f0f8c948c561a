//! Document representations.
//!
//! * [`DocumentTree`] is the parsed form: a flat CommonMark event list from
//!   `pulldown-cmark`, owned (`'static`) so extraction can splice it freely.
//! * [`LiveDocument`] is the displayed form: the stringified, sanitized
//!   markup cut into an arena of static segments and placeholder slots.

pub mod live;

pub use live::{LiveDocument, ScrollAnchor, Segment, SlotChange};

use pulldown_cmark::{html, CowStr, Event, Options, Parser};
use std::ops::Range;

/// Parser extensions enabled for every document.
pub fn parser_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_MATH
}

/// A parsed document as an owned event list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentTree {
    events: Vec<Event<'static>>,
}

impl DocumentTree {
    pub fn parse(source: &str) -> Self {
        let events = Parser::new_ext(source, parser_options())
            .map(Event::into_static)
            .collect();
        Self { events }
    }

    pub fn events(&self) -> &[Event<'static>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Collapse `range` into a single raw-markup node.
    ///
    /// Callers replacing several ranges must go back to front so earlier
    /// indices stay valid.
    pub fn replace_range(&mut self, range: Range<usize>, markup: String) {
        let node = Event::Html(CowStr::from(markup));
        self.events.splice(range, std::iter::once(node));
    }

    /// Rewrite every raw HTML node (block and inline) with `f`.
    pub fn map_raw_html<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String,
    {
        for event in &mut self.events {
            if let Event::Html(text) | Event::InlineHtml(text) = event {
                *text = CowStr::from(f(text));
            }
        }
    }

    /// Tree → HTML markup.
    pub fn stringify(&self) -> String {
        let mut out = String::with_capacity(self.events.len() * 16);
        html::push_html(&mut out, self.events.iter().cloned());
        out
    }
}
