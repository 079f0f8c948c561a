//! The three categories of expensive content the renderer defers.
//!
//! A kind selects the rasterisation adapter that converts the content and the
//! cache partition its result lands in: the same bytes rendered as a diagram
//! and as an HTML block produce two distinct cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Expensive-content category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    /// Fenced code block whose language tag marks it as diagram syntax.
    Diagram,
    /// Structurally significant raw HTML (`<div>`, `<table>`, `<svg>` roots).
    HtmlBlock,
    /// Image reference resolving to an `.svg` resource.
    VectorImage,
}

impl ContentKind {
    /// All kinds, in adapter order.
    pub const ALL: [ContentKind; 3] = [
        ContentKind::Diagram,
        ContentKind::HtmlBlock,
        ContentKind::VectorImage,
    ];

    /// Stable tag used in cache keys, CSS classes and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Diagram => "diagram",
            ContentKind::HtmlBlock => "html-block",
            ContentKind::VectorImage => "vector-image",
        }
    }

    /// Human-readable label for inline error reports.
    pub fn label(&self) -> &'static str {
        match self {
            ContentKind::Diagram => "Diagram",
            ContentKind::HtmlBlock => "HTML block",
            ContentKind::VectorImage => "SVG image",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
