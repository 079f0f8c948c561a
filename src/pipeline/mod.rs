//! Pipeline stages between the parsed tree and the first paint.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! tree ──▶ extract ──▶ stringify ──▶ postprocess ──▶ sanitize
//!          (tasks)                   (svg <img>)      (safe markup)
//!                                        │
//!                                      fetch
//! ```
//!
//! 1. [`extract`]: diagrams and significant HTML blocks become placeholders
//!    plus `ready` tasks
//! 2. [`postprocess`]: vector `<img>` references become placeholders plus
//!    `fetching` tasks
//! 3. [`fetch`]: resolve a reference and retrieve its text; the only stage
//!    with network I/O
//! 4. [`sanitize`]: strip active content from markup; also applied to each
//!    HTML block before it is queued and to the finished document
//! 5. [`encode`]: the markup spliced into slots: placeholders, images,
//!    error and timeout notices

pub mod encode;
pub mod extract;
pub mod fetch;
pub mod postprocess;
pub mod sanitize;
