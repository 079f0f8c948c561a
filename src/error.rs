//! Error types for the docrender library.
//!
//! Three error types reflect three failure modes:
//!
//! * [`PipelineError`]: **Fatal**: the document as a whole cannot be
//!   rendered (input unreadable, bad configuration, output not writable).
//!   Partial output cannot be trusted, so the caller replaces the entire
//!   rendering area with [`crate::pipeline::encode::error_page`].
//!
//! * [`TaskError`]: **Non-fatal**: one deferred element (a diagram, an HTML
//!   block, an SVG image) failed to fetch or rasterise. It becomes an inline
//!   error report at the placeholder's position and is recorded in
//!   [`crate::output::TaskOutcome`]; every other task still drains.
//!
//! * [`CacheError`]: **Swallowed**: the storage layer failed. Stores return
//!   it, but [`crate::cache::ImageCache`] logs it and carries on as if the
//!   cache were cold.

use crate::kind::ContentKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docrender library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input could not be decoded as a document.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single deferred task.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TaskError {
    /// The referenced resource could not be retrieved.
    #[error("Failed to fetch '{reference}': {reason}")]
    FetchFailed { reference: String, reason: String },

    /// The resource fetch exceeded its time budget.
    #[error("Fetching '{reference}' timed out after {secs}s")]
    FetchTimeout { reference: String, secs: u64 },

    /// The reference uses a scheme or inline encoding we cannot handle.
    #[error("Unsupported resource '{reference}': {detail}")]
    UnsupportedResource { reference: String, detail: String },

    /// The rasterisation backend reported a failure.
    #[error("{kind} rendering failed: {detail}")]
    RenderFailed { kind: ContentKind, detail: String },

    /// The rasterisation backend did not answer in time.
    #[error("{kind} rendering timed out after {secs}s")]
    RenderTimeout { kind: ContentKind, secs: u64 },

    /// The backend answered, but not with a usable image.
    #[error("{kind} renderer returned invalid output: {detail}")]
    InvalidOutput { kind: ContentKind, detail: String },

    /// No rasteriser is configured for this kind.
    #[error("No renderer configured for {kind}")]
    NoBackend { kind: ContentKind },

    /// The drain step panicked; the panic was contained.
    #[error("Rendering aborted unexpectedly: {detail}")]
    Panicked { detail: String },
}

/// Storage-layer failure inside a [`crate::cache::CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the backing storage failed.
    #[error("cache I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored payload or index did not match its metadata.
    #[error("cache entry '{key}' is corrupt: {detail}")]
    Corrupt { key: String, detail: String },

    /// The index could not be (de)serialised.
    #[error("cache index serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
