//! Content fingerprints used as cache keys.
//!
//! The digest is SHA-256 over the raw bytes, hex encoded. It is stable across
//! processes and platforms, which is what lets a persistent cache survive a
//! restart. Callers that want formatting-insensitive keys must normalise the
//! bytes before calling in; nothing here trims or rewrites input.

use crate::kind::ContentKind;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn fingerprint(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Cache key for `bytes` converted as `kind`: `"{digest}_{kind}"`.
pub fn cache_key(bytes: impl AsRef<[u8]>, kind: ContentKind) -> String {
    format!("{}_{}", fingerprint(bytes), kind.as_str())
}
