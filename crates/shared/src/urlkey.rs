//! URL resolution, deduplication keys, and blob naming.
//!
//! Every component addresses a URL through [`record_key`], so two
//! discoveries of the same URL always land on the same record.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{HarvestError, Result};

/// Resolve a possibly-relative reference against the page it was found on.
pub fn resolve(raw: &str, context: &Url) -> Result<Url> {
    context
        .join(raw)
        .map_err(|e| HarvestError::parse(format!("cannot resolve '{raw}': {e}")))
}

/// Whether a URL string carries a fragment marker anywhere.
///
/// Fragment-bearing URLs are excluded from the frontier entirely: never
/// enqueued, never fetched, never persisted.
pub fn has_fragment(raw: &str) -> bool {
    raw.contains('#')
}

/// Content-addressed record key: the first 128 bits of SHA-256 over the
/// URL string, as lowercase hex. Deterministic, so the key is a pure
/// function of the URL.
pub fn record_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Sanitize a URL into a blob name: scheme stripped, path separators
/// flattened to `__`, extension appended.
pub fn blob_name(url: &str, ext: &str) -> String {
    let stripped = url
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    format!("{}.{ext}", stripped.replace('/', "__"))
}
