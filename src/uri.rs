//! URI helpers on top of the `url` crate.
//!
//! `url::Url` only represents absolute URLs. Schemas are often identified by
//! relative URIs (or none at all), so relative bases are anchored under a
//! private placeholder origin and stripped again before they are shown to a
//! caller or handed to a retriever.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::DerefError;

/// Placeholder origin for relative base URIs.
const RELATIVE_BASE: &str = "http://example.invalid/";

/// Parse a base URI, anchoring relative (or empty) input under the placeholder origin.
pub fn parse_base(base: &str) -> Result<Url, DerefError> {
    if let Ok(url) = Url::parse(base) {
        return Ok(url);
    }
    let anchor = Url::parse(RELATIVE_BASE).map_err(|source| DerefError::InvalidUri {
        uri: RELATIVE_BASE.to_string(),
        source,
    })?;
    anchor.join(base).map_err(|source| DerefError::InvalidUri {
        uri: base.to_string(),
        source,
    })
}

/// Resolve a reference against a base URI (RFC 3986 section 5).
pub fn resolve(base: &Url, reference: &str) -> Result<Url, DerefError> {
    base.join(reference).map_err(|source| DerefError::InvalidUri {
        uri: reference.to_string(),
        source,
    })
}

/// Split a URI into its absolute part and its decoded, non-empty fragment.
pub fn split(url: &Url) -> (Url, Option<String>) {
    let fragment = url
        .fragment()
        .filter(|f| !f.is_empty())
        .map(|f| percent_decode_str(f).decode_utf8_lossy().into_owned());
    let mut absolute = url.clone();
    absolute.set_fragment(None);
    (absolute, fragment)
}

/// Strip the fragment from a URI.
pub fn absolute(url: &Url) -> Url {
    split(url).0
}

/// Index key for an absolute URI plus an already-decoded fragment.
///
/// An empty fragment addresses the resource itself, so it is dropped.
pub fn key(absolute: &Url, fragment: &str) -> String {
    if fragment.is_empty() {
        absolute.as_str().to_string()
    } else {
        format!("{}#{}", absolute.as_str(), fragment)
    }
}

/// Render a URI (or index key) the way the caller wrote it, dropping the
/// placeholder origin added for relative bases.
pub fn display(uri: &str) -> String {
    match uri.strip_prefix(RELATIVE_BASE) {
        Some(rest) => rest.to_string(),
        None => uri.to_string(),
    }
}

/// Whether a fragment is a JSON Pointer (empty, or starting with `/`).
pub fn is_pointer_fragment(fragment: &str) -> bool {
    fragment.is_empty() || fragment.starts_with('/')
}
