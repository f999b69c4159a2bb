//! Built-in copies of the supported drafts' meta-schemas.
//!
//! References to these URIs are served locally and never reach the caller's
//! retriever.

use serde_json::Value;

use crate::error::DerefError;

const TABLE: &[(&str, &str)] = &[
    (
        "json-schema.org/draft-04/schema",
        include_str!("metaschemas/draft-04.json"),
    ),
    (
        "json-schema.org/draft-06/schema",
        include_str!("metaschemas/draft-06.json"),
    ),
    (
        "json-schema.org/draft-07/schema",
        include_str!("metaschemas/draft-07.json"),
    ),
    (
        "json-schema.org/draft/2020-12/schema",
        include_str!("metaschemas/2020-12/schema.json"),
    ),
    (
        "json-schema.org/draft/2020-12/meta/core",
        include_str!("metaschemas/2020-12/meta/core.json"),
    ),
    (
        "json-schema.org/draft/2020-12/meta/applicator",
        include_str!("metaschemas/2020-12/meta/applicator.json"),
    ),
    (
        "json-schema.org/draft/2020-12/meta/unevaluated",
        include_str!("metaschemas/2020-12/meta/unevaluated.json"),
    ),
    (
        "json-schema.org/draft/2020-12/meta/validation",
        include_str!("metaschemas/2020-12/meta/validation.json"),
    ),
    (
        "json-schema.org/draft/2020-12/meta/meta-data",
        include_str!("metaschemas/2020-12/meta/meta-data.json"),
    ),
    (
        "json-schema.org/draft/2020-12/meta/format-annotation",
        include_str!("metaschemas/2020-12/meta/format-annotation.json"),
    ),
    (
        "json-schema.org/draft/2020-12/meta/content",
        include_str!("metaschemas/2020-12/meta/content.json"),
    ),
];

fn source(uri: &str) -> Option<&'static str> {
    let trimmed = uri.trim_end_matches('#');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))?;
    TABLE
        .iter()
        .find(|(known, _)| *known == rest)
        .map(|(_, text)| *text)
}

/// Whether a fragmentless URI names a built-in meta-schema (either scheme).
pub fn is_builtin(uri: &str) -> bool {
    source(uri).is_some()
}

/// Parsed meta-schema for a fragmentless URI, if it is built in.
///
/// # Errors
///
/// Returns `DerefError::Retrieval` if the embedded copy fails to parse.
pub fn lookup(uri: &str) -> Result<Option<Value>, DerefError> {
    let Some(text) = source(uri) else {
        return Ok(None);
    };
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| DerefError::Retrieval {
            uri: uri.to_string(),
            source: Box::new(e),
        })
}
