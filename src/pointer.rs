//! JSON Pointer (RFC 6901) evaluation and escaping.

use serde_json::Value;

use crate::error::DerefError;

/// Escape a single reference token (`~` becomes `~0`, `/` becomes `~1`).
pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Unescape a single reference token.
///
/// # Errors
///
/// Returns `DerefError::MalformedPointer` when `~` is not followed by `0` or `1`.
pub fn unescape(segment: &str) -> Result<String, DerefError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            other => {
                return Err(DerefError::MalformedPointer {
                    pointer: segment.to_string(),
                    reason: match other {
                        Some(c) => format!("invalid escape sequence ~{}", c),
                        None => "dangling ~ at end of token".to_string(),
                    },
                })
            }
        }
    }
    Ok(out)
}

/// Append an unescaped token to an escaped pointer.
pub fn append(pointer: &str, segment: &str) -> String {
    format!("{}/{}", pointer, escape(segment))
}

/// Split a pointer into unescaped reference tokens.
///
/// # Errors
///
/// Returns `DerefError::MalformedPointer` if the pointer is non-empty and does
/// not start with `/`, or contains an invalid escape.
pub fn parse(pointer: &str) -> Result<Vec<String>, DerefError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(DerefError::MalformedPointer {
            pointer: pointer.to_string(),
            reason: "pointer must be empty or start with '/'".to_string(),
        });
    };
    rest.split('/')
        .map(|token| {
            unescape(token).map_err(|e| match e {
                DerefError::MalformedPointer { reason, .. } => DerefError::MalformedPointer {
                    pointer: pointer.to_string(),
                    reason,
                },
                other => other,
            })
        })
        .collect()
}

/// Evaluate a pointer against a document.
///
/// Returns `Ok(None)` when the pointer is well-formed but designates nothing.
pub fn evaluate<'v>(pointer: &str, document: &'v Value) -> Result<Option<&'v Value>, DerefError> {
    let tokens = parse(pointer)?;
    let mut current = document;
    for token in &tokens {
        let next = match current {
            Value::Object(map) => map.get(token),
            Value::Array(items) => array_index(token).and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Parse an array index token: decimal digits without leading zeros.
pub(crate) fn array_index(token: &str) -> Option<usize> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    token.parse().ok()
}
