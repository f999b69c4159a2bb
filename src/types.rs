//! Core types for schema dereferencing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::RetrieveError;

/// Returns the JSON type name for log and error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// How a `$ref` with sibling keywords is combined with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Overlay the referenced schema, then the siblings (siblings win).
    ///
    /// Under 2020-12, conflicting keywords keep the referenced schema nested
    /// under `$ref` instead of flattening.
    #[default]
    ByKeyword,
    /// Keep only the referenced schema.
    Overwrite,
    /// Keep only the siblings, with the referenced schema nested under `$ref`.
    None,
    /// Whatever the dialect itself prescribes for `$ref` siblings.
    Default,
}

impl MergePolicy {
    /// Parse a policy name (`by_keyword`, `overwrite`, `none`, `default`).
    ///
    /// Hyphens are accepted in place of underscores.
    pub fn parse(s: &str) -> Option<Self> {
        match s.replace('-', "_").as_str() {
            "by_keyword" => Some(MergePolicy::ByKeyword),
            "overwrite" => Some(MergePolicy::Overwrite),
            "none" => Some(MergePolicy::None),
            "default" => Some(MergePolicy::Default),
            _ => None,
        }
    }
}

/// Source of externally referenced documents.
///
/// Called with the absolute part of a reference (no fragment). Relative
/// references under a relative base URI are passed through relative.
/// Implementations must be idempotent; the engine calls this at most once per
/// URI per dereference.
pub trait Retrieve {
    fn retrieve(&self, uri: &str) -> Result<Value, RetrieveError>;
}

impl<F> Retrieve for F
where
    F: Fn(&str) -> Result<Value, RetrieveError>,
{
    fn retrieve(&self, uri: &str) -> Result<Value, RetrieveError> {
        self(uri)
    }
}

/// Options for dereferencing.
#[derive(Clone)]
pub struct DerefOptions<'r> {
    /// Base URI of the root document (RFC 3986). May be relative or empty.
    pub base_uri: String,
    /// Retrieval callback for external documents. Without one, any external
    /// reference not served by the built-in meta-schema table fails.
    pub retriever: Option<&'r dyn Retrieve>,
    /// How `$ref` siblings are merged with the referenced schema.
    pub merge_policy: MergePolicy,
    /// Dialect used where no `$schema` says otherwise.
    pub default_dialect: Dialect,
}

impl<'r> DerefOptions<'r> {
    /// Create options with an empty base URI, no retriever, `by_keyword`
    /// merging and 2020-12 as the default dialect.
    pub fn new() -> Self {
        Self {
            base_uri: String::new(),
            retriever: None,
            merge_policy: MergePolicy::default(),
            default_dialect: Dialect::default(),
        }
    }

    /// Set the base URI of the root document.
    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = base_uri.into();
        self
    }

    /// Set the retrieval callback.
    pub fn retriever(mut self, retriever: &'r dyn Retrieve) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Set the merge policy for `$ref` siblings.
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Set the dialect used when `$schema` is absent.
    pub fn default_dialect(mut self, dialect: Dialect) -> Self {
        self.default_dialect = dialect;
        self
    }
}

impl Default for DerefOptions<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DerefOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerefOptions")
            .field("base_uri", &self.base_uri)
            .field("retriever", &self.retriever.map(|_| "<retriever>"))
            .field("merge_policy", &self.merge_policy)
            .field("default_dialect", &self.default_dialect)
            .finish()
    }
}
