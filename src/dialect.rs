//! Per-draft identifier, subschema and reference semantics.
//!
//! Each supported draft is one variant of [`Dialect`]. The variant is chosen
//! once per schema node (from its own `$schema`, else inherited) and all
//! draft-specific behaviour dispatches on it.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

use crate::error::DerefError;
use crate::graph::{Node, NodeId, SchemaGraph};
use crate::pointer;
use crate::types::MergePolicy;
use crate::uri;

/// Keywords whose value conflicts are ignored when merging under 2020-12.
const MERGE_EXEMPT: &[&str] = &["$id", "$defs", "definitions"];

/// A supported JSON Schema draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    Draft4,
    Draft6,
    Draft7,
    #[default]
    Draft202012,
}

/// Which keyword makes a node a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKeyword {
    Ref,
    DynamicRef,
}

impl RefKeyword {
    pub fn as_str(self) -> &'static str {
        match self {
            RefKeyword::Ref => "$ref",
            RefKeyword::DynamicRef => "$dynamicRef",
        }
    }
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Draft4,
        Dialect::Draft6,
        Dialect::Draft7,
        Dialect::Draft202012,
    ];

    /// Canonical meta-schema URI.
    pub fn meta_schema_uri(self) -> &'static str {
        match self {
            Dialect::Draft4 => "http://json-schema.org/draft-04/schema#",
            Dialect::Draft6 => "http://json-schema.org/draft-06/schema#",
            Dialect::Draft7 => "http://json-schema.org/draft-07/schema#",
            Dialect::Draft202012 => "https://json-schema.org/draft/2020-12/schema",
        }
    }

    /// Identify a dialect from a `$schema` value.
    ///
    /// Accepts either scheme and an optional empty fragment.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let trimmed = uri.trim().trim_end_matches('#');
        let rest = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))?;
        match rest {
            "json-schema.org/draft-04/schema" => Some(Dialect::Draft4),
            "json-schema.org/draft-06/schema" => Some(Dialect::Draft6),
            "json-schema.org/draft-07/schema" => Some(Dialect::Draft7),
            "json-schema.org/draft/2020-12/schema" => Some(Dialect::Draft202012),
            _ => None,
        }
    }

    /// Keyword that assigns a base URI.
    pub fn id_keyword(self) -> &'static str {
        match self {
            Dialect::Draft4 => "id",
            _ => "$id",
        }
    }

    /// Whether `$ref` makes its sibling keywords (including the identifier) inert.
    pub fn ref_overrides_siblings(self) -> bool {
        !matches!(self, Dialect::Draft202012)
    }

    /// Merge policy that `MergePolicy::Default` stands for.
    pub fn default_merge_policy(self) -> MergePolicy {
        match self {
            Dialect::Draft202012 => MergePolicy::ByKeyword,
            _ => MergePolicy::Overwrite,
        }
    }

    /// Whether a value has a shape this dialect accepts as a schema.
    ///
    /// Boolean schemas appeared in Draft-06.
    pub fn is_schema_value(self, value: &Value) -> bool {
        match self {
            Dialect::Draft4 => value.is_object(),
            _ => value.is_object() || value.is_boolean(),
        }
    }

    /// Whether a location, given as unescaped tokens relative to the
    /// enclosing schema, holds a subschema.
    ///
    /// Only the location is classified here; callers still check the value's
    /// shape with [`Dialect::is_schema_value`].
    pub fn is_subschema(self, relative: &[String]) -> bool {
        match relative {
            [keyword] => self.is_single_schema_keyword(keyword),
            [keyword, member] => {
                self.is_schema_map_keyword(keyword)
                    || (self.is_schema_array_keyword(keyword)
                        && pointer::array_index(member).is_some())
            }
            _ => false,
        }
    }

    fn is_single_schema_keyword(self, keyword: &str) -> bool {
        // An object-valued `$ref` is an inline subschema, not a reference.
        if matches!(keyword, "$ref" | "additionalProperties" | "items" | "not") {
            return true;
        }
        match self {
            Dialect::Draft4 => keyword == "additionalItems",
            Dialect::Draft6 => matches!(keyword, "additionalItems" | "contains" | "propertyNames"),
            Dialect::Draft7 => matches!(
                keyword,
                "additionalItems" | "contains" | "propertyNames" | "if" | "then" | "else"
            ),
            Dialect::Draft202012 => matches!(
                keyword,
                "contains"
                    | "propertyNames"
                    | "if"
                    | "then"
                    | "else"
                    | "unevaluatedItems"
                    | "unevaluatedProperties"
                    | "contentSchema"
            ),
        }
    }

    fn is_schema_map_keyword(self, keyword: &str) -> bool {
        if matches!(keyword, "properties" | "patternProperties" | "definitions") {
            return true;
        }
        match self {
            Dialect::Draft202012 => matches!(keyword, "$defs" | "dependentSchemas"),
            _ => keyword == "dependencies",
        }
    }

    fn is_schema_array_keyword(self, keyword: &str) -> bool {
        if matches!(keyword, "allOf" | "anyOf" | "oneOf") {
            return true;
        }
        match self {
            Dialect::Draft202012 => keyword == "prefixItems",
            _ => keyword == "items",
        }
    }

    /// If `value` is a reference node, its keyword and reference text.
    ///
    /// `$ref` takes precedence: a 2020-12 node carrying both keywords is a
    /// `$ref` node, and its `$dynamicRef` is kept as an ordinary sibling.
    pub fn reference(self, value: &Value) -> Option<(RefKeyword, &str)> {
        let obj = value.as_object()?;
        if let Some(Value::String(target)) = obj.get("$ref") {
            return Some((RefKeyword::Ref, target));
        }
        if self == Dialect::Draft202012 {
            if let Some(Value::String(target)) = obj.get("$dynamicRef") {
                return Some((RefKeyword::DynamicRef, target));
            }
        }
        None
    }

    /// Resolve the context of a schema node.
    ///
    /// `relative` is the path from the enclosing schema to the node. The
    /// node's own `$schema` (if recognised) selects the dialect used to read
    /// its identifiers; a new identifier resets the pointer accumulator.
    pub fn resolve_context(
        self,
        enclosing: &Context,
        relative: &[String],
        node: &Value,
    ) -> Result<Context, DerefError> {
        let dialect = node
            .get("$schema")
            .and_then(Value::as_str)
            .and_then(Dialect::from_uri)
            .unwrap_or(self);

        let mut base = enclosing.base_uri.clone();
        let mut pointer = relative
            .iter()
            .fold(enclosing.pointer.clone(), |acc, token| pointer::append(&acc, token));
        let mut uris = Vec::new();
        let mut anchors = Vec::new();
        let mut dynamic_anchor = None;

        if let Some(obj) = node.as_object() {
            let inert = dialect.ref_overrides_siblings()
                && obj.get("$ref").is_some_and(Value::is_string);

            if !inert {
                if let Some(id) = obj.get(dialect.id_keyword()).and_then(Value::as_str) {
                    let resolved = uri::resolve(&base, id)?;
                    let (absolute, fragment) = uri::split(&resolved);
                    let plain_name = fragment
                        .filter(|f| !uri::is_pointer_fragment(f))
                        .filter(|_| dialect != Dialect::Draft202012);
                    if absolute != base || plain_name.is_none() {
                        base = absolute;
                        pointer.clear();
                        uris.push(uri::key(&base, ""));
                    }
                    if let Some(name) = plain_name {
                        anchors.push(uri::key(&base, &name));
                    }
                }

                if dialect == Dialect::Draft202012 {
                    if let Some(anchor) = obj.get("$anchor").and_then(Value::as_str) {
                        anchors.push(uri::key(&base, anchor));
                    }
                    if let Some(anchor) = obj.get("$dynamicAnchor").and_then(Value::as_str) {
                        anchors.push(uri::key(&base, anchor));
                        dynamic_anchor = Some(anchor.to_string());
                    }
                }
            }
        }

        let located = uri::key(&base, &pointer);
        if !uris.contains(&located) {
            uris.push(located);
        }

        Ok(Context {
            base_uri: base,
            dialect,
            pointer,
            uris,
            anchors,
            dynamic_anchor,
        })
    }

    /// Combine a referenced schema with the siblings of the `$ref` that named it.
    pub fn merge_referenced_schema(
        self,
        graph: &SchemaGraph,
        referenced: NodeId,
        siblings: &IndexMap<String, NodeId>,
        policy: MergePolicy,
    ) -> Node {
        let policy = match policy {
            MergePolicy::Default => self.default_merge_policy(),
            other => other,
        };
        match policy {
            MergePolicy::Overwrite => graph.node(referenced).clone(),
            MergePolicy::None => nested(siblings, referenced),
            MergePolicy::ByKeyword | MergePolicy::Default => match graph.node(referenced) {
                Node::Object(target) => {
                    if self == Dialect::Draft202012 && conflicts(graph, target, siblings) {
                        nested(siblings, referenced)
                    } else {
                        let mut merged = target.clone();
                        for (key, value) in siblings {
                            merged.insert(key.clone(), *value);
                        }
                        Node::Object(merged)
                    }
                }
                Node::Bool(true) => Node::Object(siblings.clone()),
                _ => nested(siblings, referenced),
            },
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.meta_schema_uri())
    }
}

impl FromStr for Dialect {
    type Err = String;

    /// Accepts a meta-schema URI or a short name (`draft-04`, `draft4`, `2020-12`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(dialect) = Dialect::from_uri(s) {
            return Ok(dialect);
        }
        match s.to_ascii_lowercase().trim_start_matches("draft").trim_matches('-') {
            "4" | "04" => Ok(Dialect::Draft4),
            "6" | "06" => Ok(Dialect::Draft6),
            "7" | "07" => Ok(Dialect::Draft7),
            "2020-12" | "202012" => Ok(Dialect::Draft202012),
            _ => Err(format!("unsupported dialect: {}", s)),
        }
    }
}

fn nested(siblings: &IndexMap<String, NodeId>, referenced: NodeId) -> Node {
    let mut merged = siblings.clone();
    merged.insert("$ref".to_string(), referenced);
    Node::Object(merged)
}

fn conflicts(
    graph: &SchemaGraph,
    target: &IndexMap<String, NodeId>,
    siblings: &IndexMap<String, NodeId>,
) -> bool {
    siblings.iter().any(|(key, sibling)| {
        !MERGE_EXEMPT.contains(&key.as_str())
            && target
                .get(key)
                .is_some_and(|existing| !graph.equivalent(*existing, graph, *sibling))
    })
}

/// Resolution context of a schema node.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Base URI in effect for this node (no fragment).
    pub base_uri: Url,
    /// Dialect governing this node and, unless overridden, its descendants.
    pub dialect: Dialect,
    /// Escaped JSON Pointer from the resource at `base_uri` to this node.
    pub pointer: String,
    /// Index keys addressing this node as a resource or by pointer.
    pub uris: Vec<String>,
    /// Index keys from `$anchor`, `$dynamicAnchor` or plain-name identifiers.
    pub anchors: Vec<String>,
    /// Text of this node's `$dynamicAnchor`, if any.
    pub dynamic_anchor: Option<String>,
}

impl Context {
    /// Context enclosing the root of a document retrieved from `base_uri`.
    pub fn document(base_uri: Url, dialect: Dialect) -> Self {
        Self {
            base_uri,
            dialect,
            pointer: String::new(),
            uris: Vec::new(),
            anchors: Vec::new(),
            dynamic_anchor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens(path: &[&str]) -> Vec<String> {
        path.iter().map(|s| s.to_string()).collect()
    }

    fn doc_context(base: &str, dialect: Dialect) -> Context {
        Context::document(uri::parse_base(base).unwrap(), dialect)
    }

    #[test]
    fn from_uri_variants() {
        assert_eq!(
            Dialect::from_uri("http://json-schema.org/draft-04/schema#"),
            Some(Dialect::Draft4)
        );
        assert_eq!(
            Dialect::from_uri("https://json-schema.org/draft-07/schema"),
            Some(Dialect::Draft7)
        );
        assert_eq!(
            Dialect::from_uri("https://json-schema.org/draft/2020-12/schema"),
            Some(Dialect::Draft202012)
        );
        assert_eq!(
            Dialect::from_uri("https://json-schema.org/draft/2019-09/schema"),
            None
        );
    }

    #[test]
    fn from_str_short_names() {
        assert_eq!("draft-04".parse::<Dialect>(), Ok(Dialect::Draft4));
        assert_eq!("draft7".parse::<Dialect>(), Ok(Dialect::Draft7));
        assert_eq!("2020-12".parse::<Dialect>(), Ok(Dialect::Draft202012));
        assert!("draft-03".parse::<Dialect>().is_err());
    }

    #[test]
    fn subschema_classification_drifts_by_draft() {
        let prefix = tokens(&["prefixItems", "0"]);
        assert!(Dialect::Draft202012.is_subschema(&prefix));
        assert!(!Dialect::Draft7.is_subschema(&prefix));

        let dependent = tokens(&["dependentSchemas", "a"]);
        assert!(Dialect::Draft202012.is_subschema(&dependent));
        assert!(!Dialect::Draft4.is_subschema(&dependent));

        let dependencies = tokens(&["dependencies", "a"]);
        assert!(Dialect::Draft4.is_subschema(&dependencies));
        assert!(!Dialect::Draft202012.is_subschema(&dependencies));

        assert!(Dialect::Draft7.is_subschema(&tokens(&["if"])));
        assert!(!Dialect::Draft6.is_subschema(&tokens(&["if"])));

        assert!(Dialect::Draft7.is_subschema(&tokens(&["items", "1"])));
        assert!(!Dialect::Draft202012.is_subschema(&tokens(&["items", "1"])));

        assert!(!Dialect::Draft7.is_subschema(&tokens(&["properties"])));
        assert!(!Dialect::Draft7.is_subschema(&tokens(&["enum", "0"])));
        assert!(!Dialect::Draft7.is_subschema(&tokens(&["allOf", "x"])));
    }

    #[test]
    fn draft4_has_no_boolean_schemas() {
        assert!(!Dialect::Draft4.is_schema_value(&json!(false)));
        assert!(Dialect::Draft6.is_schema_value(&json!(false)));
        assert!(!Dialect::Draft7.is_schema_value(&json!("x")));
    }

    #[test]
    fn reference_detection() {
        let node = json!({ "$ref": "#/a" });
        assert_eq!(
            Dialect::Draft7.reference(&node),
            Some((RefKeyword::Ref, "#/a"))
        );

        let dynamic = json!({ "$dynamicRef": "#meta" });
        assert_eq!(
            Dialect::Draft202012.reference(&dynamic),
            Some((RefKeyword::DynamicRef, "#meta"))
        );
        assert_eq!(Dialect::Draft7.reference(&dynamic), None);

        let inline = json!({ "$ref": { "type": "string" } });
        assert_eq!(Dialect::Draft202012.reference(&inline), None);
    }

    #[test]
    fn context_resolves_id_and_resets_pointer() {
        let enclosing = doc_context("https://example.com/root.json", Dialect::Draft202012);
        let node = json!({ "$id": "nested/a.json", "$anchor": "here" });
        let ctx = Dialect::Draft202012
            .resolve_context(&enclosing, &tokens(&["$defs", "a"]), &node)
            .unwrap();
        assert_eq!(ctx.base_uri.as_str(), "https://example.com/nested/a.json");
        assert_eq!(ctx.pointer, "");
        assert_eq!(ctx.uris, vec!["https://example.com/nested/a.json"]);
        assert_eq!(ctx.anchors, vec!["https://example.com/nested/a.json#here"]);
    }

    #[test]
    fn context_accumulates_pointer_without_id() {
        let enclosing = doc_context("https://example.com/root.json", Dialect::Draft7);
        let ctx = Dialect::Draft7
            .resolve_context(&enclosing, &tokens(&["definitions", "a/b"]), &json!({}))
            .unwrap();
        assert_eq!(ctx.pointer, "/definitions/a~1b");
        assert_eq!(
            ctx.uris,
            vec!["https://example.com/root.json#/definitions/a~1b"]
        );
    }

    #[test]
    fn draft4_uses_id_and_plain_name_fragments() {
        let enclosing = doc_context("http://x.test/root.json", Dialect::Draft4);
        let ctx = Dialect::Draft4
            .resolve_context(&enclosing, &tokens(&["definitions", "a"]), &json!({ "id": "#foo" }))
            .unwrap();
        assert_eq!(ctx.base_uri.as_str(), "http://x.test/root.json");
        assert_eq!(ctx.anchors, vec!["http://x.test/root.json#foo"]);
        // `$id` means nothing to Draft-04
        let ctx = Dialect::Draft4
            .resolve_context(&enclosing, &[], &json!({ "$id": "other.json" }))
            .unwrap();
        assert_eq!(ctx.base_uri.as_str(), "http://x.test/root.json");
    }

    #[test]
    fn ref_sibling_id_is_inert_before_2020() {
        let enclosing = doc_context("http://x.test/root.json", Dialect::Draft7);
        let node = json!({ "$id": "http://other.test/", "$ref": "a.json" });
        let ctx = Dialect::Draft7.resolve_context(&enclosing, &[], &node).unwrap();
        assert_eq!(ctx.base_uri.as_str(), "http://x.test/root.json");

        let ctx = Dialect::Draft202012
            .resolve_context(&enclosing, &[], &node)
            .unwrap();
        assert_eq!(ctx.base_uri.as_str(), "http://other.test/");
    }

    #[test]
    fn schema_keyword_switches_dialect() {
        let enclosing = doc_context("http://x.test/root.json", Dialect::Draft202012);
        let node = json!({ "$schema": "http://json-schema.org/draft-04/schema#", "id": "b.json" });
        let ctx = Dialect::Draft202012
            .resolve_context(&enclosing, &[], &node)
            .unwrap();
        assert_eq!(ctx.dialect, Dialect::Draft4);
        assert_eq!(ctx.base_uri.as_str(), "http://x.test/b.json");
    }

    #[test]
    fn dynamic_anchor_recorded() {
        let enclosing = doc_context("https://example.com/tree", Dialect::Draft202012);
        let ctx = Dialect::Draft202012
            .resolve_context(&enclosing, &[], &json!({ "$dynamicAnchor": "node" }))
            .unwrap();
        assert_eq!(ctx.dynamic_anchor.as_deref(), Some("node"));
        assert_eq!(ctx.anchors, vec!["https://example.com/tree#node"]);
    }

    fn merge_fixture(
        target: serde_json::Value,
        siblings: serde_json::Value,
    ) -> (SchemaGraph, NodeId, IndexMap<String, NodeId>) {
        let mut graph = SchemaGraph::from_value(&json!({ "target": target, "siblings": siblings }));
        let root = graph.root();
        let referenced = graph.get(root, "target").unwrap();
        let siblings = graph
            .node(graph.get(root, "siblings").unwrap())
            .as_object()
            .cloned()
            .unwrap();
        graph.set_root(referenced);
        (graph, referenced, siblings)
    }

    #[test]
    fn merge_by_keyword_siblings_win() {
        let (graph, referenced, siblings) =
            merge_fixture(json!({ "type": "string" }), json!({ "description": "d" }));
        let merged = Dialect::Draft7.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::ByKeyword,
        );
        let keys: Vec<&String> = merged.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["type", "description"]);
    }

    #[test]
    fn merge_by_keyword_2020_nests_on_conflict() {
        let (graph, referenced, siblings) =
            merge_fixture(json!({ "type": "string" }), json!({ "type": "number" }));
        let merged = Dialect::Draft202012.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::ByKeyword,
        );
        let map = merged.as_object().unwrap();
        assert_eq!(map.get("$ref"), Some(&referenced));

        // Draft-07 flattens the same input, siblings winning
        let flat = Dialect::Draft7.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::ByKeyword,
        );
        assert!(flat.as_object().unwrap().get("$ref").is_none());
    }

    #[test]
    fn merge_2020_ignores_exempt_and_equal_keywords() {
        let (graph, referenced, siblings) = merge_fixture(
            json!({ "$id": "a", "type": "string" }),
            json!({ "$id": "b", "type": "string", "title": "t" }),
        );
        let merged = Dialect::Draft202012.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::ByKeyword,
        );
        let map = merged.as_object().unwrap();
        assert!(map.get("$ref").is_none());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn merge_overwrite_and_none() {
        let (graph, referenced, siblings) =
            merge_fixture(json!({ "type": "string" }), json!({ "description": "d" }));
        let overwritten = Dialect::Draft202012.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::Overwrite,
        );
        assert_eq!(&overwritten, graph.node(referenced));

        let none = Dialect::Draft202012.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::None,
        );
        let keys: Vec<&String> = none.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["description", "$ref"]);
    }

    #[test]
    fn merge_default_follows_dialect() {
        let (graph, referenced, siblings) =
            merge_fixture(json!({ "type": "string" }), json!({ "description": "d" }));
        let draft7 = Dialect::Draft7.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::Default,
        );
        assert_eq!(&draft7, graph.node(referenced));

        let modern = Dialect::Draft202012.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::Default,
        );
        assert_eq!(modern.as_object().unwrap().len(), 2);
    }

    #[test]
    fn merge_boolean_targets() {
        let (graph, referenced, siblings) = merge_fixture(json!(true), json!({ "title": "t" }));
        let merged = Dialect::Draft7.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::ByKeyword,
        );
        assert_eq!(merged.as_object().unwrap().len(), 1);

        let (graph, referenced, siblings) = merge_fixture(json!(false), json!({ "title": "t" }));
        let merged = Dialect::Draft7.merge_referenced_schema(
            &graph,
            referenced,
            &siblings,
            MergePolicy::ByKeyword,
        );
        assert_eq!(merged.as_object().unwrap().get("$ref"), Some(&referenced));
    }
}
