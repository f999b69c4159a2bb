//! Dereferencing: turn an indexed document set into a [`SchemaGraph`].
//!
//! Every reachable location is copied into the arena exactly once. Schema and
//! container nodes get their arena slot before their children are copied, so
//! a reference that leads back to a node still being copied shares that slot
//! and closes a cycle instead of recursing forever.
//!
//! A `$ref` with sibling keywords cannot be combined with its target while
//! the target may still be incomplete; those merges are queued and run in
//! discovery order once the whole graph exists.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::dialect::{Dialect, RefKeyword};
use crate::error::DerefError;
use crate::graph::{Node, NodeId, SchemaGraph};
use crate::index::{Entry, EntryKind, Location, SchemaIndex};
use crate::types::{DerefOptions, MergePolicy};
use crate::uri;

/// Dereference `schema`, retrieving external documents through the options' retriever.
///
/// The returned graph's root is the dereferenced input document. Every
/// `$ref` and `$dynamicRef` has been replaced by (or, with siblings, merged
/// with) the node it designates; two references to one target share a node.
///
/// # Errors
///
/// - `DerefError::Retrieval` if an external document cannot be retrieved
/// - `DerefError::UnresolvedReference` if a reference designates nothing
/// - `DerefError::MalformedPointer` for an invalid JSON Pointer fragment
/// - `DerefError::InvalidUri` for an unparseable identifier or reference
pub fn dereference(schema: &Value, options: &DerefOptions<'_>) -> Result<SchemaGraph, DerefError> {
    let index = SchemaIndex::build(schema, options)?;
    dereference_index(&index, options.merge_policy)
}

/// Dereference every document of a prebuilt index.
///
/// Retrieved documents are copied too, so references between them resolve
/// to shared nodes; the graph's root is the index's input document.
pub fn dereference_index(
    index: &SchemaIndex,
    policy: MergePolicy,
) -> Result<SchemaGraph, DerefError> {
    let mut engine = Engine::new(index, policy);
    let mut roots = index.document_roots();
    let first = roots.next();
    let root = match &first {
        Some(location) => engine.copy(location)?,
        None => engine.graph.push(Node::Null),
    };
    for location in roots {
        engine.copy(&location)?;
    }
    engine.finalize();

    let mut graph = engine.graph;
    graph.set_root(root);
    if let Some(base) = first.as_ref().and_then(|location| index.base_uri_at(location)) {
        graph.set_base_uri(base.to_string());
    }
    debug!(
        nodes = graph.len(),
        documents = index.document_count(),
        "dereferenced schema"
    );
    Ok(graph)
}

#[derive(Debug, Clone, Copy)]
enum NodeState {
    /// Slot allocated, children still being copied.
    Placeholder(NodeId),
    Complete(NodeId),
}

impl NodeState {
    fn id(self) -> NodeId {
        match self {
            NodeState::Placeholder(id) | NodeState::Complete(id) => id,
        }
    }
}

/// A merge of referenced schema and `$ref` siblings, run after all copying.
struct Finalize {
    target: NodeId,
    referenced: NodeId,
    siblings: IndexMap<String, NodeId>,
    dialect: Dialect,
}

struct Engine<'i> {
    index: &'i SchemaIndex,
    policy: MergePolicy,
    graph: SchemaGraph,
    states: HashMap<Location, NodeState>,
    /// Schema and reference entries currently being copied, outermost first.
    dynamic_path: Vec<usize>,
    deferred: VecDeque<Finalize>,
}

impl<'i> Engine<'i> {
    fn new(index: &'i SchemaIndex, policy: MergePolicy) -> Self {
        Self {
            index,
            policy,
            graph: SchemaGraph::new(),
            states: HashMap::new(),
            dynamic_path: Vec::new(),
            deferred: VecDeque::new(),
        }
    }

    /// Copy the value at `location`, reusing its node if it was seen before.
    fn copy(&mut self, location: &Location) -> Result<NodeId, DerefError> {
        if let Some(state) = self.states.get(location) {
            return Ok(state.id());
        }
        let index = self.index;
        let value = index
            .value(location)
            .ok_or_else(|| DerefError::UnresolvedReference {
                reference: format!("#{}", location.pointer),
                uri: format!(
                    "{}#{}",
                    index.document_uri(location.document),
                    location.pointer
                ),
            })?;

        let Some((entry_id, entry)) = index.entry_at(location) else {
            return self.copy_container(location, value);
        };
        match &entry.kind {
            EntryKind::Schema => self.copy_schema(entry_id, location, value),
            EntryKind::Reference {
                keyword,
                reference,
                target,
                has_siblings: false,
            } => self.copy_reference(entry_id, location, *keyword, reference, target),
            EntryKind::Reference {
                keyword,
                reference,
                target,
                has_siblings: true,
            } => self.copy_merged_reference(
                entry_id,
                location,
                value,
                *keyword,
                reference,
                target,
            ),
        }
    }

    /// Non-schema objects and arrays are tracked by location so shared
    /// subtrees stay shared; primitives are copied fresh.
    fn copy_container(&mut self, location: &Location, value: &'i Value) -> Result<NodeId, DerefError> {
        if !(value.is_object() || value.is_array()) {
            return Ok(self.graph.push(leaf(value)));
        }
        let id = self.graph.push(Node::Null);
        self.states.insert(location.clone(), NodeState::Placeholder(id));
        let node = self.copy_children(location, value)?;
        self.graph.set(id, node);
        self.states.insert(location.clone(), NodeState::Complete(id));
        Ok(id)
    }

    fn copy_schema(
        &mut self,
        entry_id: usize,
        location: &Location,
        value: &'i Value,
    ) -> Result<NodeId, DerefError> {
        let id = self.graph.push(Node::Null);
        self.states.insert(location.clone(), NodeState::Placeholder(id));
        self.dynamic_path.push(entry_id);
        let node = self.copy_children(location, value)?;
        self.dynamic_path.pop();
        self.graph.set(id, node);
        self.states.insert(location.clone(), NodeState::Complete(id));
        Ok(id)
    }

    fn copy_children(&mut self, location: &Location, value: &'i Value) -> Result<Node, DerefError> {
        match value {
            Value::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for key in map.keys() {
                    let child = self.copy(&location.child(key))?;
                    out.insert(key.clone(), child);
                }
                Ok(Node::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for position in 0..items.len() {
                    out.push(self.copy(&location.child(&position.to_string()))?);
                }
                Ok(Node::Array(out))
            }
            other => Ok(leaf(other)),
        }
    }

    /// A reference with no siblings is replaced by its target's node.
    ///
    /// Chains of sibling-free references are followed through the index
    /// until they reach a location that is not one; only that location is
    /// copied, and every link of the chain shares its node. A chain that
    /// returns to one of its own links becomes a single `{"$ref": <self>}`.
    fn copy_reference(
        &mut self,
        entry_id: usize,
        location: &Location,
        keyword: RefKeyword,
        reference: &'i str,
        target: &'i Url,
    ) -> Result<NodeId, DerefError> {
        let index = self.index;
        let depth = self.dynamic_path.len();
        let mut chain = vec![location.clone()];
        let (mut entry_id, mut keyword, mut reference, mut target) =
            (entry_id, keyword, reference, target);

        let id = loop {
            let next = self.locate(entry_id, keyword, reference, target)?;
            if let Some(state) = self.states.get(&next) {
                break state.id();
            }
            if chain.contains(&next) {
                break self.self_loop(keyword, reference);
            }
            match index.entry_at(&next) {
                Some((
                    next_id,
                    Entry {
                        kind:
                            EntryKind::Reference {
                                keyword: next_keyword,
                                reference: next_reference,
                                target: next_target,
                                has_siblings: false,
                            },
                        ..
                    },
                )) => {
                    entry_id = next_id;
                    keyword = *next_keyword;
                    reference = next_reference.as_str();
                    target = next_target;
                    chain.push(next);
                }
                _ => break self.copy(&next)?,
            }
        };
        self.dynamic_path.truncate(depth);

        for link in chain {
            self.states.insert(link, NodeState::Complete(id));
        }
        Ok(id)
    }

    fn self_loop(&mut self, keyword: RefKeyword, reference: &str) -> NodeId {
        let id = self.graph.push(Node::Null);
        let mut map = IndexMap::new();
        map.insert(keyword.as_str().to_string(), id);
        self.graph.set(id, Node::Object(map));
        trace!(reference, "reference chain closes on itself");
        id
    }

    /// A reference with siblings gets its own node, filled in by a deferred merge.
    fn copy_merged_reference(
        &mut self,
        entry_id: usize,
        location: &Location,
        value: &'i Value,
        keyword: RefKeyword,
        reference: &'i str,
        target: &'i Url,
    ) -> Result<NodeId, DerefError> {
        let id = self.graph.push(Node::Object(IndexMap::new()));
        self.states.insert(location.clone(), NodeState::Placeholder(id));

        let mut siblings = IndexMap::new();
        if let Value::Object(map) = value {
            self.dynamic_path.push(entry_id);
            for key in map.keys().filter(|key| *key != keyword.as_str()) {
                let child = self.copy(&location.child(key))?;
                siblings.insert(key.clone(), child);
            }
            self.dynamic_path.pop();
        }
        let depth = self.dynamic_path.len();
        let resolved = self.locate(entry_id, keyword, reference, target)?;
        let referenced = self.copy(&resolved)?;
        self.dynamic_path.truncate(depth);

        let dialect = self.index.entry(entry_id).context.dialect;
        self.deferred.push_back(Finalize {
            target: id,
            referenced,
            siblings,
            dialect,
        });
        self.states.insert(location.clone(), NodeState::Complete(id));
        Ok(id)
    }

    /// Find the location a reference designates, entering the reference's
    /// scope on the dynamic path. The caller leaves the scope once the target
    /// has been copied.
    fn locate(
        &mut self,
        entry_id: usize,
        keyword: RefKeyword,
        reference: &str,
        target: &Url,
    ) -> Result<Location, DerefError> {
        self.dynamic_path.push(entry_id);
        let found = match keyword {
            RefKeyword::Ref => self.index.find(target)?,
            RefKeyword::DynamicRef => self.index.find_dynamic(target, &self.dynamic_path)?,
        };
        let Some(location) = found else {
            return Err(DerefError::UnresolvedReference {
                reference: reference.to_string(),
                uri: uri::display(target.as_str()),
            });
        };
        trace!(
            reference,
            document = location.document,
            pointer = %location.pointer,
            "resolved reference"
        );
        Ok(location)
    }

    fn finalize(&mut self) {
        let count = self.deferred.len();
        while let Some(task) = self.deferred.pop_front() {
            let merged = task.dialect.merge_referenced_schema(
                &self.graph,
                task.referenced,
                &task.siblings,
                self.policy,
            );
            self.graph.set(task.target, merged);
        }
        if count > 0 {
            debug!(count, policy = ?self.policy, "merged references with siblings");
        }
    }
}

fn leaf(value: &Value) -> Node {
    match value {
        Value::Null => Node::Null,
        Value::Bool(b) => Node::Bool(*b),
        Value::Number(n) => Node::Number(n.clone()),
        Value::String(s) => Node::String(s.clone()),
        Value::Array(_) => Node::Array(Vec::new()),
        Value::Object(_) => Node::Object(IndexMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deref(schema: Value) -> SchemaGraph {
        dereference(&schema, &DerefOptions::new()).unwrap()
    }

    #[test]
    fn no_references_round_trips() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string", "enum": ["x", 1, null] } }
        });
        assert_eq!(deref(schema.clone()).to_value().unwrap(), schema);
    }

    #[test]
    fn references_to_one_target_share_a_node() {
        let graph = deref(json!({
            "properties": {
                "a": { "$ref": "#/$defs/s" },
                "b": { "$ref": "#/$defs/s" }
            },
            "$defs": { "s": { "type": "string" } }
        }));
        let a = graph.pointer(graph.root(), "/properties/a").unwrap();
        let b = graph.pointer(graph.root(), "/properties/b").unwrap();
        let s = graph.pointer(graph.root(), "/$defs/s").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, s);
    }

    #[test]
    fn self_reference_closes_cycle_at_root() {
        let graph = deref(json!({
            "type": "object",
            "properties": { "child": { "$ref": "#" } }
        }));
        let child = graph.pointer(graph.root(), "/properties/child").unwrap();
        assert_eq!(child, graph.root());
        assert!(graph.is_cyclic());
    }

    #[test]
    fn pure_reference_cycle_becomes_self_loop() {
        let graph = deref(json!({
            "$defs": {
                "a": { "$ref": "#/$defs/b" },
                "b": { "$ref": "#/$defs/a" }
            }
        }));
        let a = graph.pointer(graph.root(), "/$defs/a").unwrap();
        let b = graph.pointer(graph.root(), "/$defs/b").unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.get(a, "$ref"), Some(a));
    }

    #[test]
    fn recursion_through_alias_reaches_target() {
        let graph = deref(json!({
            "$defs": {
                "alias": { "$ref": "#/$defs/tree" },
                "tree": { "properties": { "child": { "$ref": "#/$defs/alias" } } }
            }
        }));
        let alias = graph.pointer(graph.root(), "/$defs/alias").unwrap();
        let tree = graph.pointer(graph.root(), "/$defs/tree").unwrap();
        assert_eq!(alias, tree);
        assert_eq!(graph.pointer(tree, "/properties/child"), Some(tree));
    }

    #[test]
    fn chained_references_collapse() {
        let graph = deref(json!({
            "$ref": "#/$defs/a",
            "$defs": {
                "a": { "$ref": "#/$defs/b" },
                "b": { "type": "integer" }
            }
        }));
        let value = graph.to_value().unwrap();
        assert_eq!(value["type"], json!("integer"));
        assert_eq!(value["$defs"]["a"], json!({ "type": "integer" }));
    }

    #[test]
    fn merged_reference_keeps_target_untouched() {
        let graph = deref(json!({
            "properties": {
                "a": { "$ref": "#/$defs/s", "description": "first" },
                "b": { "$ref": "#/$defs/s" }
            },
            "$defs": { "s": { "type": "string" } }
        }));
        let value = graph.to_value().unwrap();
        assert_eq!(
            value["properties"]["a"],
            json!({ "type": "string", "description": "first" })
        );
        assert_eq!(value["properties"]["b"], json!({ "type": "string" }));
        assert_eq!(value["$defs"]["s"], json!({ "type": "string" }));
    }

    #[test]
    fn unresolved_reference_names_uri() {
        let err = dereference(
            &json!({ "$ref": "#/missing" }),
            &DerefOptions::new().base_uri("https://example.com/s.json"),
        )
        .unwrap_err();
        match err {
            DerefError::UnresolvedReference { reference, uri } => {
                assert_eq!(reference, "#/missing");
                assert_eq!(uri, "https://example.com/s.json#/missing");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn non_schema_containers_follow_shared_location() {
        let graph = deref(json!({
            "properties": { "a": { "$ref": "#/properties/b/enum" }, "b": { "enum": [1, 2] } }
        }));
        let a = graph.pointer(graph.root(), "/properties/a").unwrap();
        let enum_node = graph.pointer(graph.root(), "/properties/b/enum").unwrap();
        assert_eq!(a, enum_node);
    }
}
