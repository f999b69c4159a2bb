//! Arena representation of a dereferenced schema graph.
//!
//! Dereferenced output can be cyclic (`{"$ref": "#"}` points back at its own
//! root), which `serde_json::Value` cannot express. Nodes live in a flat
//! arena and refer to their children by [`NodeId`]: two references resolving
//! to the same target share one id, and cycles are ids that point back up.

use std::collections::{HashMap, HashSet};
use std::ops::Index;

use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Number, Value};

use crate::error::DerefError;
use crate::pointer;

/// Characters that must be percent-encoded in a URI fragment.
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Handle to a node in a [`SchemaGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single JSON value whose children are arena handles.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<NodeId>),
    Object(IndexMap<String, NodeId>),
}

impl Node {
    pub fn as_object(&self) -> Option<&IndexMap<String, NodeId>> {
        match self {
            Node::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[NodeId]> {
        match self {
            Node::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Node::Object(_))
    }
}

/// A possibly cyclic JSON graph.
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    nodes: Vec<Node>,
    root: NodeId,
    /// Absolute base URI of the root schema, when known.
    base_uri: Option<String>,
}

impl SchemaGraph {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NodeId(0),
            base_uri: None,
        }
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn set(&mut self, id: NodeId, node: Node) {
        self.nodes[id.0] = node;
    }

    pub(crate) fn set_root(&mut self, id: NodeId) {
        self.root = id;
    }

    pub(crate) fn set_base_uri(&mut self, base_uri: String) {
        self.base_uri = Some(base_uri);
    }

    /// Absolute base URI the root schema was dereferenced under.
    ///
    /// `None` for graphs built with [`SchemaGraph::from_value`].
    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    /// Build an (acyclic) graph from a plain JSON value.
    pub fn from_value(value: &Value) -> Self {
        let mut graph = Self::new();
        let root = graph.push_value(value);
        graph.set_root(root);
        graph
    }

    fn push_value(&mut self, value: &Value) -> NodeId {
        let node = match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Number(n) => Node::Number(n.clone()),
            Value::String(s) => Node::String(s.clone()),
            Value::Array(items) => Node::Array(items.iter().map(|v| self.push_value(v)).collect()),
            Value::Object(map) => Node::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.push_value(v)))
                    .collect(),
            ),
        };
        self.push(node)
    }

    /// The dereferenced root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Child of an object node by key.
    pub fn get(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.node(id).as_object()?.get(key).copied()
    }

    /// Child of an array node by position.
    pub fn item(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.node(id).as_array()?.get(index).copied()
    }

    /// Follow a JSON Pointer from `id`. Malformed pointers designate nothing.
    pub fn pointer(&self, id: NodeId, pointer: &str) -> Option<NodeId> {
        let tokens = pointer::parse(pointer).ok()?;
        tokens.iter().try_fold(id, |current, token| match self.node(current) {
            Node::Object(map) => map.get(token).copied(),
            Node::Array(items) => pointer::array_index(token).and_then(|i| items.get(i).copied()),
            _ => None,
        })
    }

    /// Whether any node can reach itself.
    pub fn is_cyclic(&self) -> bool {
        self.to_value().is_err()
    }

    /// Export the root as plain JSON.
    ///
    /// # Errors
    ///
    /// Returns `DerefError::Cyclic` naming the pointer at which a cycle closes.
    pub fn to_value(&self) -> Result<Value, DerefError> {
        self.value_at(self.root)
    }

    /// Export the subgraph at `id` as plain JSON.
    pub fn value_at(&self, id: NodeId) -> Result<Value, DerefError> {
        let mut on_path = HashSet::new();
        self.export_strict(id, &mut on_path, &mut String::new())
    }

    fn export_strict(
        &self,
        id: NodeId,
        on_path: &mut HashSet<NodeId>,
        path: &mut String,
    ) -> Result<Value, DerefError> {
        let value = match self.node(id) {
            Node::Array(items) => {
                enter(on_path, id, path)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, child) in items.iter().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("/{}", i));
                    out.push(self.export_strict(*child, on_path, path)?);
                    path.truncate(len);
                }
                on_path.remove(&id);
                Value::Array(out)
            }
            Node::Object(map) => {
                enter(on_path, id, path)?;
                let mut out = Map::new();
                for (key, child) in map {
                    let len = path.len();
                    path.push('/');
                    path.push_str(&pointer::escape(key));
                    out.insert(key.clone(), self.export_strict(*child, on_path, path)?);
                    path.truncate(len);
                }
                on_path.remove(&id);
                Value::Object(out)
            }
            leaf => leaf_value(leaf),
        };
        Ok(value)
    }

    /// Export the root as plain JSON, replacing every edge back to an
    /// ancestor with `{"$ref": "#<pointer of the ancestor>"}`.
    ///
    /// Below a nested `$id` (or Draft-04 `id`) a bare `#` would resolve
    /// against that identifier, so back edges there are qualified with the
    /// root's [base URI](SchemaGraph::base_uri) instead.
    ///
    /// Shared but acyclic nodes are written out at each occurrence.
    pub fn to_value_with_cycle_refs(&self) -> Value {
        let mut on_path = HashMap::new();
        self.export_with_refs(self.root, &mut on_path, &mut String::new(), false)
    }

    fn export_with_refs(
        &self,
        id: NodeId,
        on_path: &mut HashMap<NodeId, String>,
        path: &mut String,
        rebased: bool,
    ) -> Value {
        if let Some(ancestor) = on_path.get(&id) {
            let fragment = utf8_percent_encode(ancestor, FRAGMENT).to_string();
            let base = match &self.base_uri {
                Some(base) if rebased => base.as_str(),
                _ => "",
            };
            let mut back_edge = Map::new();
            back_edge.insert(
                "$ref".to_string(),
                Value::String(format!("{}#{}", base, fragment)),
            );
            return Value::Object(back_edge);
        }
        match self.node(id) {
            Node::Array(items) => {
                on_path.insert(id, path.clone());
                let mut out = Vec::with_capacity(items.len());
                for (i, child) in items.iter().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("/{}", i));
                    out.push(self.export_with_refs(*child, on_path, path, rebased));
                    path.truncate(len);
                }
                on_path.remove(&id);
                Value::Array(out)
            }
            Node::Object(map) => {
                on_path.insert(id, path.clone());
                let rebased = rebased || (id != self.root && self.declares_id(map));
                let mut out = Map::new();
                for (key, child) in map {
                    let len = path.len();
                    path.push('/');
                    path.push_str(&pointer::escape(key));
                    out.insert(
                        key.clone(),
                        self.export_with_refs(*child, on_path, path, rebased),
                    );
                    path.truncate(len);
                }
                on_path.remove(&id);
                Value::Object(out)
            }
            leaf => leaf_value(leaf),
        }
    }

    /// Whether an object carries an identifier that changes the base URI.
    fn declares_id(&self, map: &IndexMap<String, NodeId>) -> bool {
        ["$id", "id"].iter().any(|keyword| {
            map.get(*keyword)
                .and_then(|id| self.node(*id).as_str())
                .is_some_and(|id| !id.starts_with('#'))
        })
    }

    /// Structural equality that tolerates cycles.
    ///
    /// Two nodes are equivalent when no finite walk from them can tell them
    /// apart; object key order is ignored.
    pub fn equivalent(&self, a: NodeId, other: &SchemaGraph, b: NodeId) -> bool {
        let mut assumed = HashSet::new();
        self.equivalent_inner(a, other, b, &mut assumed)
    }

    fn equivalent_inner(
        &self,
        a: NodeId,
        other: &SchemaGraph,
        b: NodeId,
        assumed: &mut HashSet<(NodeId, NodeId)>,
    ) -> bool {
        if !assumed.insert((a, b)) {
            return true;
        }
        match (self.node(a), other.node(b)) {
            (Node::Object(left), Node::Object(right)) => {
                left.len() == right.len()
                    && left.iter().all(|(key, l)| {
                        right
                            .get(key)
                            .is_some_and(|r| self.equivalent_inner(*l, other, *r, assumed))
                    })
            }
            (Node::Array(left), Node::Array(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .zip(right)
                        .all(|(l, r)| self.equivalent_inner(*l, other, *r, assumed))
            }
            (left, right) => left == right,
        }
    }
}

impl Index<NodeId> for SchemaGraph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.node(id)
    }
}

fn enter(on_path: &mut HashSet<NodeId>, id: NodeId, path: &str) -> Result<(), DerefError> {
    if on_path.insert(id) {
        Ok(())
    } else {
        Err(DerefError::Cyclic {
            pointer: path.to_string(),
        })
    }
}

fn leaf_value(node: &Node) -> Value {
    match node {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Number(n) => Value::Number(n.clone()),
        Node::String(s) => Value::String(s.clone()),
        Node::Array(_) | Node::Object(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn self_loop() -> SchemaGraph {
        let mut graph = SchemaGraph::new();
        let root = graph.push(Node::Object(IndexMap::new()));
        let mut map = IndexMap::new();
        map.insert("self".to_string(), root);
        graph.set(root, Node::Object(map));
        graph.set_root(root);
        graph
    }

    #[test]
    fn from_value_round_trips() {
        let value = json!({ "type": "object", "required": ["a"], "properties": { "a": true } });
        let graph = SchemaGraph::from_value(&value);
        assert_eq!(graph.to_value().unwrap(), value);
        assert!(!graph.is_cyclic());
    }

    #[test]
    fn navigation() {
        let graph = SchemaGraph::from_value(&json!({ "items": [{ "a/b": 1 }] }));
        let root = graph.root();
        let first = graph.item(graph.get(root, "items").unwrap(), 0).unwrap();
        assert_eq!(graph.pointer(root, "/items/0"), Some(first));
        assert_eq!(
            graph[graph.pointer(root, "/items/0/a~1b").unwrap()],
            Node::Number(1.into())
        );
        assert_eq!(graph.pointer(root, "items"), None);
    }

    #[test]
    fn cyclic_export_fails_with_pointer() {
        let graph = self_loop();
        assert!(graph.is_cyclic());
        assert!(matches!(
            graph.to_value(),
            Err(DerefError::Cyclic { pointer }) if pointer == "/self"
        ));
    }

    #[test]
    fn cycle_refs_export() {
        let graph = self_loop();
        assert_eq!(
            graph.to_value_with_cycle_refs(),
            json!({ "self": { "$ref": "#" } })
        );
    }

    #[test]
    fn cycle_refs_encode_fragment() {
        let mut graph = SchemaGraph::new();
        let root = graph.push(Node::Object(IndexMap::new()));
        let inner = graph.push(Node::Object(IndexMap::new()));
        let mut inner_map = IndexMap::new();
        inner_map.insert("back".to_string(), inner);
        graph.set(inner, Node::Object(inner_map));
        let mut root_map = IndexMap::new();
        root_map.insert("a b".to_string(), inner);
        graph.set(root, Node::Object(root_map));
        graph.set_root(root);

        assert_eq!(
            graph.to_value_with_cycle_refs(),
            json!({ "a b": { "back": { "$ref": "#/a%20b" } } })
        );
    }

    #[test]
    fn equivalent_handles_cycles_and_key_order() {
        let a = self_loop();
        let b = self_loop();
        assert!(a.equivalent(a.root(), &b, b.root()));

        let left = SchemaGraph::from_value(&json!({ "a": 1, "b": [true] }));
        let right = SchemaGraph::from_value(&json!({ "b": [true], "a": 1 }));
        assert!(left.equivalent(left.root(), &right, right.root()));

        let different = SchemaGraph::from_value(&json!({ "a": 1, "b": [false] }));
        assert!(!left.equivalent(left.root(), &different, different.root()));
    }

    #[test]
    fn equivalent_distinguishes_cycle_from_leaf() {
        let looped = self_loop();
        let flat = SchemaGraph::from_value(&json!({ "self": {} }));
        assert!(!looped.equivalent(looped.root(), &flat, flat.root()));
    }
}
