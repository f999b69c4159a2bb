//! Recursive walk over a JSON document that classifies every node.
//!
//! Parents are visited before their children and children in declaration
//! order: a child's base URI depends on its parent's resolved context.

use std::collections::HashSet;
use std::ops::ControlFlow;

use serde_json::Value;

use crate::dialect::{Context, RefKeyword};
use crate::error::DerefError;
use crate::pointer;

/// Classification of a visited node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Primitive,
    Array,
    Object,
    Schema,
    Reference(RefKeyword),
}

/// A node as seen by a [`Visit`] implementation.
#[derive(Debug)]
pub struct VisitNode<'a> {
    pub value: &'a Value,
    /// Escaped JSON Pointer from the document root.
    pub pointer: &'a str,
    pub kind: NodeKind,
    /// Resolved context, for schema and reference nodes.
    pub context: Option<&'a Context>,
}

/// Callbacks driven by [`visit`].
pub trait Visit {
    /// Called before a node's children. `Break` stops the whole walk.
    fn enter(&mut self, node: &VisitNode<'_>) -> ControlFlow<()>;

    /// Called after a node's children.
    fn leave(&mut self, _node: &VisitNode<'_>) {}
}

/// Walk `value`, located at `pointer` in its document, as a schema enclosed
/// by `enclosing`.
///
/// `relative` is the path from the enclosing schema to `value`; it is empty
/// for a document root. Returns `Ok(ControlFlow::Break(()))` when a callback
/// stopped the walk early.
pub fn visit(
    value: &Value,
    pointer: &str,
    enclosing: &Context,
    relative: &[String],
    visitor: &mut impl Visit,
) -> Result<ControlFlow<()>, DerefError> {
    let mut walker = Walker {
        visitor,
        seen: HashSet::new(),
    };
    walker.walk(value, pointer, enclosing, relative, true)
}

struct Walker<'v, V> {
    visitor: &'v mut V,
    seen: HashSet<*const Value>,
}

impl<V: Visit> Walker<'_, V> {
    fn walk(
        &mut self,
        value: &Value,
        pointer: &str,
        enclosing: &Context,
        relative: &[String],
        as_schema: bool,
    ) -> Result<ControlFlow<()>, DerefError> {
        if !self.seen.insert(value as *const Value) {
            return Ok(ControlFlow::Continue(()));
        }

        if as_schema && enclosing.dialect.is_schema_value(value) {
            let context = enclosing
                .dialect
                .resolve_context(enclosing, relative, value)?;
            let kind = match context.dialect.reference(value) {
                Some((keyword, _)) => NodeKind::Reference(keyword),
                None => NodeKind::Schema,
            };
            let node = VisitNode {
                value,
                pointer,
                kind,
                context: Some(&context),
            };
            if self.visitor.enter(&node).is_break() {
                return Ok(ControlFlow::Break(()));
            }
            if let Value::Object(map) = value {
                for (key, child) in map {
                    let child_pointer = pointer::append(pointer, key);
                    let child_relative = vec![key.clone()];
                    let child_is_schema = context.dialect.is_subschema(&child_relative);
                    let flow =
                        self.walk(child, &child_pointer, &context, &child_relative, child_is_schema)?;
                    if flow.is_break() {
                        return Ok(flow);
                    }
                }
            }
            self.visitor.leave(&node);
            return Ok(ControlFlow::Continue(()));
        }

        let kind = match value {
            Value::Object(_) => NodeKind::Object,
            Value::Array(_) => NodeKind::Array,
            _ => NodeKind::Primitive,
        };
        let node = VisitNode {
            value,
            pointer,
            kind,
            context: None,
        };
        if self.visitor.enter(&node).is_break() {
            return Ok(ControlFlow::Break(()));
        }

        let children: Vec<(String, &Value)> = match value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Vec::new(),
        };
        for (token, child) in children {
            let child_pointer = pointer::append(pointer, &token);
            let mut child_relative = relative.to_vec();
            child_relative.push(token);
            let child_is_schema = enclosing.dialect.is_subschema(&child_relative);
            let flow = self.walk(child, &child_pointer, enclosing, &child_relative, child_is_schema)?;
            if flow.is_break() {
                return Ok(flow);
            }
        }
        self.visitor.leave(&node);
        Ok(ControlFlow::Continue(()))
    }
}
