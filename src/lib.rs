//! JSON Schema Dereferencer
//!
//! Replaces every `$ref` and `$dynamicRef` in a JSON Schema with the schema it
//! designates, across Draft-04, Draft-06, Draft-07 and 2020-12.
//!
//! The result is a [`SchemaGraph`]: an arena of nodes in which two references
//! to the same target share one node, and recursive schemas are real cycles.
//!
//! # Example
//!
//! ```
//! use schema_deref::{dereference, DerefOptions};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "billing": { "$ref": "#/$defs/address" },
//!         "shipping": { "$ref": "#/$defs/address", "description": "Where to ship" }
//!     },
//!     "$defs": {
//!         "address": { "type": "object", "required": ["street"] }
//!     }
//! });
//!
//! let graph = dereference(&schema, &DerefOptions::new()).unwrap();
//! let root = graph.root();
//!
//! // Plain references share the target's node
//! let billing = graph.pointer(root, "/properties/billing").unwrap();
//! assert_eq!(Some(billing), graph.pointer(root, "/$defs/address"));
//!
//! // A reference with siblings becomes a merged copy
//! let resolved = graph.to_value().unwrap();
//! assert_eq!(resolved["properties"]["shipping"]["type"], "object");
//! assert_eq!(resolved["properties"]["shipping"]["description"], "Where to ship");
//! ```
//!
//! # Merge Policies
//!
//! | Policy | `{"$ref": R, ...siblings}` becomes |
//! |--------|-------------------------------------|
//! | `by_keyword` | R's keywords overlaid by the siblings (2020-12 nests R under `$ref` on conflict) |
//! | `overwrite` | R alone |
//! | `none` | the siblings, with R nested under `$ref` |
//! | `default` | what the dialect prescribes: `overwrite` before 2020-12, `by_keyword` after |
//!
//! # External Documents
//!
//! References to other documents are fetched through a [`Retrieve`]
//! implementation passed in [`DerefOptions`]; [`SourceRetriever`] reads files
//! and (with the `remote` feature) HTTP URLs. The four supported
//! meta-schemas are built in and never retrieved.

mod dialect;
mod engine;
mod error;
mod graph;
mod index;
mod loader;
pub mod metaschema;
pub mod pointer;
mod types;
mod uri;
mod visitor;

pub use dialect::{Context, Dialect, RefKeyword};
pub use engine::{dereference, dereference_index};
pub use error::{DerefError, LoadError, RetrieveError};
pub use graph::{Node, NodeId, SchemaGraph};
pub use index::{index, Entry, EntryKind, Location, SchemaIndex};
pub use loader::{
    file_uri, is_url, load_schema, load_schema_auto, load_schema_str, SourceRetriever,
};
pub use types::{DerefOptions, MergePolicy, Retrieve};
pub use visitor::{visit, NodeKind, Visit, VisitNode};

#[cfg(feature = "remote")]
pub use loader::load_schema_url;
