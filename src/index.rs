//! Document and schema index.
//!
//! Maps every addressable URI (identifiers, anchors, pointer-qualified
//! locations) to the schema node it designates. Documents named by
//! references are retrieved and indexed as they are discovered; each one is
//! fully indexed before any reference into it is looked up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::dialect::{Context, Dialect, RefKeyword};
use crate::error::DerefError;
use crate::metaschema;
use crate::pointer;
use crate::types::{json_type_name, DerefOptions, Retrieve};
use crate::uri;
use crate::visitor::{self, NodeKind, Visit, VisitNode};

/// Position of a value: a document and an escaped JSON Pointer into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub document: usize,
    pub pointer: String,
}

impl Location {
    pub fn root(document: usize) -> Self {
        Self {
            document,
            pointer: String::new(),
        }
    }

    /// Location of a child by unescaped key or array index.
    pub fn child(&self, token: &str) -> Self {
        Self {
            document: self.document,
            pointer: pointer::append(&self.pointer, token),
        }
    }
}

/// What an index entry is.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Schema,
    Reference {
        keyword: RefKeyword,
        /// Reference text as written.
        reference: String,
        /// Reference resolved against the node's base URI.
        target: Url,
        /// Whether the node has keywords besides the reference keyword.
        has_siblings: bool,
    },
}

/// A schema or reference node with its resolution context.
#[derive(Debug, Clone)]
pub struct Entry {
    pub location: Location,
    pub context: Context,
    pub kind: EntryKind,
}

#[derive(Debug)]
struct Document {
    uri: Url,
    value: Arc<Value>,
}

/// Index over one root document and every document it (transitively) references.
pub struct SchemaIndex {
    documents: Vec<Document>,
    document_ids: HashMap<String, usize>,
    entries: Vec<Entry>,
    by_location: HashMap<Location, usize>,
    resources: HashMap<String, usize>,
    anchors: HashMap<String, usize>,
    dynamic_anchors: HashMap<String, usize>,
    pending: VecDeque<usize>,
    default_dialect: Dialect,
}

/// Index `document`, retrieved from `document_uri`, and everything it references.
///
/// # Errors
///
/// Returns `DerefError::Retrieval` if a referenced document cannot be
/// retrieved, `DerefError::InvalidUri` for unparseable identifiers or
/// references.
pub fn index(
    document: &Value,
    document_uri: &str,
    dialect: Dialect,
    retriever: Option<&dyn Retrieve>,
) -> Result<SchemaIndex, DerefError> {
    let base = uri::parse_base(document_uri)?;
    let mut index = SchemaIndex::new(dialect);
    index.add_document(uri::absolute(&base), document.clone())?;
    index.load_references(retriever)?;
    Ok(index)
}

impl SchemaIndex {
    fn new(default_dialect: Dialect) -> Self {
        Self {
            documents: Vec::new(),
            document_ids: HashMap::new(),
            entries: Vec::new(),
            by_location: HashMap::new(),
            resources: HashMap::new(),
            anchors: HashMap::new(),
            dynamic_anchors: HashMap::new(),
            pending: VecDeque::new(),
            default_dialect,
        }
    }

    /// Build the index for a dereference call.
    pub fn build(schema: &Value, options: &DerefOptions<'_>) -> Result<Self, DerefError> {
        index(
            schema,
            &options.base_uri,
            options.default_dialect,
            options.retriever,
        )
    }

    /// Number of indexed documents (the root plus retrieved ones).
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// URI a document was retrieved from, as the caller wrote it.
    pub fn document_uri(&self, document: usize) -> String {
        uri::display(self.documents[document].uri.as_str())
    }

    /// Root locations of all documents, the input document first.
    pub fn document_roots(&self) -> impl Iterator<Item = Location> + '_ {
        (0..self.documents.len()).map(Location::root)
    }

    pub fn entry(&self, id: usize) -> &Entry {
        &self.entries[id]
    }

    /// The schema or reference entry at a location, if it is one.
    pub fn entry_at(&self, location: &Location) -> Option<(usize, &Entry)> {
        let id = *self.by_location.get(location)?;
        Some((id, &self.entries[id]))
    }

    /// The source value at a location.
    pub fn value(&self, location: &Location) -> Option<&Value> {
        let document = self.documents.get(location.document)?;
        pointer::evaluate(&location.pointer, &document.value)
            .ok()
            .flatten()
    }

    /// Every addressable URI with the location it designates, sorted.
    pub fn uris(&self) -> Vec<(String, &Location)> {
        let mut out: Vec<(String, &Location)> = self
            .resources
            .iter()
            .chain(self.anchors.iter())
            .map(|(key, id)| (uri::display(key), &self.entries[*id].location))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.dedup_by(|a, b| a.0 == b.0);
        out
    }

    /// Base URI in effect at `location`: its entry's, else its document's.
    pub(crate) fn base_uri_at(&self, location: &Location) -> Option<&Url> {
        match self.entry_at(location) {
            Some((_, entry)) => Some(&entry.context.base_uri),
            None => self.documents.get(location.document).map(|document| &document.uri),
        }
    }

    /// Find the node a URI designates.
    ///
    /// Tries, in order: an exact schema URI; an anchor; a JSON Pointer
    /// fragment evaluated below the nearest indexed ancestor (following that
    /// ancestor if it is itself a reference); a pointer into a document
    /// root that is not a schema.
    ///
    /// # Errors
    ///
    /// Returns `DerefError::MalformedPointer` for an invalid pointer fragment.
    pub fn find(&self, target: &Url) -> Result<Option<Location>, DerefError> {
        let (absolute, fragment) = uri::split(target);
        let fragment = fragment.unwrap_or_default();
        self.find_in(&absolute, &fragment, &mut HashSet::new())
    }

    fn find_in(
        &self,
        absolute: &Url,
        fragment: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<Option<Location>, DerefError> {
        let key = uri::key(absolute, fragment);
        if !visiting.insert(key.clone()) {
            return Ok(None);
        }

        if let Some(&id) = self.resources.get(&key) {
            return Ok(Some(self.entries[id].location.clone()));
        }
        if let Some(&id) = self.anchors.get(&key) {
            return Ok(Some(self.entries[id].location.clone()));
        }
        if !uri::is_pointer_fragment(fragment) {
            return Ok(None);
        }

        let tokens = pointer::parse(fragment)?;
        for split in (0..tokens.len()).rev() {
            let prefix = tokens[..split]
                .iter()
                .fold(String::new(), |acc, token| pointer::append(&acc, token));
            let Some(&id) = self.resources.get(&uri::key(absolute, &prefix)) else {
                continue;
            };
            let suffix = &tokens[split..];
            let ancestor = &self.entries[id];

            let direct = descend(&ancestor.location, suffix);
            if self.value(&direct).is_some() {
                return Ok(Some(direct));
            }
            if let EntryKind::Reference { target, .. } = &ancestor.kind {
                let (ref_absolute, ref_fragment) = uri::split(target);
                let followed = self.find_in(
                    &ref_absolute,
                    ref_fragment.as_deref().unwrap_or(""),
                    visiting,
                )?;
                if let Some(followed) = followed {
                    let through = descend(&followed, suffix);
                    if self.value(&through).is_some() {
                        return Ok(Some(through));
                    }
                }
            }
        }

        if let Some(&document) = self.document_ids.get(absolute.as_str()) {
            let location = Location {
                document,
                pointer: fragment.to_string(),
            };
            if self.value(&location).is_some() {
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    /// Find the target of a `$dynamicRef`.
    ///
    /// Scans the dynamic path outermost first for a resource declaring a
    /// `$dynamicAnchor` with the reference's fragment as its name; falls back
    /// to static resolution when none does.
    pub fn find_dynamic(
        &self,
        target: &Url,
        dynamic_path: &[usize],
    ) -> Result<Option<Location>, DerefError> {
        let (_, fragment) = uri::split(target);
        if let Some(anchor) = fragment.filter(|f| !uri::is_pointer_fragment(f)) {
            for &entry_id in dynamic_path {
                let base = &self.entries[entry_id].context.base_uri;
                if let Some(&id) = self.dynamic_anchors.get(&uri::key(base, &anchor)) {
                    trace!(anchor = %anchor, scope = %uri::display(base.as_str()), "dynamic anchor matched");
                    return Ok(Some(self.entries[id].location.clone()));
                }
            }
        }
        self.find(target)
    }

    fn add_document(&mut self, uri: Url, value: Value) -> Result<usize, DerefError> {
        let document = self.documents.len();
        self.document_ids.insert(uri.as_str().to_string(), document);
        self.documents.push(Document {
            uri: uri.clone(),
            value: Arc::new(value),
        });

        let before = self.entries.len();
        let enclosing = Context::document(uri, self.default_dialect);
        self.index_subtree(document, "", &enclosing, &[])?;
        debug!(
            document = %self.document_uri(document),
            schemas = self.entries.len() - before,
            "indexed document"
        );
        Ok(document)
    }

    fn index_subtree(
        &mut self,
        document: usize,
        at: &str,
        enclosing: &Context,
        relative: &[String],
    ) -> Result<(), DerefError> {
        let root = Arc::clone(&self.documents[document].value);
        let Some(subtree) = pointer::evaluate(at, &root)? else {
            return Ok(());
        };
        let mut collector = Collector::default();
        visitor::visit(subtree, at, enclosing, relative, &mut collector)?;
        for record in collector.records {
            self.register(document, record)?;
        }
        Ok(())
    }

    fn register(&mut self, document: usize, record: Record) -> Result<(), DerefError> {
        let location = Location {
            document,
            pointer: record.pointer,
        };
        if self.by_location.contains_key(&location) {
            return Ok(());
        }

        let kind = match record.reference {
            Some((keyword, reference, has_siblings)) => {
                let target = uri::resolve(&record.context.base_uri, &reference)?;
                EntryKind::Reference {
                    keyword,
                    reference,
                    target,
                    has_siblings,
                }
            }
            None => EntryKind::Schema,
        };
        let id = self.entries.len();
        let document_key = uri::key(&self.documents[document].uri, &location.pointer);

        for key in record.context.uris.iter().chain(std::iter::once(&document_key)) {
            insert_first(&mut self.resources, key, id);
        }
        for key in &record.context.anchors {
            insert_first(&mut self.anchors, key, id);
        }
        if let Some(anchor) = &record.context.dynamic_anchor {
            let key = uri::key(&record.context.base_uri, anchor);
            insert_first(&mut self.dynamic_anchors, &key, id);
        }
        if matches!(kind, EntryKind::Reference { .. }) {
            self.pending.push_back(id);
        }

        self.by_location.insert(location.clone(), id);
        self.entries.push(Entry {
            location,
            context: record.context,
            kind,
        });
        Ok(())
    }

    /// Retrieve and index the targets of every pending reference.
    fn load_references(&mut self, retriever: Option<&dyn Retrieve>) -> Result<(), DerefError> {
        while let Some(id) = self.pending.pop_front() {
            let EntryKind::Reference { target, .. } = &self.entries[id].kind else {
                continue;
            };
            let target = target.clone();
            let absolute = uri::absolute(&target);
            let known = self.resources.contains_key(absolute.as_str())
                || self.document_ids.contains_key(absolute.as_str());
            if !known {
                let document = retrieve(&absolute, retriever)?;
                self.add_document(absolute, document)?;
            }
            self.index_target(&target)?;
        }
        Ok(())
    }

    /// Index a pointer target that lies outside any classified subschema as
    /// a schema in its own right.
    fn index_target(&mut self, target: &Url) -> Result<(), DerefError> {
        let Some(location) = self.find(target)? else {
            return Ok(());
        };
        if self.by_location.contains_key(&location) {
            return Ok(());
        }
        let document = location.document;
        let tokens = pointer::parse(&location.pointer)?;

        let mut enclosing = Context::document(
            self.documents[document].uri.clone(),
            self.default_dialect,
        );
        let mut relative = tokens.clone();
        for split in (0..tokens.len()).rev() {
            let prefix = tokens[..split]
                .iter()
                .fold(String::new(), |acc, token| pointer::append(&acc, token));
            let ancestor = Location {
                document,
                pointer: prefix,
            };
            if let Some((_, entry)) = self.entry_at(&ancestor) {
                enclosing = entry.context.clone();
                relative = tokens[split..].to_vec();
                break;
            }
        }

        let schema_like = self
            .value(&location)
            .is_some_and(|value| enclosing.dialect.is_schema_value(value));
        if !schema_like {
            return Ok(());
        }
        trace!(target = %uri::display(target.as_str()), "indexing unclassified reference target");
        self.index_subtree(document, &location.pointer, &enclosing, &relative)
    }
}

impl fmt::Debug for SchemaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaIndex")
            .field("documents", &self.documents.len())
            .field("entries", &self.entries.len())
            .field("resources", &self.resources.len())
            .field("anchors", &self.anchors.len())
            .finish()
    }
}

fn descend(from: &Location, tokens: &[String]) -> Location {
    tokens.iter().fold(from.clone(), |location, token| location.child(token))
}

fn insert_first(table: &mut HashMap<String, usize>, key: &str, id: usize) {
    match table.get(key) {
        Some(existing) if *existing != id => {
            warn!(uri = %uri::display(key), "duplicate URI ignored; keeping first definition");
        }
        Some(_) => {}
        None => {
            table.insert(key.to_string(), id);
        }
    }
}

/// Fetch a document: the built-in meta-schemas first, then the caller's retriever.
fn retrieve(absolute: &Url, retriever: Option<&dyn Retrieve>) -> Result<Value, DerefError> {
    let shown = uri::display(absolute.as_str());
    if let Some(document) = metaschema::lookup(absolute.as_str())? {
        debug!(uri = %shown, "serving built-in meta-schema");
        return Ok(document);
    }
    let Some(retriever) = retriever else {
        return Err(DerefError::Retrieval {
            uri: shown,
            source: "cannot retrieve: no retriever configured".into(),
        });
    };

    debug!(uri = %shown, "retrieving document");
    let document = retriever
        .retrieve(&shown)
        .map_err(|source| DerefError::Retrieval {
            uri: shown.clone(),
            source,
        })?;
    if document.is_null() {
        return Err(DerefError::Retrieval {
            uri: shown,
            source: "retrieval returned no document".into(),
        });
    }
    trace!(uri = %shown, kind = json_type_name(&document), "retrieved document");
    Ok(document)
}

struct Record {
    pointer: String,
    context: Context,
    reference: Option<(RefKeyword, String, bool)>,
}

#[derive(Default)]
struct Collector {
    records: Vec<Record>,
}

impl Visit for Collector {
    fn enter(&mut self, node: &VisitNode<'_>) -> ControlFlow<()> {
        let Some(context) = node.context else {
            return ControlFlow::Continue(());
        };
        let reference = match node.kind {
            NodeKind::Reference(_) => context.dialect.reference(node.value).map(|(keyword, text)| {
                let map = node.value.as_object();
                if keyword == RefKeyword::Ref
                    && context.dialect == Dialect::Draft202012
                    && map.is_some_and(|map| map.get("$dynamicRef").is_some_and(Value::is_string))
                {
                    warn!(
                        pointer = %node.pointer,
                        "$dynamicRef beside $ref is not followed; keeping it as a sibling"
                    );
                }
                let has_siblings = map.is_some_and(|map| map.len() > 1);
                (keyword, text.to_string(), has_siblings)
            }),
            _ => None,
        };
        self.records.push(Record {
            pointer: node.pointer.to_string(),
            context: context.clone(),
            reference,
        });
        ControlFlow::Continue(())
    }
}
