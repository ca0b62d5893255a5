//! Documents as seen by the ranking core, and the store they are read from.
//!
//! The core never writes to a [`DocumentStore`]. Documents are read on demand
//! during an index build and dropped once their chunks have been prepared.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A front-matter property value.
///
/// Dates are only recognised by the front-matter parser. A serialized date
/// reads back as a [`PropertyValue::String`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    String(String),
    Date(String),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Whether this value is a boolean or numeric literal.
    pub fn is_literal(&self) -> bool {
        matches!(self, PropertyValue::Bool(_) | PropertyValue::Number(_))
    }

    /// Render a primitive value as indexable text. Arrays and objects
    /// return `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            PropertyValue::Bool(b) => Some(b.to_string()),
            PropertyValue::Number(n) => Some(n.to_string()),
            PropertyValue::Date(s) | PropertyValue::String(s) => {
                Some(s.clone())
            }
            PropertyValue::Array(_) | PropertyValue::Object(_) => None,
        }
    }
}

/// A document owned by the host store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-relative path, `/`-separated.
    pub id: String,
    pub title: String,
    pub headings: Vec<String>,
    pub tags: Vec<String>,
    pub properties: BTreeMap<String, PropertyValue>,
    pub out_links: Vec<String>,
    pub in_links: Vec<String>,
    /// Raw text, possibly still carrying a front-matter block.
    pub body: String,
    /// Last modification time as milliseconds since the Unix epoch.
    pub modified_at: u64,
}

impl Document {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// The folder containing this document (empty for the store root).
    pub fn folder(&self) -> &str {
        folder_of(&self.id)
    }
}

/// Return the folder part of a `/`-separated document id.
pub fn folder_of(id: &str) -> &str {
    id.rsplit_once('/').map(|(folder, _)| folder).unwrap_or("")
}

/// Return the file stem of a `/`-separated path, e.g. `"a/b/note.md"` →
/// `"note"`.
pub fn basename(id: &str) -> &str {
    let file = id.rsplit_once('/').map(|(_, f)| f).unwrap_or(id);
    file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
}

/// Read access to the host document corpus.
pub trait DocumentStore: Send + Sync {
    /// Load a document, or `None` if it does not exist.
    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// List document ids accepted by `predicate`.
    fn list_candidates(
        &self,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>>;

    /// Cheap modification-time probe used to validate cached chunks.
    fn modified_at(&self, id: &str) -> Result<Option<u64>> {
        Ok(self.get_document(id)?.map(|doc| doc.modified_at))
    }

    /// Number of documents directly inside `folder`, if known.
    fn folder_size(&self, _folder: &str) -> Option<usize> {
        None
    }
}

/// An in-memory [`DocumentStore`], for embedding hosts and tests.
///
/// In-links are derived from the out-links of every inserted document.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    documents: HashMap<String, Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<Document> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        let mut store = Self::new();
        for doc in iter {
            store.insert(doc);
        }
        store
    }
}

impl DocumentStore for MemoryStore {
    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let Some(doc) = self.documents.get(id) else {
            return Ok(None);
        };
        let mut doc = doc.clone();
        let mut in_links: Vec<String> = self
            .documents
            .values()
            .filter(|other| {
                other.id != doc.id && other.out_links.iter().any(|l| l == id)
            })
            .map(|other| other.id.clone())
            .collect();
        in_links.extend(doc.in_links.drain(..));
        in_links.sort();
        in_links.dedup();
        doc.in_links = in_links;
        Ok(Some(doc))
    }

    fn list_candidates(
        &self,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .documents
            .keys()
            .filter(|id| predicate(id))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn modified_at(&self, id: &str) -> Result<Option<u64>> {
        Ok(self.documents.get(id).map(|doc| doc.modified_at))
    }

    fn folder_size(&self, folder: &str) -> Option<usize> {
        Some(
            self.documents
                .keys()
                .filter(|id| folder_of(id) == folder)
                .count(),
        )
    }
}
