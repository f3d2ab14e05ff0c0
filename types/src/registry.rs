//! Open-document registry.
//!
//! Pure state: maps editor-assigned identifiers to [`Document`]s and enforces
//! lifecycle ordering. It never reads or publishes diagnostics.

use std::collections::HashMap;

use thiserror::Error;

use crate::document::{ContentChange, Document, RangeError};
use crate::position::PositionEncoding;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("document already open: {0}")]
    AlreadyOpen(String),
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    #[error("version {received} of {uri} does not advance past {current}")]
    VersionRegression {
        uri: String,
        current: i32,
        received: i32,
    },
    #[error(transparent)]
    Range(#[from] RangeError),
}

impl RegistryError {
    /// Lifecycle misuse by the editor, as opposed to a bad edit range.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::Range(_))
    }
}

#[derive(Debug, Default)]
pub struct DocumentRegistry {
    documents: HashMap<String, Document>,
    encoding: PositionEncoding,
}

impl DocumentRegistry {
    /// Registry whose documents measure positions in `encoding`.
    #[must_use]
    pub fn new(encoding: PositionEncoding) -> Self {
        Self {
            documents: HashMap::new(),
            encoding,
        }
    }

    #[must_use]
    pub fn encoding(&self) -> PositionEncoding {
        self.encoding
    }

    pub fn open(
        &mut self,
        uri: &str,
        language_id: &str,
        version: i32,
        text: impl Into<String>,
    ) -> Result<&Document, RegistryError> {
        if self.documents.contains_key(uri) {
            return Err(RegistryError::AlreadyOpen(uri.to_owned()));
        }
        let document = Document::with_encoding(uri, language_id, version, text, self.encoding);
        Ok(&*self.documents.entry(uri.to_owned()).or_insert(document))
    }

    /// Apply `changes` in order and move the document to `version`.
    ///
    /// `version` must be strictly greater than the current one. On any error
    /// the document is left as it was.
    pub fn update(
        &mut self,
        uri: &str,
        version: i32,
        changes: Vec<ContentChange>,
    ) -> Result<&Document, RegistryError> {
        let document = self
            .documents
            .get_mut(uri)
            .ok_or_else(|| RegistryError::UnknownDocument(uri.to_owned()))?;
        if version <= document.version() {
            return Err(RegistryError::VersionRegression {
                uri: uri.to_owned(),
                current: document.version(),
                received: version,
            });
        }
        document.apply_changes(changes)?;
        document.set_version(version);
        Ok(&*document)
    }

    /// Remove and return the document.
    pub fn close(&mut self, uri: &str) -> Result<Document, RegistryError> {
        self.documents
            .remove(uri)
            .ok_or_else(|| RegistryError::UnknownDocument(uri.to_owned()))
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&Document> {
        self.documents.get(uri)
    }

    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        self.documents.contains_key(uri)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
