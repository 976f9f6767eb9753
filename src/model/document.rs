use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::model::document_key::DocumentKey;
use crate::model::snapshot_version::SnapshotVersion;

/// A document body received from the watch stream, fields kept as raw wire
/// JSON. Interpreting field values is the caller's concern.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    pub version: SnapshotVersion,
    pub fields: BTreeMap<String, JsonValue>,
}

/// Authoritative record that a document does not exist at `version`.
#[derive(Clone, Debug, PartialEq)]
pub struct NoDocument {
    pub key: DocumentKey,
    pub version: SnapshotVersion,
}

/// What the server last told us about a document: either its current body or
/// its confirmed absence. A document that fell out of a target's view without
/// either statement is represented by passing no `MaybeDocument` at all.
#[derive(Clone, Debug, PartialEq)]
pub enum MaybeDocument {
    Document(Document),
    NoDocument(NoDocument),
}

impl MaybeDocument {
    pub fn key(&self) -> &DocumentKey {
        match self {
            MaybeDocument::Document(document) => &document.key,
            MaybeDocument::NoDocument(no_document) => &no_document.key,
        }
    }

    pub fn version(&self) -> SnapshotVersion {
        match self {
            MaybeDocument::Document(document) => document.version,
            MaybeDocument::NoDocument(no_document) => no_document.version,
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, MaybeDocument::Document(_))
    }
}
