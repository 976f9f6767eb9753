use crate::model::{DocumentKey, ResourcePath, TargetId};

/// The server-side shape of a listen: every query in this crate is a path,
/// either a collection (odd segment count) or a single document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    path: ResourcePath,
}

impl Query {
    pub fn new(path: ResourcePath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// True when the query names exactly one document.
    pub fn is_document_query(&self) -> bool {
        !self.path.is_empty() && self.path.len() % 2 == 0
    }

    /// The key a document query names; `None` for collection queries.
    pub fn document_key(&self) -> Option<DocumentKey> {
        DocumentKey::from_path(self.path.clone()).ok()
    }
}

/// Why a target is registered with the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryPurpose {
    /// An ordinary client listen.
    Listen,
    /// Re-listen after an existence filter disagreed with the local view.
    ExistenceFilterMismatch,
    /// A single-document target resolving a limbo document.
    LimboResolution,
}

/// Listen registration the local store tracks for a target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryData {
    pub target_id: TargetId,
    pub query: Query,
    pub purpose: QueryPurpose,
}

impl QueryData {
    pub fn new(target_id: TargetId, query: Query, purpose: QueryPurpose) -> Self {
        Self {
            target_id,
            query,
            purpose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_query_detection() {
        let collection = Query::new(ResourcePath::from_string("rooms").unwrap());
        assert!(!collection.is_document_query());
        assert!(collection.document_key().is_none());

        let document = Query::new(ResourcePath::from_string("rooms/eros").unwrap());
        assert!(document.is_document_query());
        assert_eq!(
            document.document_key().unwrap(),
            DocumentKey::from_string("rooms/eros").unwrap()
        );
    }
}
