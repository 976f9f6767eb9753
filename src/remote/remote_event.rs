use std::collections::{BTreeMap, BTreeSet};

use crate::model::{DocumentKey, MaybeDocument, SnapshotVersion, TargetId};

/// Consolidated delta for one snapshot boundary: everything the watch stream
/// reported since the previous flush, keyed per target.
#[derive(Debug, Clone, Default)]
pub struct RemoteEvent {
    pub snapshot_version: SnapshotVersion,
    pub target_changes: BTreeMap<TargetId, TargetChange>,
    /// Documents no longer referenced by any non-limbo target.
    pub resolved_limbo_documents: BTreeSet<DocumentKey>,
    pub document_updates: BTreeMap<DocumentKey, MaybeDocument>,
}

impl RemoteEvent {
    pub fn is_empty(&self) -> bool {
        self.target_changes.is_empty()
            && self.resolved_limbo_documents.is_empty()
            && self.document_updates.is_empty()
    }
}

/// Per-target slice of a [`RemoteEvent`].
#[derive(Debug, Clone, Default)]
pub struct TargetChange {
    pub current: bool,
    pub resume_token: Vec<u8>,
    pub snapshot_version: SnapshotVersion,
    pub added_documents: BTreeSet<DocumentKey>,
    pub modified_documents: BTreeSet<DocumentKey>,
    pub removed_documents: BTreeSet<DocumentKey>,
}

impl TargetChange {
    /// True when the entry carries document deltas, not just target metadata.
    pub fn has_document_changes(&self) -> bool {
        !self.added_documents.is_empty()
            || !self.modified_documents.is_empty()
            || !self.removed_documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_event_reports_empty() {
        let event = RemoteEvent::default();
        assert!(event.is_empty());
    }

    #[test]
    fn document_change_probe() {
        let mut change = TargetChange::default();
        assert!(!change.has_document_changes());
        change
            .removed_documents
            .insert(DocumentKey::from_string("rooms/eros").unwrap());
        assert!(change.has_document_changes());
    }
}
