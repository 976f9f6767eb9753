use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::debug;

use crate::model::{DocumentKey, MaybeDocument, NoDocument, SnapshotVersion, TargetId};
use crate::query::{QueryData, QueryPurpose};
use crate::remote::remote_event::{RemoteEvent, TargetChange};
use crate::remote::watch_change::{DocumentChange, TargetChangeState, WatchTargetChange};
use crate::util::hard_assert;

/// Read access to the collaborator state the aggregator needs: the listen
/// registration for a target and the document keys the local store matched to
/// it in the last raised snapshot.
pub trait TargetMetadataProvider: Send + Sync {
    /// The current registration for the target, or `None` once the user has
    /// stopped listening. A `None` renders the target inert: its pending
    /// changes are retained but never emitted.
    fn query_data_for_target(&self, target_id: TargetId) -> Option<QueryData>;

    /// Keys the local store believes the target matched as of the last
    /// emitted snapshot.
    fn remote_keys_for_target(&self, target_id: TargetId) -> BTreeSet<DocumentKey>;
}

impl TargetMetadataProvider for () {
    fn query_data_for_target(&self, _target_id: TargetId) -> Option<QueryData> {
        None
    }

    fn remote_keys_for_target(&self, _target_id: TargetId) -> BTreeSet<DocumentKey> {
        BTreeSet::new()
    }
}

/// Accumulates watch stream records between snapshot boundaries and turns
/// them into [`RemoteEvent`]s.
///
/// One instance per watch stream; all methods run on the stream's event loop
/// and never suspend.
pub struct WatchChangeAggregator<P = ()>
where
    P: TargetMetadataProvider,
{
    metadata: Arc<P>,
    target_states: HashMap<TargetId, TargetState>,
    /// Document bodies accumulated since the last emission.
    pending_document_updates: BTreeMap<DocumentKey, MaybeDocument>,
    /// Reverse index of which targets claimed a key in this batch; consulted
    /// only when computing resolved limbo documents at emission time.
    pending_document_target_mapping: BTreeMap<DocumentKey, BTreeSet<TargetId>>,
}

impl<P> WatchChangeAggregator<P>
where
    P: TargetMetadataProvider + 'static,
{
    pub fn new(metadata: Arc<P>) -> Self {
        Self {
            metadata,
            target_states: HashMap::new(),
            pending_document_updates: BTreeMap::new(),
            pending_document_target_mapping: BTreeMap::new(),
        }
    }

    /// Applies a document change to every target it names. Updates are
    /// applied to `updated_target_ids` in order, then removals to
    /// `removed_target_ids`.
    pub fn handle_document_change(&mut self, change: &DocumentChange) {
        for &target_id in &change.updated_target_ids {
            match change.new_document.as_ref() {
                Some(document @ MaybeDocument::Document(_)) => {
                    self.add_document_to_target(target_id, document.clone());
                }
                Some(document @ MaybeDocument::NoDocument(_)) => {
                    self.remove_document_from_target(target_id, &change.key, Some(document.clone()));
                }
                None => {
                    self.remove_document_from_target(target_id, &change.key, None);
                }
            }
        }

        for &target_id in &change.removed_target_ids {
            self.remove_document_from_target(target_id, &change.key, None);
        }
    }

    /// Applies a target-state statement from the server.
    ///
    /// Panics if an errored `Removed` change reaches the aggregator; the
    /// stream handler must surface the error and unregister the target
    /// instead of forwarding the change.
    pub fn handle_target_change(&mut self, change: &WatchTargetChange) {
        for target_id in self.affected_target_ids(&change.target_ids) {
            match change.state {
                TargetChangeState::NoChange => {
                    if self.is_active_target(target_id) {
                        let state = self.ensure_target_state(target_id);
                        state.update_resume_token(&change.resume_token);
                    }
                }
                TargetChangeState::Added => {
                    // One listen ack consumed; a fresh add resets whatever
                    // snapshot state the previous incarnation accumulated.
                    self.record_target_response(target_id);
                    let state = self.ensure_target_state(target_id);
                    if !state.is_pending() {
                        state.clear_pending_changes();
                    }
                    state.update_resume_token(&change.resume_token);
                }
                TargetChangeState::Removed => {
                    self.record_target_response(target_id);
                    hard_assert(
                        change.cause.is_none(),
                        "watch change aggregator does not handle errored targets",
                    );
                }
                TargetChangeState::Current => {
                    if self.is_active_target(target_id) {
                        let state = self.ensure_target_state(target_id);
                        state.current = true;
                        state.update_resume_token(&change.resume_token);
                    }
                }
                TargetChangeState::Reset => {
                    if self.is_active_target(target_id) {
                        self.reset_target(target_id);
                        let state = self.ensure_target_state(target_id);
                        state.update_resume_token(&change.resume_token);
                    }
                }
            }
        }
    }

    /// Resets a target whose existence filter disagreed with
    /// [`Self::current_size`]. The comparison itself happens upstream.
    pub fn handle_existence_filter_mismatch(&mut self, target_id: TargetId) {
        debug!("existence filter mismatch for target {target_id}, resetting");
        self.reset_target(target_id);
    }

    /// Records that a listen or unlisten request went out for the target, so
    /// the matching `Added`/`Removed` ack can be balanced against it. The
    /// target stays inactive until all outstanding acks arrive.
    pub fn record_pending_target_request(&mut self, target_id: TargetId) {
        let state = self.ensure_target_state(target_id);
        state.pending_responses += 1;
    }

    /// Number of documents the target matches from the local store's point of
    /// view, adjusted by the changes pending in this batch. Compared against
    /// existence filter counts upstream.
    pub fn current_size(&self, target_id: TargetId) -> i32 {
        let mut size = self.metadata.remote_keys_for_target(target_id).len() as i32;
        if let Some(state) = self.target_states.get(&target_id) {
            for change_type in state.snapshot_changes.values() {
                match change_type {
                    DocumentChangeType::Added => size += 1,
                    DocumentChangeType::Modified => {}
                    DocumentChangeType::Removed => size -= 1,
                }
            }
        }
        size
    }

    /// Flushes the batch into a [`RemoteEvent`] at the given snapshot
    /// version. Per-target snapshot state is cleared for every emitted
    /// target; `current`, resume tokens, and pending ack counts persist.
    pub fn create_remote_event(&mut self, snapshot_version: SnapshotVersion) -> RemoteEvent {
        let mut target_changes = BTreeMap::new();
        let mut target_ids: Vec<TargetId> = self.target_states.keys().copied().collect();
        target_ids.sort_unstable();

        for target_id in target_ids {
            let Some(query_data) = self.query_data_for_active_target(target_id) else {
                continue;
            };

            // A document query that is current with no pending changes and no
            // sign of the document means the document does not exist: put a
            // synthesized delete in this event so the local cache drops it.
            if self.should_synthesize_document_delete(target_id, &query_data) {
                if let Some(key) = query_data.query.document_key() {
                    self.synthesize_document_delete(target_id, key, snapshot_version);
                }
            }

            if let Some(state) = self.target_states.get_mut(&target_id) {
                target_changes.insert(target_id, state.take_target_change(snapshot_version));
            }
        }

        let mut resolved_limbo_documents = BTreeSet::new();
        for (key, target_ids) in &self.pending_document_target_mapping {
            let mut is_only_limbo_target = true;
            for &target_id in target_ids {
                if let Some(query_data) = self.query_data_for_active_target(target_id) {
                    if query_data.purpose != QueryPurpose::LimboResolution {
                        is_only_limbo_target = false;
                        break;
                    }
                }
            }
            if is_only_limbo_target {
                resolved_limbo_documents.insert(key.clone());
            }
        }

        let event = RemoteEvent {
            snapshot_version,
            target_changes,
            resolved_limbo_documents,
            document_updates: std::mem::take(&mut self.pending_document_updates),
        };
        self.pending_document_target_mapping.clear();

        debug!(
            "emitted remote event with {} target changes, {} document updates",
            event.target_changes.len(),
            event.document_updates.len()
        );
        event
    }

    fn add_document_to_target(&mut self, target_id: TargetId, document: MaybeDocument) {
        if !self.is_active_target(target_id) {
            return;
        }

        let key = document.key().clone();
        let change_type = if self.target_contains_document(target_id, &key) {
            DocumentChangeType::Modified
        } else {
            DocumentChangeType::Added
        };

        let state = self.ensure_target_state(target_id);
        state.add_document_change(key.clone(), change_type);
        self.pending_document_updates.insert(key.clone(), document);
        self.ensure_document_target_mapping(&key).insert(target_id);
    }

    fn remove_document_from_target(
        &mut self,
        target_id: TargetId,
        key: &DocumentKey,
        removed_document: Option<MaybeDocument>,
    ) {
        if !self.is_active_target(target_id) {
            return;
        }

        let contains = self.target_contains_document(target_id, key);
        let state = self.ensure_target_state(target_id);
        if contains {
            state.add_document_change(key.clone(), DocumentChangeType::Removed);
        } else {
            // The document entered and left the target within this batch, so
            // the two changes cancel.
            state.remove_document_change(key);
        }

        self.ensure_document_target_mapping(key).remove(&target_id);
        if let Some(document) = removed_document {
            self.pending_document_updates.insert(key.clone(), document);
        }
    }

    /// Discards the target's state and queues a synthetic removal for every
    /// key the local store matched to it, so documents the server does not
    /// re-send after the reset get dropped.
    fn reset_target(&mut self, target_id: TargetId) {
        self.target_states.remove(&target_id);
        for key in self.metadata.remote_keys_for_target(target_id) {
            self.remove_document_from_target(target_id, &key, None);
        }
    }

    fn should_synthesize_document_delete(
        &self,
        target_id: TargetId,
        query_data: &QueryData,
    ) -> bool {
        if !query_data.query.is_document_query() {
            return false;
        }
        let Some(state) = self.target_states.get(&target_id) else {
            return false;
        };
        if !state.current || !state.snapshot_changes.is_empty() {
            return false;
        }
        let Some(key) = query_data.query.document_key() else {
            return false;
        };
        !self.pending_document_updates.contains_key(&key)
            && !self.target_contains_document(target_id, &key)
    }

    fn synthesize_document_delete(
        &mut self,
        target_id: TargetId,
        key: DocumentKey,
        snapshot_version: SnapshotVersion,
    ) {
        let state = self.ensure_target_state(target_id);
        state.add_document_change(key.clone(), DocumentChangeType::Removed);
        self.pending_document_updates.insert(
            key.clone(),
            MaybeDocument::NoDocument(NoDocument {
                key: key.clone(),
                version: snapshot_version,
            }),
        );
        self.ensure_document_target_mapping(&key).remove(&target_id);
    }

    /// Targets a [`WatchTargetChange`] names; an empty list addresses every
    /// target the aggregator currently knows about.
    fn affected_target_ids(&self, target_ids: &[TargetId]) -> Vec<TargetId> {
        if target_ids.is_empty() {
            self.target_states.keys().copied().collect()
        } else {
            target_ids.to_vec()
        }
    }

    fn record_target_response(&mut self, target_id: TargetId) {
        let state = self.ensure_target_state(target_id);
        state.pending_responses -= 1;
    }

    fn ensure_target_state(&mut self, target_id: TargetId) -> &mut TargetState {
        self.target_states.entry(target_id).or_default()
    }

    fn ensure_document_target_mapping(&mut self, key: &DocumentKey) -> &mut BTreeSet<TargetId> {
        self.pending_document_target_mapping
            .entry(key.clone())
            .or_default()
    }

    /// The target's registration, provided it has no outstanding acks and the
    /// user is still listening.
    fn query_data_for_active_target(&self, target_id: TargetId) -> Option<QueryData> {
        match self.target_states.get(&target_id) {
            Some(state) if state.is_pending() => None,
            _ => self.metadata.query_data_for_target(target_id),
        }
    }

    fn is_active_target(&self, target_id: TargetId) -> bool {
        self.query_data_for_active_target(target_id).is_some()
    }

    fn target_contains_document(&self, target_id: TargetId, key: &DocumentKey) -> bool {
        self.metadata.remote_keys_for_target(target_id).contains(key)
    }
}

/// Pending change recorded for a document within one target's batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DocumentChangeType {
    Added,
    Modified,
    Removed,
}

/// Book-keeping for one target between snapshot boundaries.
#[derive(Default)]
struct TargetState {
    /// Listen/unlisten acks still owed by the server. The target is inactive
    /// while any are outstanding. Callers balance requests and responses; no
    /// clamping is done here.
    pending_responses: i32,
    current: bool,
    resume_token: Vec<u8>,
    snapshot_changes: BTreeMap<DocumentKey, DocumentChangeType>,
}

impl TargetState {
    fn is_pending(&self) -> bool {
        self.pending_responses != 0
    }

    /// Only non-empty tokens overwrite; an empty token is silently dropped.
    fn update_resume_token(&mut self, token: &[u8]) {
        if !token.is_empty() {
            self.resume_token = token.to_vec();
        }
    }

    fn clear_pending_changes(&mut self) {
        self.current = false;
        self.snapshot_changes.clear();
    }

    fn add_document_change(&mut self, key: DocumentKey, change_type: DocumentChangeType) {
        self.snapshot_changes.insert(key, change_type);
    }

    fn remove_document_change(&mut self, key: &DocumentKey) {
        self.snapshot_changes.remove(key);
    }

    /// Splits the pending changes into the emitted per-type sets and clears
    /// them; `current` and the resume token persist across emissions.
    fn take_target_change(&mut self, snapshot_version: SnapshotVersion) -> TargetChange {
        let mut added_documents = BTreeSet::new();
        let mut modified_documents = BTreeSet::new();
        let mut removed_documents = BTreeSet::new();

        for (key, change_type) in std::mem::take(&mut self.snapshot_changes) {
            match change_type {
                DocumentChangeType::Added => added_documents.insert(key),
                DocumentChangeType::Modified => modified_documents.insert(key),
                DocumentChangeType::Removed => removed_documents.insert(key),
            };
        }

        TargetChange {
            current: self.current,
            resume_token: self.resume_token.clone(),
            snapshot_version,
            added_documents,
            modified_documents,
            removed_documents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, ResourcePath, Timestamp};
    use crate::query::Query;
    use std::sync::Mutex;

    struct TestMetadata {
        queries: Mutex<BTreeMap<TargetId, QueryData>>,
        remote_keys: Mutex<BTreeMap<TargetId, BTreeSet<DocumentKey>>>,
    }

    impl TestMetadata {
        fn new() -> Self {
            Self {
                queries: Mutex::new(BTreeMap::new()),
                remote_keys: Mutex::new(BTreeMap::new()),
            }
        }

        fn listen(&self, target_id: TargetId, path: &str, purpose: QueryPurpose) {
            let query = Query::new(ResourcePath::from_string(path).unwrap());
            self.queries
                .lock()
                .unwrap()
                .insert(target_id, QueryData::new(target_id, query, purpose));
        }

        fn set_remote_keys(&self, target_id: TargetId, keys: &[&str]) {
            let keys = keys
                .iter()
                .map(|key| DocumentKey::from_string(key).unwrap())
                .collect();
            self.remote_keys.lock().unwrap().insert(target_id, keys);
        }
    }

    impl TargetMetadataProvider for TestMetadata {
        fn query_data_for_target(&self, target_id: TargetId) -> Option<QueryData> {
            self.queries.lock().unwrap().get(&target_id).cloned()
        }

        fn remote_keys_for_target(&self, target_id: TargetId) -> BTreeSet<DocumentKey> {
            self.remote_keys
                .lock()
                .unwrap()
                .get(&target_id)
                .cloned()
                .unwrap_or_default()
        }
    }

    fn doc(path: &str, seconds: i64) -> MaybeDocument {
        MaybeDocument::Document(Document {
            key: DocumentKey::from_string(path).unwrap(),
            version: SnapshotVersion::new(Timestamp::new(seconds, 0)),
            fields: BTreeMap::new(),
        })
    }

    fn target_change(
        state: TargetChangeState,
        target_ids: Vec<TargetId>,
        token: &[u8],
    ) -> WatchTargetChange {
        WatchTargetChange {
            state,
            target_ids,
            resume_token: token.to_vec(),
            cause: None,
        }
    }

    fn version(seconds: i64) -> SnapshotVersion {
        SnapshotVersion::new(Timestamp::new(seconds, 0))
    }

    #[test]
    fn aggregates_document_changes() {
        let metadata = Arc::new(TestMetadata::new());
        metadata.listen(1, "rooms", QueryPurpose::Listen);
        let mut aggregator = WatchChangeAggregator::new(Arc::clone(&metadata));

        aggregator.handle_document_change(&DocumentChange {
            updated_target_ids: vec![1],
            removed_target_ids: vec![],
            key: DocumentKey::from_string("rooms/eros").unwrap(),
            new_document: Some(doc("rooms/eros", 3)),
        });

        let event = aggregator.create_remote_event(version(5));
        let change = event.target_changes.get(&1).unwrap();
        assert!(change
            .added_documents
            .contains(&DocumentKey::from_string("rooms/eros").unwrap()));
        assert!(event
            .document_updates
            .contains_key(&DocumentKey::from_string("rooms/eros").unwrap()));
    }

    #[test]
    fn known_document_is_reported_modified() {
        let metadata = Arc::new(TestMetadata::new());
        metadata.listen(1, "rooms", QueryPurpose::Listen);
        metadata.set_remote_keys(1, &["rooms/eros"]);
        let mut aggregator = WatchChangeAggregator::new(Arc::clone(&metadata));

        aggregator.handle_document_change(&DocumentChange {
            updated_target_ids: vec![1],
            removed_target_ids: vec![],
            key: DocumentKey::from_string("rooms/eros").unwrap(),
            new_document: Some(doc("rooms/eros", 3)),
        });

        let event = aggregator.create_remote_event(version(5));
        let change = event.target_changes.get(&1).unwrap();
        assert!(change
            .modified_documents
            .contains(&DocumentKey::from_string("rooms/eros").unwrap()));
        assert!(change.added_documents.is_empty());
    }

    #[test]
    fn broadcast_target_change_applies_to_all_known_targets() {
        let metadata = Arc::new(TestMetadata::new());
        metadata.listen(1, "rooms", QueryPurpose::Listen);
        metadata.listen(2, "users", QueryPurpose::Listen);
        let mut aggregator = WatchChangeAggregator::new(Arc::clone(&metadata));

        aggregator.handle_target_change(&target_change(TargetChangeState::Current, vec![1], b""));
        aggregator.handle_target_change(&target_change(TargetChangeState::Current, vec![2], b""));
        // Empty target list: the token goes to both targets.
        aggregator.handle_target_change(&target_change(TargetChangeState::NoChange, vec![], b"tok"));

        let event = aggregator.create_remote_event(version(5));
        assert_eq!(event.target_changes.get(&1).unwrap().resume_token, b"tok");
        assert_eq!(event.target_changes.get(&2).unwrap().resume_token, b"tok");
    }

    #[test]
    fn empty_resume_token_does_not_overwrite() {
        let metadata = Arc::new(TestMetadata::new());
        metadata.listen(1, "rooms", QueryPurpose::Listen);
        let mut aggregator = WatchChangeAggregator::new(Arc::clone(&metadata));

        aggregator.handle_target_change(&target_change(TargetChangeState::Current, vec![1], b"t1"));
        aggregator.handle_target_change(&target_change(TargetChangeState::NoChange, vec![1], b""));

        let event = aggregator.create_remote_event(version(5));
        assert_eq!(event.target_changes.get(&1).unwrap().resume_token, b"t1");
    }

    #[test]
    #[should_panic(expected = "errored targets")]
    fn errored_target_removal_is_fatal() {
        let metadata = Arc::new(TestMetadata::new());
        metadata.listen(1, "rooms", QueryPurpose::Listen);
        let mut aggregator = WatchChangeAggregator::new(Arc::clone(&metadata));

        aggregator.handle_target_change(&WatchTargetChange {
            state: TargetChangeState::Removed,
            target_ids: vec![1],
            resume_token: Vec::new(),
            cause: Some(crate::error::permission_denied("denied")),
        });
    }

    #[test]
    fn existence_filter_mismatch_resets_target() {
        let metadata = Arc::new(TestMetadata::new());
        metadata.listen(1, "rooms", QueryPurpose::Listen);
        metadata.set_remote_keys(1, &["rooms/eros", "rooms/psyche"]);
        let mut aggregator = WatchChangeAggregator::new(Arc::clone(&metadata));

        aggregator.handle_target_change(&target_change(TargetChangeState::Current, vec![1], b"t"));
        assert_eq!(aggregator.current_size(1), 2);

        aggregator.handle_existence_filter_mismatch(1);

        let event = aggregator.create_remote_event(version(5));
        let change = event.target_changes.get(&1).unwrap();
        assert!(!change.current);
        assert_eq!(change.removed_documents.len(), 2);
    }

    #[test]
    fn current_size_reflects_pending_changes() {
        let metadata = Arc::new(TestMetadata::new());
        metadata.listen(1, "rooms", QueryPurpose::Listen);
        metadata.set_remote_keys(1, &["rooms/eros"]);
        let mut aggregator = WatchChangeAggregator::new(Arc::clone(&metadata));

        aggregator.handle_document_change(&DocumentChange {
            updated_target_ids: vec![1],
            removed_target_ids: vec![],
            key: DocumentKey::from_string("rooms/psyche").unwrap(),
            new_document: Some(doc("rooms/psyche", 2)),
        });
        assert_eq!(aggregator.current_size(1), 2);

        aggregator.handle_document_change(&DocumentChange {
            updated_target_ids: vec![],
            removed_target_ids: vec![1],
            key: DocumentKey::from_string("rooms/eros").unwrap(),
            new_document: None,
        });
        assert_eq!(aggregator.current_size(1), 1);
    }
}
