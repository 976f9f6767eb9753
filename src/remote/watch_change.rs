use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{
    deadline_exceeded, internal_error, invalid_argument, not_found, permission_denied,
    resource_exhausted, unauthenticated, unavailable, SyncError, SyncResult,
};
use crate::model::{Document, DocumentKey, MaybeDocument, NoDocument, SnapshotVersion, TargetId};
use crate::remote::serializer::WatchSerializer;

/// One record from the watch stream, already lifted out of the wire format.
#[derive(Debug, Clone)]
pub enum WatchChange {
    TargetChange(WatchTargetChange),
    DocumentChange(DocumentChange),
    ExistenceFilter(ExistenceFilterChange),
}

/// Server statement about one or more targets.
#[derive(Debug, Clone)]
pub struct WatchTargetChange {
    pub state: TargetChangeState,
    /// Targets the statement applies to. Empty means every known target.
    pub target_ids: Vec<TargetId>,
    /// Opaque resumption token; empty when the server sent none.
    pub resume_token: Vec<u8>,
    pub cause: Option<SyncError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChangeState {
    NoChange,
    Added,
    Removed,
    Current,
    Reset,
}

/// A document entering or leaving the view of one or more targets.
///
/// `new_document` distinguishes three cases: an updated body, an
/// authoritative deletion (`NoDocument`), or, when absent, a document that
/// fell out of view without the server saying what became of it.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub updated_target_ids: Vec<TargetId>,
    pub removed_target_ids: Vec<TargetId>,
    pub key: DocumentKey,
    pub new_document: Option<MaybeDocument>,
}

/// Cardinality hint for a target; compared against the aggregator's current
/// size by the upstream stream handler.
#[derive(Debug, Clone)]
pub struct ExistenceFilterChange {
    pub target_id: TargetId,
    pub count: i32,
}

#[derive(Debug, Deserialize)]
struct StatusCause {
    code: i32,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes one listen response body into a [`WatchChange`], or `None` for
/// response kinds this client does not consume.
pub fn decode_watch_change(
    serializer: &WatchSerializer,
    value: &JsonValue,
) -> SyncResult<Option<WatchChange>> {
    if let Some(target_change) = value.get("targetChange") {
        return decode_target_change(target_change).map(Some);
    }

    if let Some(document_change) = value.get("documentChange") {
        return decode_document_change(serializer, document_change).map(Some);
    }

    if let Some(document_delete) = value.get("documentDelete") {
        return decode_document_delete(serializer, document_delete).map(Some);
    }

    if let Some(document_remove) = value.get("documentRemove") {
        return decode_document_remove(serializer, document_remove).map(Some);
    }

    if let Some(filter) = value.get("filter") {
        return decode_filter_change(filter).map(Some);
    }

    Ok(None)
}

fn decode_target_change(value: &JsonValue) -> SyncResult<WatchChange> {
    let target_ids = numeric_array(value.get("targetIds"));

    let resume_token = value
        .get("resumeToken")
        .and_then(JsonValue::as_str)
        .and_then(|token| BASE64_STANDARD.decode(token).ok())
        .unwrap_or_default();

    let state = match value.get("targetChangeType").and_then(JsonValue::as_str) {
        None | Some("NO_CHANGE") => TargetChangeState::NoChange,
        Some("ADD") => TargetChangeState::Added,
        Some("REMOVE") => TargetChangeState::Removed,
        Some("CURRENT") => TargetChangeState::Current,
        Some("RESET") => TargetChangeState::Reset,
        Some(other) => {
            return Err(invalid_argument(format!(
                "Unknown targetChangeType: {other}"
            )))
        }
    };

    let cause = value
        .get("cause")
        .map(|cause| serde_json::from_value::<StatusCause>(cause.clone()))
        .transpose()
        .map_err(|err| internal_error(format!("Failed to decode watch cause: {err}")))?
        .map(|cause| map_grpc_status(cause.code, cause.message));

    Ok(WatchChange::TargetChange(WatchTargetChange {
        state,
        target_ids,
        resume_token,
        cause,
    }))
}

fn decode_document_change(
    serializer: &WatchSerializer,
    value: &JsonValue,
) -> SyncResult<WatchChange> {
    let document = value
        .get("document")
        .ok_or_else(|| invalid_argument("documentChange missing document"))?;
    let name = document
        .get("name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument("Watch document missing name"))?;
    let key = serializer.document_key_from_name(name)?;

    let fields = document
        .get("fields")
        .and_then(JsonValue::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    let version = document
        .get("updateTime")
        .and_then(JsonValue::as_str)
        .map(|timestamp| serializer.decode_version_string(timestamp))
        .transpose()?
        .unwrap_or(SnapshotVersion::NONE);

    Ok(WatchChange::DocumentChange(DocumentChange {
        updated_target_ids: numeric_array(value.get("targetIds")),
        removed_target_ids: numeric_array(value.get("removedTargetIds")),
        key: key.clone(),
        new_document: Some(MaybeDocument::Document(Document {
            key,
            version,
            fields,
        })),
    }))
}

fn decode_document_delete(
    serializer: &WatchSerializer,
    value: &JsonValue,
) -> SyncResult<WatchChange> {
    let name = value
        .get("document")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument("documentDelete missing document"))?;
    let key = serializer.document_key_from_name(name)?;
    let version = value
        .get("readTime")
        .and_then(JsonValue::as_str)
        .map(|timestamp| serializer.decode_version_string(timestamp))
        .transpose()?
        .unwrap_or(SnapshotVersion::NONE);

    Ok(WatchChange::DocumentChange(DocumentChange {
        updated_target_ids: Vec::new(),
        removed_target_ids: numeric_array(value.get("removedTargetIds")),
        key: key.clone(),
        new_document: Some(MaybeDocument::NoDocument(NoDocument { key, version })),
    }))
}

fn decode_document_remove(
    serializer: &WatchSerializer,
    value: &JsonValue,
) -> SyncResult<WatchChange> {
    let name = value
        .get("document")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument("documentRemove missing document"))?;
    let key = serializer.document_key_from_name(name)?;

    Ok(WatchChange::DocumentChange(DocumentChange {
        updated_target_ids: Vec::new(),
        removed_target_ids: numeric_array(value.get("removedTargetIds")),
        key,
        new_document: None,
    }))
}

fn decode_filter_change(value: &JsonValue) -> SyncResult<WatchChange> {
    let target_id = value
        .get("targetId")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| invalid_argument("filter missing targetId"))? as TargetId;
    let count = value
        .get("count")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| invalid_argument("filter missing count"))? as i32;
    Ok(WatchChange::ExistenceFilter(ExistenceFilterChange {
        target_id,
        count,
    }))
}

fn numeric_array(value: Option<&JsonValue>) -> Vec<TargetId> {
    value
        .and_then(JsonValue::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_i64().map(|value| value as TargetId))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn map_grpc_status(code: i32, message: Option<String>) -> SyncError {
    let message = message.unwrap_or_else(|| "watch stream error".to_string());
    match code {
        3 => invalid_argument(message),
        4 => deadline_exceeded(message),
        5 => not_found(message),
        7 => permission_denied(message),
        8 => resource_exhausted(message),
        13 => internal_error(message),
        14 => unavailable(message),
        16 => unauthenticated(message),
        _ => internal_error(message),
    }
}
