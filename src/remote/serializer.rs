use chrono::{DateTime, Utc};

use crate::error::{invalid_argument, SyncResult};
use crate::model::{DocumentKey, SnapshotVersion, Timestamp};

/// Translates between the listen wire format and the crate's model types.
///
/// Document names on the wire are fully qualified, e.g.
/// `databases/main/documents/rooms/eros`; the serializer owns the database
/// prefix so the rest of the crate only ever sees relative [`DocumentKey`]s.
#[derive(Clone, Debug)]
pub struct WatchSerializer {
    database_name: String,
}

impl WatchSerializer {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database_name: format!("databases/{}", database.into()),
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn document_name(&self, key: &DocumentKey) -> String {
        format!(
            "{}/documents/{}",
            self.database_name,
            key.path().canonical_string()
        )
    }

    pub fn document_key_from_name(&self, name: &str) -> SyncResult<DocumentKey> {
        let prefix = format!("{}/documents/", self.database_name);
        let relative = name.strip_prefix(&prefix).ok_or_else(|| {
            invalid_argument(format!(
                "Document name {name} is not under {}",
                self.database_name
            ))
        })?;
        DocumentKey::from_string(relative)
    }

    pub fn decode_timestamp_string(&self, raw: &str) -> SyncResult<Timestamp> {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|err| invalid_argument(format!("Invalid timestamp {raw}: {err}")))?
            .with_timezone(&Utc);
        Ok(Timestamp::new(
            parsed.timestamp(),
            parsed.timestamp_subsec_nanos() as i32,
        ))
    }

    pub fn decode_version_string(&self, raw: &str) -> SyncResult<SnapshotVersion> {
        self.decode_timestamp_string(raw).map(SnapshotVersion::new)
    }
}
