pub mod document;
pub mod document_key;
pub mod resource_path;
pub mod snapshot_version;
pub mod timestamp;

pub use document::{Document, MaybeDocument, NoDocument};
pub use document_key::DocumentKey;
pub use resource_path::ResourcePath;
pub use snapshot_version::SnapshotVersion;
pub use timestamp::Timestamp;

/// Client-assigned identifier of a listening target. Always positive.
pub type TargetId = i32;
