//! Client-side watch stream aggregation for a document sync service.
//!
//! The server interleaves listen events for many targets on one stream. This
//! crate batches them between snapshot boundaries and flushes a consolidated
//! [`RemoteEvent`] per boundary: per-target added/modified/removed document
//! sets, resume tokens, current flags, accumulated document bodies, and the
//! set of resolved limbo documents.
//!
//! The entry point is [`WatchChangeAggregator`], fed with decoded
//! [`WatchChange`] records (see [`remote::watch_change::decode_watch_change`]
//! for the wire side) and drained with
//! [`WatchChangeAggregator::create_remote_event`] whenever the server signals
//! a consistent snapshot.

pub mod error;
pub mod model;
pub mod query;
pub mod remote;
pub mod util;

#[doc(inline)]
pub use error::{SyncError, SyncErrorCode, SyncResult};

#[doc(inline)]
pub use model::{
    Document, DocumentKey, MaybeDocument, NoDocument, ResourcePath, SnapshotVersion, TargetId,
    Timestamp,
};

#[doc(inline)]
pub use query::{Query, QueryData, QueryPurpose};

#[doc(inline)]
pub use remote::{
    decode_watch_change, DocumentChange, ExistenceFilterChange, RemoteEvent, TargetChange,
    TargetChangeState, TargetMetadataProvider, WatchChange, WatchChangeAggregator,
    WatchSerializer, WatchTargetChange,
};
