pub mod remote_event;
pub mod serializer;
pub mod watch_change;
pub mod watch_change_aggregator;

pub use remote_event::{RemoteEvent, TargetChange};
pub use serializer::WatchSerializer;
pub use watch_change::{
    decode_watch_change, DocumentChange, ExistenceFilterChange, TargetChangeState, WatchChange,
    WatchTargetChange,
};
pub use watch_change_aggregator::{TargetMetadataProvider, WatchChangeAggregator};
