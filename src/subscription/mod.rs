// Push subscriptions to the host: linked entity states and the date range selector

pub mod date_range;
pub mod linked;
pub mod protocol;

pub use date_range::{DateRangeBroadcaster, RangeListener};
pub use linked::{LinkedEntityWatcher, ListenerHandle, StateListener};
pub use protocol::{HistoryStreamMessage, HistoryStreamRequest, SubscribeEntitiesRequest};
