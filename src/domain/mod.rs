pub mod item;
pub mod record;
pub mod server;
pub mod state;

pub use item::{Chapter, Detail, Item, ItemKey, Summary};
pub use record::{CollectionRecord, HistoryRecord};
pub use server::{normalize_source_id, Server};
pub use state::{FreshnessState, SyncPhase, SyncState};
