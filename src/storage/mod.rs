pub mod cache;
pub mod sqlite;
pub mod traits;

pub use cache::{CacheEntry, CacheStats, ListingCache};
pub use sqlite::SqliteFilterStore;
pub use traits::{
    Filter, FilterStore, MemoryFilterStore, RemoveOutcome, StoreStats, Subscription,
    SubscriptionFilters, UpsertResult,
};
