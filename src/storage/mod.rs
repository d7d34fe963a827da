//! Local cache store backed by SQLite.
//!
//! Two tables: `sources` holds one row per mirrored source with its
//! high-water mark, `cache_entries` holds the fetched items keyed by
//! (source_id, item_index).

mod cache;
mod schema;
mod sources;
mod types;

pub use schema::Database;
pub use types::{
    CacheEntry, DatabaseError, FilterError, NewCacheEntry, QueryFilter, SaveSummary, Source,
    SourceSeed, SourceUpdate,
};
