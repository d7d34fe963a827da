use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// No live (non-deleted) source matches the given slug or id
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Another process holds a lock on the database file
    #[error("The cache database is locked by another process. Please try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored payload or date could not be decoded
    #[error("Corrupt cache row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }

    /// True when the error means the caller asked for a source that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::SourceNotFound(_))
    }
}

/// Errors raised while building a [`QueryFilter`] from request input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Year must be between 1 and 9999, got {0}")]
    InvalidYear(i64),
}

// ============================================================================
// Input Types
// ============================================================================

/// A source row to create or refresh at startup, keyed by slug.
#[derive(Debug, Clone)]
pub struct SourceSeed {
    pub slug: String,
    pub name: String,
}

/// Partial update merged into an existing source row.
///
/// `None` fields are left untouched. `latest_index` is merged with `MAX` so
/// the stored high-water mark never moves backwards.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub id: i64,
    pub name: Option<String>,
    pub latest_index: Option<i64>,
}

impl SourceUpdate {
    pub fn latest_index(id: i64, latest_index: i64) -> Self {
        Self {
            id,
            latest_index: Some(latest_index),
            ..Self::default()
        }
    }
}

/// A fetched item ready to be written to the cache.
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub source_id: i64,
    pub item_index: i64,
    pub item: Value,
    pub dated_at: NaiveDate,
}

/// Outcome of a bulk insert.
///
/// `rejected` counts rows refused by the `UNIQUE(source_id, item_index)`
/// constraint, which happens when another cycle stored the same index first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub inserted: u64,
    pub rejected: u64,
}

/// Immutable read filter, built once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryFilter {
    offset: u32,
    limit: u32,
    year: Option<i32>,
}

impl QueryFilter {
    pub const DEFAULT_LIMIT: u32 = 25;

    /// Build a filter from optional request parameters.
    ///
    /// Missing values fall back to offset 0, `default_limit` and no year.
    pub fn new(
        offset: Option<u32>,
        limit: Option<u32>,
        year: Option<i64>,
        default_limit: u32,
    ) -> Result<Self, FilterError> {
        let year = match year {
            Some(y) if !(1..=9999).contains(&y) => return Err(FilterError::InvalidYear(y)),
            Some(y) => Some(y as i32),
            None => None,
        };
        Ok(Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(default_limit),
            year,
        })
    }

    pub fn with_offset(self, offset: u32) -> Self {
        Self { offset, ..self }
    }

    pub fn with_limit(self, limit: u32) -> Self {
        Self { limit, ..self }
    }

    pub fn with_year(self, year: i32) -> Self {
        Self {
            year: Some(year),
            ..self
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
            year: None,
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for source queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceDbRow {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub latest_index: i64,
    pub check_at: Option<String>,
    pub last_updated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SourceDbRow {
    pub(crate) fn into_source(self) -> Source {
        Source {
            id: self.id,
            name: self.name,
            slug: self.slug,
            latest_index: self.latest_index,
            check_at: self.check_at,
            last_updated_at: self.last_updated_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Internal row type for cache entry queries.
/// Payload and date are stored as text and decoded in `into_entry()`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CacheEntryDbRow {
    pub id: i64,
    pub source_id: i64,
    pub item_index: i64,
    pub item: String,
    pub dated_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CacheEntryDbRow {
    pub(crate) fn into_entry(self) -> Result<CacheEntry, DatabaseError> {
        let item = serde_json::from_str(&self.item).map_err(|e| DatabaseError::CorruptRow {
            id: self.id,
            reason: format!("invalid payload: {e}"),
        })?;
        let dated_at = NaiveDate::parse_from_str(&self.dated_at, DATE_FORMAT).map_err(|e| {
            DatabaseError::CorruptRow {
                id: self.id,
                reason: format!("invalid date '{}': {e}", self.dated_at),
            }
        })?;
        Ok(CacheEntry {
            id: self.id,
            source_id: self.source_id,
            item_index: self.item_index,
            item,
            dated_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Storage format for `cache_entries.dated_at`
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Data Structures
// ============================================================================

/// A mirrored remote source.
///
/// Timestamps are SQLite `datetime('now')` strings (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub slug: String,
    /// Highest item index known to be stored for this source (0 when empty)
    pub latest_index: i64,
    /// Last successful remote probe
    pub check_at: Option<String>,
    /// Last time `latest_index` advanced
    pub last_updated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One cached remote item.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: i64,
    pub source_id: i64,
    pub item_index: i64,
    /// Raw document as fetched from the remote source
    pub item: Value,
    pub dated_at: NaiveDate,
    pub created_at: String,
    pub updated_at: String,
}
