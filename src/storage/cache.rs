use std::collections::BTreeSet;

use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    CacheEntry, CacheEntryDbRow, DatabaseError, NewCacheEntry, QueryFilter, SaveSummary,
    DATE_FORMAT,
};

/// Keeps IN (...) lists well under SQLite's 999 bind-parameter limit.
const INDEX_CHUNK_SIZE: usize = 500;

/// 4 columns * 100 rows = 400 parameters per INSERT.
const INSERT_CHUNK_SIZE: usize = 100;

impl Database {
    // ========================================================================
    // Cache Entry Operations
    // ========================================================================

    /// Highest stored `item_index` for a source, or 0 when nothing is cached.
    ///
    /// # Errors
    ///
    /// `DatabaseError::SourceNotFound` if the id does not name a live source.
    pub async fn max_cache_index(&self, source_id: i64) -> Result<i64, DatabaseError> {
        self.ensure_source(source_id).await?;

        let (max,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(item_index) FROM cache_entries WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(max.unwrap_or(0))
    }

    /// Returns the subset of `candidates` already stored for this source.
    ///
    /// # Errors
    ///
    /// `DatabaseError::SourceNotFound` if the id does not name a live source.
    pub async fn get_indexes(
        &self,
        source_id: i64,
        candidates: &[i64],
    ) -> Result<BTreeSet<i64>, DatabaseError> {
        self.ensure_source(source_id).await?;

        let mut found = BTreeSet::new();
        for chunk in candidates.chunks(INDEX_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "SELECT item_index FROM cache_entries WHERE source_id = ",
            );
            builder.push_bind(source_id);
            builder.push(" AND item_index IN (");
            let mut separated = builder.separated(", ");
            for index in chunk {
                separated.push_bind(*index);
            }
            separated.push_unseparated(")");

            let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            found.extend(rows.into_iter().map(|(index,)| index));
        }

        Ok(found)
    }

    /// Bulk insert fetched items in a single transaction.
    ///
    /// Uses `INSERT OR IGNORE`: a row whose (source_id, item_index) is already
    /// stored is refused by the unique constraint and counted as `rejected`
    /// rather than duplicated.
    pub async fn save_to_cache(
        &self,
        entries: &[NewCacheEntry],
    ) -> Result<SaveSummary, DatabaseError> {
        if entries.is_empty() {
            return Ok(SaveSummary::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;

        for chunk in entries.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO cache_entries (source_id, item_index, item, dated_at) ",
            );
            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(entry.source_id)
                    .push_bind(entry.item_index)
                    .push_bind(entry.item.to_string())
                    .push_bind(entry.dated_at.format(DATE_FORMAT).to_string());
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        Ok(SaveSummary {
            inserted,
            rejected: entries.len() as u64 - inserted,
        })
    }

    /// Read cached entries for a source.
    ///
    /// Rows are restricted to `filter.year()` when set, ordered ascending by
    /// `item_index`, then `offset` rows are skipped and at most `limit` returned.
    pub async fn get_from_cache(
        &self,
        source_id: i64,
        filter: &QueryFilter,
    ) -> Result<Vec<CacheEntry>, DatabaseError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT id, source_id, item_index, item, dated_at, created_at, updated_at \
             FROM cache_entries WHERE source_id = ",
        );
        builder.push_bind(source_id);

        if let Some(year) = filter.year() {
            // Range on the text date keeps idx_cache_entries_source_dated usable
            builder.push(" AND dated_at >= ");
            builder.push_bind(format!("{year:04}-01-01"));
            builder.push(" AND dated_at <= ");
            builder.push_bind(format!("{year:04}-12-31"));
        }

        builder.push(" ORDER BY item_index ASC LIMIT ");
        builder.push_bind(i64::from(filter.limit()));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(filter.offset()));

        let rows: Vec<CacheEntryDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(CacheEntryDbRow::into_entry).collect()
    }

    /// Number of cached entries for a source.
    pub async fn count_entries(&self, source_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM cache_entries WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
