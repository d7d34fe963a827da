use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Source, SourceDbRow, SourceSeed, SourceUpdate};

const SOURCE_COLUMNS: &str =
    "id, name, slug, latest_index, check_at, last_updated_at, created_at, updated_at";

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Create or refresh source rows from configuration.
    ///
    /// Existing rows keep their `latest_index`; only the display name is
    /// refreshed. A soft-deleted slug stays deleted.
    pub async fn seed_sources(&self, seeds: &[SourceSeed]) -> Result<(), DatabaseError> {
        if seeds.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("INSERT INTO sources (slug, name) ");
        builder.push_values(seeds, |mut b, seed| {
            b.push_bind(&seed.slug).push_bind(&seed.name);
        });
        builder.push(
            " ON CONFLICT(slug) DO UPDATE SET name = excluded.name, updated_at = datetime('now')",
        );
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Look up a live source by slug.
    ///
    /// # Errors
    ///
    /// `DatabaseError::SourceNotFound` if no non-deleted source has this slug.
    pub async fn get_source(&self, slug: &str) -> Result<Source, DatabaseError> {
        let row = sqlx::query_as::<_, SourceDbRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE slug = ? AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SourceDbRow::into_source)
            .ok_or_else(|| DatabaseError::SourceNotFound(slug.to_string()))
    }

    /// Look up a live source by id.
    pub async fn get_source_by_id(&self, source_id: i64) -> Result<Source, DatabaseError> {
        let row = sqlx::query_as::<_, SourceDbRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SourceDbRow::into_source)
            .ok_or_else(|| DatabaseError::SourceNotFound(format!("id {source_id}")))
    }

    /// All live sources, ordered by slug.
    pub async fn list_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let rows = sqlx::query_as::<_, SourceDbRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE deleted_at IS NULL ORDER BY slug"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SourceDbRow::into_source).collect())
    }

    /// Fail with `SourceNotFound` unless `source_id` names a live source.
    pub(crate) async fn ensure_source(&self, source_id: i64) -> Result<(), DatabaseError> {
        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM sources WHERE id = ? AND deleted_at IS NULL")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;

        match exists {
            Some(_) => Ok(()),
            None => Err(DatabaseError::SourceNotFound(format!("id {source_id}"))),
        }
    }

    /// Merge the provided fields into the source row matched by `update.id`.
    ///
    /// `latest_index` is merged as `MAX(latest_index, new)` so two cycles racing
    /// on the same source can never lower the high-water mark. When the stored
    /// value actually advances, `last_updated_at` is stamped.
    ///
    /// Returns `true` if any column changed.
    ///
    /// # Errors
    ///
    /// `DatabaseError::SourceNotFound` if the id does not name a live source.
    pub async fn update_source(&self, update: &SourceUpdate) -> Result<bool, DatabaseError> {
        let current = self.get_source_by_id(update.id).await?;

        let name_changes = update
            .name
            .as_deref()
            .is_some_and(|name| name != current.name);
        let index_advances = update
            .latest_index
            .is_some_and(|index| index > current.latest_index);

        if !name_changes && !index_advances {
            return Ok(false);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE sources SET updated_at = datetime('now')");
        if let Some(name) = update.name.as_deref().filter(|_| name_changes) {
            builder.push(", name = ");
            builder.push_bind(name);
        }
        if let Some(index) = update.latest_index.filter(|_| index_advances) {
            builder.push(", last_updated_at = CASE WHEN latest_index < ");
            builder.push_bind(index);
            builder.push(" THEN datetime('now') ELSE last_updated_at END, latest_index = MAX(latest_index, ");
            builder.push_bind(index);
            builder.push(")");
        }
        builder.push(" WHERE id = ");
        builder.push_bind(update.id);
        builder.push(" AND deleted_at IS NULL");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record that the remote latest index was probed successfully.
    pub async fn mark_checked(&self, source_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE sources SET check_at = datetime('now') WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::SourceNotFound(format!("id {source_id}")));
        }
        Ok(())
    }

    /// Soft-delete a source. Its cache rows are kept but the source is no
    /// longer visible to any lookup.
    pub async fn soft_delete_source(&self, slug: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE sources SET deleted_at = datetime('now') WHERE slug = ? AND deleted_at IS NULL",
        )
        .bind(slug)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::SourceNotFound(slug.to_string()));
        }
        Ok(())
    }
}
