//! Read path: sync a source, then page through its cached items.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sources::ItemView;
use crate::storage::QueryFilter;
use crate::sync::{SyncError, Synchronizer};

/// Response body for a listing request.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<ItemView>,
    pub meta: ListMeta,
}

#[derive(Debug, Serialize)]
pub struct ListMeta {
    pub request: ListRequest,
    pub timestamp: DateTime<Utc>,
}

/// Echo of the effective filter.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ListRequest {
    pub source: String,
    pub year: Option<i32>,
    pub limit: u32,
    pub offset: u32,
}

/// List cached items for `slug`, running a catch-up cycle first when
/// `refresh` is set.
///
/// The cycle's own failures are only logged; whatever is cached is returned.
///
/// # Errors
///
/// Unknown or deleted sources and store read failures.
pub async fn list_items(
    sync: &Synchronizer,
    slug: &str,
    filter: &QueryFilter,
    refresh: bool,
) -> Result<ListResponse, SyncError> {
    let registered = sync.registry().get(slug)?;

    if refresh {
        let report = sync.update_cache(slug).await?;
        if !report.is_clean() {
            tracing::warn!(
                source = %slug,
                status = ?report.status,
                probe = ?report.probe,
                failed_batches = report.failed_batches(),
                "Serving possibly stale cache"
            );
        }
    }

    let db = sync.database();
    let source = db.get_source(slug).await?;
    let entries = db.get_from_cache(source.id, filter).await?;
    let data = entries
        .iter()
        .map(|entry| registered.descriptor.view(entry))
        .collect();

    Ok(ListResponse {
        data,
        meta: ListMeta {
            request: ListRequest {
                source: slug.to_string(),
                year: filter.year(),
                limit: filter.limit(),
                offset: filter.offset(),
            },
            timestamp: Utc::now(),
        },
    })
}
