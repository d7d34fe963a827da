use serde_json::Value;

use crate::sources::RegisteredSource;
use crate::storage::Database;
use crate::transport::Transport;

/// Everything a strategy needs for one cycle of one source.
pub(crate) struct CycleContext<'a> {
    pub db: &'a Database,
    pub transport: &'a Transport,
    pub source: &'a RegisteredSource,
    pub source_id: i64,
}

/// URLs for one batch, and the cursor the following batch starts from.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Batch {
    pub urls: Vec<String>,
    pub next: i64,
}

/// How a source's missing range `(current, remote]` is turned into requests.
///
/// Batches are planned one at a time, right before they are fetched, so the
/// size of the missing range never determines how much is held in memory.
pub(crate) trait FetchStrategy {
    /// Next batch covering indexes above `cursor`, or `None` once `cursor`
    /// reaches `remote`.
    async fn next_batch(&self, cx: &CycleContext<'_>, cursor: i64, remote: i64) -> Option<Batch>;

    async fn fetch(&self, cx: &CycleContext<'_>, urls: &[String]) -> Vec<Value>;
}

fn step(cx: &CycleContext<'_>) -> i64 {
    i64::try_from(cx.source.batch_size).unwrap_or(i64::MAX)
}

/// One request per missing index, skipping indexes already stored.
pub(crate) struct TemplatedPerIndex;

impl FetchStrategy for TemplatedPerIndex {
    async fn next_batch(&self, cx: &CycleContext<'_>, cursor: i64, remote: i64) -> Option<Batch> {
        let mut cursor = cursor.max(0);

        // Chunks that are already fully stored yield no batch
        while cursor < remote {
            let end = cursor.saturating_add(step(cx)).min(remote);
            let wanted: Vec<i64> = (cursor + 1..=end).collect();
            cursor = end;

            let stored = match cx.db.get_indexes(cx.source_id, &wanted).await {
                Ok(stored) => stored,
                Err(e) => {
                    // Storage still refuses duplicates, so fetching the whole chunk is safe
                    tracing::warn!(
                        source = %cx.source.slug,
                        error = %e,
                        "Could not check stored indexes, fetching whole chunk"
                    );
                    Default::default()
                }
            };

            let urls: Vec<String> = wanted
                .into_iter()
                .filter(|index| !stored.contains(index))
                .map(|index| cx.source.item_url(index))
                .collect();
            if !urls.is_empty() {
                return Some(Batch { urls, next: cursor });
            }
        }

        None
    }

    async fn fetch(&self, cx: &CycleContext<'_>, urls: &[String]) -> Vec<Value> {
        cx.transport.fetch(urls).await
    }
}

/// One `offset`/`limit` window per batch, each answered with an array.
pub(crate) struct PaginatedRange;

impl FetchStrategy for PaginatedRange {
    async fn next_batch(&self, cx: &CycleContext<'_>, cursor: i64, remote: i64) -> Option<Batch> {
        let offset = cursor.max(0);
        if offset >= remote {
            return None;
        }
        Some(Batch {
            urls: vec![cx.source.window_url(offset, cx.source.batch_size)],
            next: offset.saturating_add(step(cx)),
        })
    }

    async fn fetch(&self, cx: &CycleContext<'_>, urls: &[String]) -> Vec<Value> {
        let mut items = Vec::new();
        for url in urls {
            match cx.transport.fetch_one(url).await {
                Some(Value::Array(page)) => items.extend(page),
                Some(Value::Null) | None => {}
                Some(single) => items.push(single),
            }
        }
        items
    }
}
