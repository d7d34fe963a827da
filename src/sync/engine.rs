use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use chrono::NaiveDate;
use serde_json::Value;

use super::lock::SourceLocks;
use super::report::{
    BatchOutcome, CyclePhase, CycleReport, CycleStatus, HighWaterMark, PersistOutcome,
    ProbeFailure, ProbeOutcome,
};
use super::strategy::{CycleContext, FetchStrategy, PaginatedRange, TemplatedPerIndex};
use crate::sources::{FetchMode, RegisteredSource, RegistryError, SourceRegistry};
use crate::storage::{Database, DatabaseError, NewCacheEntry, SourceUpdate};
use crate::transport::Transport;

/// Errors that stop a cycle before it starts.
///
/// Everything past the initial lookups is absorbed into the [`CycleReport`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl SyncError {
    /// True when the slug names no registered, live source.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Registry(RegistryError::UnknownSource(_)) => true,
            SyncError::Database(e) => e.is_not_found(),
            SyncError::Registry(_) => false,
        }
    }
}

/// Drives catch-up cycles for registered sources.
///
/// Clones share the database pool, HTTP client and per-source locks.
#[derive(Clone)]
pub struct Synchronizer {
    db: Database,
    transport: Transport,
    registry: Arc<SourceRegistry>,
    locks: SourceLocks,
}

struct CycleState {
    report: CycleReport,
    phase: CyclePhase,
}

impl Synchronizer {
    pub fn new(db: Database, transport: Transport, registry: Arc<SourceRegistry>) -> Self {
        Self {
            db,
            transport,
            registry,
            locks: SourceLocks::new(),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Bring the local cache of `slug` up to the remote latest index.
    ///
    /// Remote and storage failures during the cycle never surface as `Err`;
    /// they are recorded in the returned report and the next cycle picks up
    /// whatever was missed.
    ///
    /// # Errors
    ///
    /// `SyncError::Registry` for an unknown slug, `SyncError::Database` if the
    /// source row is missing or soft-deleted.
    pub async fn update_cache(&self, slug: &str) -> Result<CycleReport, SyncError> {
        let source = self.registry.get(slug)?;
        let source_id = self.db.get_source(slug).await?.id;

        let _guard = self.locks.acquire(source_id).await;
        let started = Instant::now();

        let mut state = CycleState {
            report: CycleReport::new(slug),
            phase: CyclePhase::CheckingRemote,
        };

        let outcome =
            tokio::time::timeout(source.cycle_timeout, self.run_cycle(source, source_id, &mut state))
                .await;

        let mut report = state.report;
        match outcome {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    source = %slug,
                    phase = ?state.phase,
                    timeout_secs = source.cycle_timeout.as_secs(),
                    "Cycle timed out, next cycle resumes from stored state"
                );
                report.status = CycleStatus::TimedOut(state.phase);
            }
        }
        report.elapsed = started.elapsed();

        tracing::info!(
            source = %slug,
            status = ?report.status,
            inserted = report.inserted(),
            failed_batches = report.failed_batches(),
            latest_index = report.latest_index(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle finished"
        );
        Ok(report)
    }

    /// Run one cycle for every registered source, one after another.
    pub async fn update_all(&self) -> Vec<(String, Result<CycleReport, SyncError>)> {
        let mut results = Vec::with_capacity(self.registry.len());
        for source in self.registry.iter() {
            let result = self.update_cache(&source.slug).await;
            if let Err(e) = &result {
                tracing::warn!(source = %source.slug, error = %e, "Cycle could not start");
            }
            results.push((source.slug.clone(), result));
        }
        results
    }

    async fn run_cycle(
        &self,
        source: &RegisteredSource,
        source_id: i64,
        state: &mut CycleState,
    ) -> Result<(), SyncError> {
        // Read after taking the lock so a cycle that just finished is visible
        let current = self.db.get_source_by_id(source_id).await?.latest_index;
        state.report.starting_index = current;
        state.report.high_water_mark = HighWaterMark::Unchanged(current);

        let transport = self
            .transport
            .clone()
            .with_request_timeout(source.request_timeout);
        let cx = CycleContext {
            db: &self.db,
            transport: &transport,
            source,
            source_id,
        };

        let probe = self.probe(&cx).await;
        state.report.probe = probe;
        let remote = probe.remote_index();

        if current >= remote {
            tracing::debug!(source = %source.slug, current, remote, "Already up to date");
            state.report.status = CycleStatus::UpToDate;
            return Ok(());
        }

        tracing::info!(
            source = %source.slug,
            current,
            remote,
            mode = ?source.fetch_mode(),
            batch_size = source.batch_size,
            concurrency = transport.concurrency(),
            "Catching up"
        );

        let tracked = match source.fetch_mode() {
            FetchMode::TemplatedPerIndex => {
                self.run_batches(&TemplatedPerIndex, &cx, current, remote, state)
                    .await
            }
            FetchMode::PaginatedRange => {
                self.run_batches(&PaginatedRange, &cx, current, remote, state)
                    .await
            }
        };

        state.phase = CyclePhase::UpdatingHighWaterMark;
        state.report.high_water_mark = self.reconcile(&cx, current, tracked).await;
        state.report.status = CycleStatus::Completed;
        Ok(())
    }

    async fn probe(&self, cx: &CycleContext<'_>) -> ProbeOutcome {
        let url = cx.source.latest_index_url();
        let Some(document) = cx.transport.fetch_one(&url).await else {
            tracing::warn!(source = %cx.source.slug, url = %url, "Latest-index probe failed");
            return ProbeOutcome::Unavailable(ProbeFailure::FetchFailed);
        };

        let Some(remote) = cx.source.descriptor.latest_index_of(&document) else {
            tracing::warn!(
                source = %cx.source.slug,
                field = cx.source.descriptor.index_field,
                "Latest-index document has no usable index"
            );
            return ProbeOutcome::Unavailable(ProbeFailure::MissingIndex);
        };

        if let Err(e) = self.db.mark_checked(cx.source_id).await {
            tracing::warn!(source = %cx.source.slug, error = %e, "Failed to stamp check time");
        }
        ProbeOutcome::Remote(remote)
    }

    /// Plan, fetch and persist batches in order until the range is covered.
    ///
    /// Returns the highest index durably stored by this cycle, or 0.
    async fn run_batches<S: FetchStrategy>(
        &self,
        strategy: &S,
        cx: &CycleContext<'_>,
        current: i64,
        remote: i64,
        state: &mut CycleState,
    ) -> i64 {
        let mut tracked = 0;
        let mut cursor = current;

        while let Some(batch) = strategy.next_batch(cx, cursor, remote).await {
            cursor = batch.next;
            state.phase = CyclePhase::Fetching;
            let documents = strategy.fetch(cx, &batch.urls).await;

            let outcome = self
                .process_batch(cx, batch.urls.len(), documents, state)
                .await;
            if let Some(max) = outcome.max_index {
                tracked = tracked.max(max);
            }
            state.report.batches.push(outcome);
        }

        tracked
    }

    async fn process_batch(
        &self,
        cx: &CycleContext<'_>,
        requested: usize,
        documents: Vec<Value>,
        state: &mut CycleState,
    ) -> BatchOutcome {
        state.phase = CyclePhase::Deduping;
        let descriptor = cx.source.descriptor;
        let received = documents.len();
        let mut malformed = 0;
        let mut duplicates = 0;

        let mut candidates: BTreeMap<i64, (Value, NaiveDate)> = BTreeMap::new();
        for document in documents {
            let index = descriptor.index_of(&document).filter(|&i| i > 0);
            let date = descriptor.date_of(&document);
            let (Some(index), Some(date)) = (index, date) else {
                malformed += 1;
                continue;
            };
            if candidates.contains_key(&index) {
                duplicates += 1;
                continue;
            }
            candidates.insert(index, (document, date));
        }

        if malformed > 0 {
            tracing::warn!(
                source = %cx.source.slug,
                malformed,
                "Dropped items without a usable index or date"
            );
        }

        let indexes: Vec<i64> = candidates.keys().copied().collect();
        let stored = match self.db.get_indexes(cx.source_id, &indexes).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(
                    source = %cx.source.slug,
                    error = %e,
                    "Existence check failed, relying on unique constraint"
                );
                Default::default()
            }
        };

        let entries: Vec<NewCacheEntry> = candidates
            .into_iter()
            .filter(|(index, _)| !stored.contains(index))
            .map(|(item_index, (item, dated_at))| NewCacheEntry {
                source_id: cx.source_id,
                item_index,
                item,
                dated_at,
            })
            .collect();

        let mut outcome = BatchOutcome {
            requested,
            received,
            malformed,
            duplicates,
            already_cached: stored.len(),
            persist: PersistOutcome::NothingToSave,
            max_index: None,
        };
        if entries.is_empty() {
            return outcome;
        }

        state.phase = CyclePhase::Persisting;
        match self.db.save_to_cache(&entries).await {
            Ok(summary) => {
                // Rejected rows were stored by a concurrent cycle, so they count too
                outcome.max_index = entries.iter().map(|e| e.item_index).max();
                outcome.persist = PersistOutcome::Saved(summary);
            }
            Err(e) => {
                tracing::warn!(
                    source = %cx.source.slug,
                    items = entries.len(),
                    error = %e,
                    "Failed to persist batch"
                );
                outcome.persist = PersistOutcome::Failed(e.to_string());
            }
        }
        outcome
    }

    async fn reconcile(&self, cx: &CycleContext<'_>, current: i64, tracked: i64) -> HighWaterMark {
        let stored = match self.db.max_cache_index(cx.source_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(source = %cx.source.slug, error = %e, "Failed to read stored maximum");
                return HighWaterMark::UpdateFailed {
                    from: current,
                    to: None,
                    reason: e.to_string(),
                };
            }
        };

        let target = tracked.max(stored);
        if target <= current {
            return HighWaterMark::Unchanged(current);
        }

        match self
            .db
            .update_source(&SourceUpdate::latest_index(cx.source_id, target))
            .await
        {
            Ok(_) => HighWaterMark::Advanced {
                from: current,
                to: target,
            },
            Err(e) => {
                tracing::warn!(
                    source = %cx.source.slug,
                    target,
                    error = %e,
                    "Failed to advance latest index"
                );
                HighWaterMark::UpdateFailed {
                    from: current,
                    to: Some(target),
                    reason: e.to_string(),
                }
            }
        }
    }
}
