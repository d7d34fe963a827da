use std::fmt;
use std::time::Duration;

use crate::storage::SaveSummary;

/// Stage a cycle was in. Only surfaces in a [`CycleStatus::TimedOut`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    CheckingRemote,
    Fetching,
    Deduping,
    Persisting,
    UpdatingHighWaterMark,
}

/// Why the remote latest index could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Request failed, returned non-2xx, or the body was not JSON
    FetchFailed,
    /// Document had no usable index field
    MissingIndex,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::FetchFailed => f.write_str("latest-index request failed"),
            ProbeFailure::MissingIndex => f.write_str("latest-index document has no index"),
        }
    }
}

/// Result of probing the remote latest-index endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Remote(i64),
    /// Treated as remote index 0, which turns the cycle into a no-op
    Unavailable(ProbeFailure),
}

impl ProbeOutcome {
    pub fn remote_index(&self) -> i64 {
        match self {
            ProbeOutcome::Remote(index) => *index,
            ProbeOutcome::Unavailable(_) => 0,
        }
    }
}

/// What happened when a batch's surviving items were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Every item was malformed or already cached
    NothingToSave,
    Saved(SaveSummary),
    /// The write failed; the range is retried by a later cycle
    Failed(String),
}

/// Per-batch accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// URLs requested for this batch
    pub requested: usize,
    /// Documents returned by the transport
    pub received: usize,
    /// Items with no usable index or date
    pub malformed: usize,
    /// Items repeating an index already seen earlier in the same batch
    pub duplicates: usize,
    /// Items whose index was already stored
    pub already_cached: usize,
    pub persist: PersistOutcome,
    /// Highest index durably stored by this batch
    pub max_index: Option<i64>,
}

impl BatchOutcome {
    pub fn inserted(&self) -> u64 {
        match &self.persist {
            PersistOutcome::Saved(summary) => summary.inserted,
            _ => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.persist, PersistOutcome::Failed(_))
    }
}

/// Result of reconciling the source's high-water mark at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighWaterMark {
    Unchanged(i64),
    Advanced { from: i64, to: i64 },
    /// Reading the stored maximum or writing the new mark failed
    UpdateFailed { from: i64, to: Option<i64>, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Local index already at or past the remote one (includes failed probes)
    UpToDate,
    Completed,
    /// The cycle ceiling elapsed; stored rows are kept and the next cycle resumes
    TimedOut(CyclePhase),
}

/// Aggregated outcome of one catch-up cycle.
///
/// Nothing in here is an error for the caller; it decides whether a failed
/// probe or persist deserves an alert or a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub source: String,
    pub starting_index: i64,
    pub probe: ProbeOutcome,
    pub batches: Vec<BatchOutcome>,
    pub high_water_mark: HighWaterMark,
    pub status: CycleStatus,
    pub elapsed: Duration,
}

impl CycleReport {
    pub(crate) fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            starting_index: 0,
            probe: ProbeOutcome::Unavailable(ProbeFailure::FetchFailed),
            batches: Vec::new(),
            high_water_mark: HighWaterMark::Unchanged(0),
            status: CycleStatus::UpToDate,
            elapsed: Duration::ZERO,
        }
    }

    /// Rows written by this cycle.
    pub fn inserted(&self) -> u64 {
        self.batches.iter().map(BatchOutcome::inserted).sum()
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.is_failed()).count()
    }

    /// High-water mark after the cycle.
    pub fn latest_index(&self) -> i64 {
        match &self.high_water_mark {
            HighWaterMark::Unchanged(index) => *index,
            HighWaterMark::Advanced { to, .. } => *to,
            HighWaterMark::UpdateFailed { from, .. } => *from,
        }
    }

    /// True when every stage succeeded.
    pub fn is_clean(&self) -> bool {
        matches!(self.probe, ProbeOutcome::Remote(_))
            && self.failed_batches() == 0
            && !matches!(self.high_water_mark, HighWaterMark::UpdateFailed { .. })
            && !matches!(self.status, CycleStatus::TimedOut(_))
    }
}
