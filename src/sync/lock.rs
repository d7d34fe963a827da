use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per source id.
///
/// Held for the whole catch-up cycle so two cycles for the same source never
/// interleave within a process. Cycles for different sources run freely.
/// Clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct SourceLocks {
    locks: Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `source_id`.
    pub async fn acquire(&self, source_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(source_id).or_default())
        };
        lock.lock_owned().await
    }

    /// True if a cycle currently holds `source_id`.
    #[cfg(test)]
    pub fn is_held(&self, source_id: i64) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(&source_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
