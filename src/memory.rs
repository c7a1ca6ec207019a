//! Store em memória para testes.
//!
//! Transações são serializadas por um mutex assíncrono: a transação segura o
//! guard do começo ao fim e só grava o estado de trabalho no commit, o que
//! reproduz "tudo ou nada" com isolamento serializável trivial.

use crate::error::StorageError;
use crate::storage::{WindowStore, WindowTransaction};
use crate::types::{AggregatedWindow, OutageType, RawEvent, WindowId, WindowQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    raw: BTreeSet<(String, OutageType, DateTime<Utc>)>,
    windows: BTreeMap<i64, AggregatedWindow>,
    next_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    conflicts_on_commit: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Os próximos `n` commits falham com conflito de serialização.
    pub fn fail_next_commits(&self, n: usize) {
        self.conflicts_on_commit.store(n, Ordering::SeqCst);
    }

    pub async fn raw_event_count(&self) -> usize {
        self.state.lock().await.raw.len()
    }

    /// Snapshot das janelas, ordenadas por start_time.
    pub async fn windows(&self) -> Vec<AggregatedWindow> {
        let state = self.state.lock().await;
        let mut windows: Vec<_> = state.windows.values().cloned().collect();
        windows.sort_by_key(|w| (w.start_time, w.id));
        windows
    }

    pub async fn seed_window(
        &self,
        controller_id: &str,
        outage_type: OutageType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> WindowId {
        let mut state = self.state.lock().await;
        state.insert_window(controller_id, outage_type, start_time, end_time)
    }
}

/// Mesmo predicado do SQL: end_time >= start AND start_time <= end.
fn overlaps(window: &AggregatedWindow, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    window.end_time >= start && window.start_time <= end
}

impl MemoryState {
    fn insert_window(
        &mut self,
        controller_id: &str,
        outage_type: OutageType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> WindowId {
        self.next_id += 1;
        let id = WindowId(self.next_id);
        self.windows.insert(
            id.0,
            AggregatedWindow {
                id,
                controller_id: controller_id.to_string(),
                outage_type,
                start_time,
                end_time,
            },
        );
        id
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StorageError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = (*guard).clone();
        Ok(MemoryTransaction {
            guard,
            working,
            conflicts_on_commit: Arc::clone(&self.conflicts_on_commit),
        })
    }

    async fn find_windows(
        &self,
        query: &WindowQuery,
    ) -> Result<Vec<AggregatedWindow>, StorageError> {
        let state = self.state.lock().await;
        let mut windows: Vec<_> = state
            .windows
            .values()
            .filter(|w| w.outage_type == query.outage_type)
            .filter(|w| {
                query
                    .controller_id
                    .as_deref()
                    .is_none_or(|id| id == w.controller_id)
            })
            .filter(|w| overlaps(w, query.start, query.end))
            .cloned()
            .collect();
        windows.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        Ok(windows)
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    conflicts_on_commit: Arc<AtomicUsize>,
}

#[async_trait]
impl WindowTransaction for MemoryTransaction {
    async fn insert_raw_if_absent(&mut self, event: &RawEvent) -> Result<bool, StorageError> {
        Ok(self.working.raw.insert((
            event.controller_id.clone(),
            event.outage_type,
            event.occurred_at,
        )))
    }

    async fn find_candidates(
        &mut self,
        controller_id: &str,
        outage_type: OutageType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedWindow>, StorageError> {
        let mut candidates: Vec<_> = self
            .working
            .windows
            .values()
            .filter(|w| w.controller_id == controller_id && w.outage_type == outage_type)
            .filter(|w| overlaps(w, from, to))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.end_time.cmp(&a.end_time).then(b.id.cmp(&a.id)));
        Ok(candidates)
    }

    async fn create_window(
        &mut self,
        controller_id: &str,
        outage_type: OutageType,
        at: DateTime<Utc>,
    ) -> Result<WindowId, StorageError> {
        Ok(self.working.insert_window(controller_id, outage_type, at, at))
    }

    async fn extend_window(
        &mut self,
        id: WindowId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let window = self
            .working
            .windows
            .get_mut(&id.0)
            .ok_or(StorageError::WindowNotFound(id))?;
        window.start_time = start_time;
        window.end_time = end_time;
        Ok(())
    }

    async fn remove_window(&mut self, id: WindowId) -> Result<(), StorageError> {
        self.working
            .windows
            .remove(&id.0)
            .map(|_| ())
            .ok_or(StorageError::WindowNotFound(id))
    }

    async fn commit(mut self) -> Result<(), StorageError> {
        let pending = self.conflicts_on_commit.load(Ordering::SeqCst);
        if pending > 0 {
            self.conflicts_on_commit.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::TransactionConflict(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        Ok(())
    }
}
