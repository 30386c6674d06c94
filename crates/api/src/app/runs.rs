//! Registry of the runs started through this API process.
//!
//! Runs still in flight are always kept. Finished runs are kept for inspection
//! up to `max_finished`; past that the oldest finished ones are dropped.

use std::collections::HashMap;
use std::sync::RwLock;

use shopforge_core::RunId;
use shopforge_infra::RunHandle;
use shopforge_saga::SagaRun;

pub const DEFAULT_MAX_FINISHED_RUNS: usize = 1_024;

#[derive(Debug)]
struct Entry {
    seq: u64,
    handle: RunHandle,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    runs: HashMap<RunId, Entry>,
}

#[derive(Debug)]
pub struct RunRegistry {
    inner: RwLock<Inner>,
    max_finished: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_max_finished(DEFAULT_MAX_FINISHED_RUNS)
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_finished(max_finished: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_finished,
        }
    }

    pub fn insert(&self, handle: RunHandle) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.runs.insert(handle.run_id(), Entry { seq, handle });
        evict_finished(&mut inner, self.max_finished);
    }

    pub fn get(&self, run_id: RunId) -> Option<RunHandle> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .runs
            .get(&run_id)
            .map(|e| e.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .runs
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots of every retained run, oldest first.
    pub async fn snapshots(&self) -> Vec<SagaRun> {
        let handles: Vec<RunHandle> = {
            let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
            evict_finished(&mut inner, self.max_finished);
            inner.runs.values().map(|e| e.handle.clone()).collect()
        };

        let mut runs = Vec::with_capacity(handles.len());
        for handle in handles {
            runs.push(handle.snapshot().await);
        }
        runs.sort_by_key(|r| r.started_at());
        runs
    }
}

/// Drop the oldest finished runs beyond `max_finished`.
fn evict_finished(inner: &mut Inner, max_finished: usize) {
    let mut finished: Vec<(u64, RunId)> = inner
        .runs
        .iter()
        .filter(|(_, e)| e.handle.phase().is_finished())
        .map(|(id, e)| (e.seq, *id))
        .collect();
    if finished.len() <= max_finished {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - max_finished;
    for (_, run_id) in finished.into_iter().take(excess) {
        inner.runs.remove(&run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use shopforge_infra::{InMemoryBackend, ProvisioningClients, RunPhase, SagaCoordinator};
    use shopforge_saga::{InMemoryObserver, ProvisioningInput};

    fn coordinator(backend: Arc<InMemoryBackend>) -> SagaCoordinator {
        SagaCoordinator::builder(ProvisioningClients::in_memory(backend))
            .observer(Arc::new(InMemoryObserver::new()))
            .build()
    }

    fn input(n: usize) -> ProvisioningInput {
        ProvisioningInput {
            plan_id: "pro".into(),
            merchant_name: format!("Shop {n}"),
            merchant_email: format!("owner{n}@shop.com"),
            custom_subdomain: None,
        }
    }

    async fn finished_run(coordinator: &SagaCoordinator, n: usize) -> RunHandle {
        let handle = coordinator.submit(input(n)).unwrap();
        handle.finished().await;
        handle
    }

    #[tokio::test]
    async fn oldest_finished_runs_are_evicted_first() {
        let coordinator = coordinator(Arc::new(InMemoryBackend::new()));
        let registry = RunRegistry::with_max_finished(2);

        let first = finished_run(&coordinator, 1).await;
        let second = finished_run(&coordinator, 2).await;
        let third = finished_run(&coordinator, 3).await;
        registry.insert(first.clone());
        registry.insert(second.clone());
        registry.insert(third.clone());

        assert_eq!(registry.len(), 2);
        assert!(registry.get(first.run_id()).is_none());
        assert!(registry.get(second.run_id()).is_some());
        assert!(registry.get(third.run_id()).is_some());
    }

    #[tokio::test]
    async fn runs_in_flight_are_never_evicted() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.script_deployment("d1", "QUEUED", None);
        backend.script_statuses([Ok(("BUILDING", None))]);
        let polling = coordinator(backend).submit(input(0)).unwrap();
        polling.accepted().await;
        assert_eq!(polling.phase(), RunPhase::Accepted);

        let coordinator = coordinator(Arc::new(InMemoryBackend::new()));
        let registry = RunRegistry::with_max_finished(1);
        registry.insert(polling.clone());
        let done = finished_run(&coordinator, 1).await;
        let later = finished_run(&coordinator, 2).await;
        registry.insert(done.clone());
        registry.insert(later.clone());

        assert!(registry.get(polling.run_id()).is_some());
        assert!(registry.get(done.run_id()).is_none());
        assert!(registry.get(later.run_id()).is_some());
        assert_eq!(registry.snapshots().await.len(), 2);

        polling.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn runs_finishing_after_insert_are_evicted_on_listing() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.script_deployment("d1", "QUEUED", None);
        backend.script_statuses([Ok(("BUILDING", None))]);
        let coordinator = coordinator(backend);
        let registry = RunRegistry::with_max_finished(0);

        let handle = coordinator.submit(input(1)).unwrap();
        handle.accepted().await;
        registry.insert(handle.clone());
        assert_eq!(registry.snapshots().await.len(), 1);

        handle.cancel().await.unwrap();

        assert!(registry.snapshots().await.is_empty());
        assert!(registry.is_empty());
    }
}
