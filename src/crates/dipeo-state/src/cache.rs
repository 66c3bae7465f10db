//! Live-execution cache.
//!
//! One entry per running execution, each behind its own lock so writes to
//! a single execution are serialized while distinct executions never
//! contend. Reads clone a snapshot and may observe slightly stale state.
//! Terminal flush moves the record to the durable repository and evicts
//! the entry; a capacity cap evicts the oldest entry first when too many
//! executions are live at once.

use crate::error::{Result, StateError};
use crate::ports::{ExecutionCache, StateRepository};
use async_trait::async_trait;
use dipeo_domain::{DiagramId, ExecutionId, ExecutionState};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

pub const DEFAULT_MAX_LIVE: usize = 256;

pub struct LiveExecutionCache {
    repo: Arc<dyn StateRepository>,
    live: RwLock<BTreeMap<ExecutionId, Arc<RwLock<ExecutionState>>>>,
    /// Insertion order, oldest first; drives capacity eviction.
    order: Mutex<VecDeque<ExecutionId>>,
    max_live: usize,
}

impl LiveExecutionCache {
    pub fn new(repo: Arc<dyn StateRepository>) -> Self {
        Self::with_capacity(repo, DEFAULT_MAX_LIVE)
    }

    pub fn with_capacity(repo: Arc<dyn StateRepository>, max_live: usize) -> Self {
        Self {
            repo,
            live: RwLock::new(BTreeMap::new()),
            order: Mutex::new(VecDeque::new()),
            max_live: max_live.max(1),
        }
    }

    fn entry(&self, execution_id: &ExecutionId) -> Option<Arc<RwLock<ExecutionState>>> {
        self.live.read().get(execution_id).cloned()
    }

    fn remove_entry(&self, execution_id: &ExecutionId) -> Option<Arc<RwLock<ExecutionState>>> {
        let entry = self.live.write().remove(execution_id);
        if entry.is_some() {
            self.order.lock().retain(|id| id != execution_id);
        }
        entry
    }

    /// Evict the oldest live execution, persisting whatever state it had.
    async fn evict_oldest(&self) -> Result<()> {
        let oldest = self.order.lock().front().cloned();
        if let Some(id) = oldest {
            tracing::warn!(execution_id = %id, "live-execution cache full, evicting oldest");
            if let Some(entry) = self.remove_entry(&id) {
                let snapshot = entry.read().clone();
                self.repo.save_execution(&snapshot).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionCache for LiveExecutionCache {
    async fn create_in_cache(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<DiagramId>,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionState> {
        if self.live.read().contains_key(&execution_id) {
            return Err(StateError::AlreadyExists(execution_id));
        }
        if self.live.read().len() >= self.max_live {
            self.evict_oldest().await?;
        }

        let state =
            ExecutionState::new(execution_id.clone(), diagram_id).with_variables(variables);
        self.live
            .write()
            .insert(execution_id.clone(), Arc::new(RwLock::new(state.clone())));
        self.order.lock().push_back(execution_id);
        Ok(state)
    }

    async fn get_cached(&self, execution_id: &ExecutionId) -> Option<ExecutionState> {
        self.entry(execution_id).map(|e| e.read().clone())
    }

    async fn mutate(
        &self,
        execution_id: &ExecutionId,
        f: Box<dyn for<'a> FnOnce(&'a mut ExecutionState) + Send>,
    ) -> Result<()> {
        let entry = self
            .entry(execution_id)
            .ok_or_else(|| StateError::NotFound(execution_id.clone()))?;
        let mut state = entry.write();
        f(&mut state);
        Ok(())
    }

    async fn persist_final_state(&self, execution_id: &ExecutionId) -> Result<ExecutionState> {
        let entry = self
            .remove_entry(execution_id)
            .ok_or_else(|| StateError::NotFound(execution_id.clone()))?;
        let snapshot = entry.read().clone();
        self.repo.save_execution(&snapshot).await?;
        tracing::debug!(execution_id = %execution_id, status = %snapshot.status, "persisted final state");
        Ok(snapshot)
    }

    fn live_count(&self) -> usize {
        self.live.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStateRepository;
    use dipeo_domain::Status;

    fn cache_with(max: usize) -> (Arc<InMemoryStateRepository>, LiveExecutionCache) {
        let repo = Arc::new(InMemoryStateRepository::new());
        let cache = LiveExecutionCache::with_capacity(repo.clone(), max);
        (repo, cache)
    }

    #[tokio::test]
    async fn test_create_mutate_read() {
        let (_, cache) = cache_with(8);
        let id = ExecutionId::new("exec_1");
        cache
            .create_in_cache(id.clone(), None, BTreeMap::new())
            .await
            .unwrap();
        cache
            .mutate(&id, Box::new(|s| s.status = Status::Running))
            .await
            .unwrap();
        let snap = cache.get_cached(&id).await.unwrap();
        assert_eq!(snap.status, Status::Running);
    }

    #[tokio::test]
    async fn test_persist_final_state_flushes_and_evicts() {
        let (repo, cache) = cache_with(8);
        let id = ExecutionId::new("exec_1");
        cache
            .create_in_cache(id.clone(), None, BTreeMap::new())
            .await
            .unwrap();
        cache
            .mutate(&id, Box::new(|s| s.status = Status::Completed))
            .await
            .unwrap();
        let snapshot = cache.persist_final_state(&id).await.unwrap();
        assert_eq!(snapshot.status, Status::Completed);
        assert_eq!(cache.live_count(), 0);
        assert!(cache.get_cached(&id).await.is_none());

        use crate::ports::StateRepository as _;
        let persisted = repo.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(persisted.status, Status::Completed);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let (repo, cache) = cache_with(2);
        for n in 0..3 {
            cache
                .create_in_cache(ExecutionId::new(format!("exec_{n}")), None, BTreeMap::new())
                .await
                .unwrap();
        }
        assert_eq!(cache.live_count(), 2);
        assert!(cache.get_cached(&ExecutionId::new("exec_0")).await.is_none());

        use crate::ports::StateRepository as _;
        // Evicted record landed in the durable repo.
        assert!(repo
            .get_execution(&ExecutionId::new("exec_0"))
            .await
            .unwrap()
            .is_some());
    }
}
