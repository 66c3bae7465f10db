//! On-disk JSON state repository.
//!
//! One file per execution under `base_dir/executions/{execution_id}.json`.
//! The service layer only writes here at terminal transitions; in-flight
//! state lives in the cache.

use crate::error::{Result, StateError};
use crate::memory::{apply_node_output, apply_node_status, apply_status};
use crate::ports::{ExecutionFilter, StateRepository};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dipeo_domain::{
    DiagramId, Envelope, ExecutionId, ExecutionState, NodeId, Status, TokenUsage,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct JsonFileStateRepository {
    executions_dir: PathBuf,
}

impl JsonFileStateRepository {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let executions_dir = base_dir.as_ref().join("executions");
        std::fs::create_dir_all(&executions_dir)?;
        Ok(Self { executions_dir })
    }

    fn path_for(&self, execution_id: &ExecutionId) -> PathBuf {
        self.executions_dir.join(format!("{execution_id}.json"))
    }

    fn read_state(&self, execution_id: &ExecutionId) -> Result<Option<ExecutionState>> {
        let path = self.path_for(execution_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_state(&self, state: &ExecutionState) -> Result<()> {
        let path = self.path_for(&state.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn modify(
        &self,
        execution_id: &ExecutionId,
        f: impl FnOnce(&mut ExecutionState),
    ) -> Result<()> {
        let mut state = self
            .read_state(execution_id)?
            .ok_or_else(|| StateError::NotFound(execution_id.clone()))?;
        f(&mut state);
        self.write_state(&state)
    }
}

#[async_trait]
impl StateRepository for JsonFileStateRepository {
    async fn create_execution(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<DiagramId>,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionState> {
        if self.path_for(&execution_id).exists() {
            return Err(StateError::AlreadyExists(execution_id));
        }
        let state =
            ExecutionState::new(execution_id, diagram_id).with_variables(variables);
        self.write_state(&state)?;
        Ok(state)
    }

    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<ExecutionState>> {
        self.read_state(execution_id)
    }

    async fn save_execution(&self, state: &ExecutionState) -> Result<()> {
        self.write_state(state)
    }

    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: Status,
        error: Option<String>,
    ) -> Result<()> {
        self.modify(execution_id, |state| apply_status(state, status, error))
    }

    async fn update_node_status(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        status: Status,
        error: Option<String>,
    ) -> Result<()> {
        self.modify(execution_id, |state| {
            apply_node_status(state, node_id, status, error)
        })
    }

    async fn update_node_output(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        output: Envelope,
        token_usage: Option<TokenUsage>,
    ) -> Result<()> {
        self.modify(execution_id, |state| {
            apply_node_output(state, node_id, output, token_usage)
        })
    }

    async fn add_token_usage(
        &self,
        execution_id: &ExecutionId,
        tokens: TokenUsage,
    ) -> Result<()> {
        self.modify(execution_id, |state| state.token_usage.add(&tokens))
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionState>> {
        let mut matched = Vec::new();
        for entry in std::fs::read_dir(&self.executions_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<ExecutionState>(&content) {
                    Ok(state) if filter.matches(&state) => matched.push(state),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable execution record");
                    }
                }
            }
        }
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit
        };
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect())
    }

    async fn cleanup_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.executions_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)?;
                if let Ok(state) = serde_json::from_str::<ExecutionState>(&content) {
                    if state.status.is_terminal()
                        && state.ended_at.map(|t| t < cutoff).unwrap_or(false)
                    {
                        std::fs::remove_file(&path)?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStateRepository::new(dir.path()).unwrap();
        let id = ExecutionId::new("exec_disk");
        repo.create_execution(id.clone(), None, BTreeMap::new())
            .await
            .unwrap();
        repo.update_status(&id, Status::Running, None).await.unwrap();
        repo.update_status(&id, Status::Completed, None)
            .await
            .unwrap();

        let state = repo.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(state.status, Status::Completed);
        assert!(state.ended_at.is_some());
        assert!(dir
            .path()
            .join("executions")
            .join("exec_disk.json")
            .exists());
    }

    #[tokio::test]
    async fn test_list_skips_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStateRepository::new(dir.path()).unwrap();
        repo.create_execution(ExecutionId::new("exec_1"), None, BTreeMap::new())
            .await
            .unwrap();
        std::fs::write(dir.path().join("executions/garbage.json"), b"not json").unwrap();

        let listed = repo
            .list_executions(&ExecutionFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_respects_terminal_and_age() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStateRepository::new(dir.path()).unwrap();
        let id = ExecutionId::new("exec_old");
        repo.create_execution(id.clone(), None, BTreeMap::new())
            .await
            .unwrap();
        // Still pending: never cleaned.
        assert_eq!(repo.cleanup_older_than(0).await.unwrap(), 0);

        let mut state = repo.get_execution(&id).await.unwrap().unwrap();
        state.status = Status::Completed;
        state.ended_at = Some(Utc::now() - Duration::days(10));
        repo.save_execution(&state).await.unwrap();
        assert_eq!(repo.cleanup_older_than(7).await.unwrap(), 1);
        assert!(repo.get_execution(&id).await.unwrap().is_none());
    }
}
