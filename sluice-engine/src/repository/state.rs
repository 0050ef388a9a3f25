//! Pipeline state service
//!
//! The persistence boundary for runs, work items and the content items a run
//! was started with. The engine only talks to the trait; the in-memory
//! implementation backs tests and single-process use.

use async_trait::async_trait;
use sluice_core::domain::content::ContentItem;
use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::work_item::WorkItem;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Errors reported by a state backend
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// Backend temporarily unreachable; safe to retry
    #[error("State backend unavailable: {0}")]
    Unavailable(String),

    /// Referenced record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Record could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl StateError {
    /// Check if retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Persistence interface for pipeline execution state
///
/// All writes are upserts keyed by record id, so replaying a write after a
/// crash or a retry never duplicates anything.
#[async_trait]
pub trait PipelineStateService: Send + Sync {
    /// Inserts or replaces a run
    async fn upsert_run(&self, run: &PipelineRun) -> Result<(), StateError>;

    /// Fetches a run by id
    async fn get_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StateError>;

    /// Lists runs that have not reached a terminal status
    async fn list_active_runs(&self) -> Result<Vec<PipelineRun>, StateError>;

    /// Inserts or replaces a work item
    async fn upsert_work_item(&self, item: &WorkItem) -> Result<(), StateError>;

    /// Fetches the work items of one stage of a run, in creation order
    async fn get_work_items(&self, run_id: Uuid, stage: &str) -> Result<Vec<WorkItem>, StateError>;

    /// Stores the content items a run was started with
    async fn save_content_items(
        &self,
        run_id: Uuid,
        items: &[ContentItem],
    ) -> Result<(), StateError>;

    /// Fetches the content items a run was started with
    async fn get_content_items(&self, run_id: Uuid) -> Result<Vec<ContentItem>, StateError>;
}

#[derive(Default)]
struct StateTables {
    runs: HashMap<Uuid, PipelineRun>,
    work_items: HashMap<Uuid, WorkItem>,
    /// Work item ids per (run, stage), in insertion order
    stage_index: HashMap<(Uuid, String), Vec<Uuid>>,
    content_items: HashMap<Uuid, Vec<ContentItem>>,
}

/// In-memory implementation of PipelineStateService
#[derive(Default)]
pub struct InMemoryStateService {
    tables: RwLock<StateTables>,
}

impl InMemoryStateService {
    /// Creates an empty state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored work items across all runs
    pub fn work_item_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .work_items
            .len()
    }
}

#[async_trait]
impl PipelineStateService for InMemoryStateService {
    async fn upsert_run(&self, run: &PipelineRun) -> Result<(), StateError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StateError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.runs.get(&run_id).cloned())
    }

    async fn list_active_runs(&self) -> Result<Vec<PipelineRun>, StateError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut runs: Vec<PipelineRun> = tables
            .runs
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn upsert_work_item(&self, item: &WorkItem) -> Result<(), StateError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());

        if tables.work_items.insert(item.id, item.clone()).is_none() {
            tables
                .stage_index
                .entry((item.run_id, item.stage.clone()))
                .or_default()
                .push(item.id);
        }

        Ok(())
    }

    async fn get_work_items(&self, run_id: Uuid, stage: &str) -> Result<Vec<WorkItem>, StateError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());

        let items = tables
            .stage_index
            .get(&(run_id, stage.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.work_items.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(items)
    }

    async fn save_content_items(
        &self,
        run_id: Uuid,
        items: &[ContentItem],
    ) -> Result<(), StateError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.content_items.insert(run_id, items.to_vec());
        Ok(())
    }

    async fn get_content_items(&self, run_id: Uuid) -> Result<Vec<ContentItem>, StateError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.content_items.get(&run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::pipeline::{PipelineDefinition, StageDefinition};
    use sluice_core::domain::run::RunStatus;
    use sluice_core::domain::work_item::WorkItemStatus;

    fn run() -> PipelineRun {
        let definition = PipelineDefinition::new(
            "ingest",
            vec![StageDefinition::new("extract", "text-extraction")],
        );
        PipelineRun::new(&definition, HashMap::new())
    }

    #[tokio::test]
    async fn test_upsert_run_is_idempotent() {
        let state = InMemoryStateService::new();
        let mut run = run();

        state.upsert_run(&run).await.unwrap();
        run.transition(RunStatus::Running).unwrap();
        state.upsert_run(&run).await.unwrap();
        state.upsert_run(&run).await.unwrap();

        let stored = state.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert_eq!(state.list_active_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_work_item_does_not_double_count() {
        let state = InMemoryStateService::new();
        let run = run();
        let mut item = WorkItem::starting(run.id, "extract", &ContentItem::new("doc", "blob"));

        state.upsert_work_item(&item).await.unwrap();
        item.start().unwrap();
        state.upsert_work_item(&item).await.unwrap();
        state.upsert_work_item(&item).await.unwrap();

        let items = state.get_work_items(run.id, "extract").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, WorkItemStatus::InProgress);
        assert_eq!(state.work_item_count(), 1);
    }

    #[tokio::test]
    async fn test_work_items_are_scoped_by_run_and_stage() {
        let state = InMemoryStateService::new();
        let run = run();
        let content = ContentItem::new("doc", "blob");

        let first = WorkItem::starting(run.id, "extract", &content);
        let second = WorkItem::starting(run.id, "extract", &content);
        let other_run = WorkItem::starting(Uuid::new_v4(), "extract", &content);
        for item in [&first, &second, &other_run] {
            state.upsert_work_item(item).await.unwrap();
        }

        let items = state.get_work_items(run.id, "extract").await.unwrap();
        assert_eq!(
            items.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
        assert!(state.get_work_items(run.id, "partition").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_content_items_round_trip() {
        let state = InMemoryStateService::new();
        let run_id = Uuid::new_v4();
        let items = vec![ContentItem::new("a", "1"), ContentItem::new("b", "2")];

        state.save_content_items(run_id, &items).await.unwrap();
        assert_eq!(state.get_content_items(run_id).await.unwrap(), items);
        assert!(state.get_content_items(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[test]
    fn test_transient_classification() {
        assert!(StateError::Unavailable("timeout".to_string()).is_transient());
        assert!(!StateError::NotFound("run".to_string()).is_transient());
    }
}
