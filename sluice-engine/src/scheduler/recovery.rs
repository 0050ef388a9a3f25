//! Stale work item recovery
//!
//! A work item left `InProgress` by a crashed process would block its wave
//! forever. When a run is resumed, items that have been in progress for
//! longer than the configured timeout are either put back to `Pending` or
//! marked `Failed`, depending on the stale policy.

use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::work_item::WorkItem;
use tracing::{info, warn};

use crate::config::{EngineConfig, StalePolicy};
use crate::error::Result;
use crate::repository::PipelineStateService;
use crate::retry::with_backoff;

/// Attempts after which a stale item is failed instead of resumed
pub const MAX_PROCESSING_ATTEMPTS: u32 = 10;

/// What recovery did to a run's stale items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub failed: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.requeued + self.failed
    }
}

/// Requeues or fails the stale items of a run's active stages
pub async fn recover_stale_items(
    state: &dyn PipelineStateService,
    run: &PipelineRun,
    config: &EngineConfig,
) -> Result<RecoveryReport> {
    let timeout = chrono::Duration::from_std(config.in_progress_timeout)
        .unwrap_or(chrono::Duration::MAX);
    let now = chrono::Utc::now();
    let mut report = RecoveryReport::default();

    for stage in &run.active_stages {
        let description = format!("Loading work items of stage '{}'", stage);
        let items = with_backoff(&config.state_retry, &description, move || {
            state.get_work_items(run.id, stage)
        })
        .await?;

        for mut item in items.into_iter().filter(|i| i.is_stale(now, timeout)) {
            let resume = config.stale_policy == StalePolicy::Resume
                && item.processing_attempts < MAX_PROCESSING_ATTEMPTS;

            if resume {
                item.requeue()?;
                report.requeued += 1;
                info!(
                    "Requeued stale work item {} in stage '{}' (attempt {})",
                    item.id, stage, item.processing_attempts
                );
            } else {
                item.fail("Processing timed out")?;
                report.failed += 1;
                warn!(
                    "Failed stale work item {} in stage '{}' after {} attempt(s)",
                    item.id, stage, item.processing_attempts
                );
            }

            save(state, config, &item).await?;
        }
    }

    Ok(report)
}

async fn save(state: &dyn PipelineStateService, config: &EngineConfig, item: &WorkItem) -> Result<()> {
    let description = format!("Persisting work item {}", item.id);
    with_backoff(&config.state_retry, &description, move || {
        state.upsert_work_item(item)
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStateService;
    use sluice_core::domain::content::ContentItem;
    use sluice_core::domain::pipeline::{PipelineDefinition, StageDefinition};
    use sluice_core::domain::work_item::WorkItemStatus;
    use std::collections::HashMap;
    use std::time::Duration;

    fn run() -> PipelineRun {
        let definition =
            PipelineDefinition::new("p", vec![StageDefinition::new("extract", "text-extraction")]);
        let mut run = PipelineRun::new(&definition, HashMap::new());
        run.mark_stage_active("extract");
        run
    }

    fn in_progress(run: &PipelineRun, canonical_id: &str, attempts: u32, age_secs: i64) -> WorkItem {
        let mut item = WorkItem::starting(run.id, "extract", &ContentItem::new(canonical_id, canonical_id));
        item.start().unwrap();
        item.processing_attempts = attempts;
        item.updated_at = chrono::Utc::now() - chrono::Duration::seconds(age_secs);
        item
    }

    #[tokio::test]
    async fn test_resume_policy_requeues_stale_items() {
        let state = InMemoryStateService::new();
        let run = run();
        let stale = in_progress(&run, "old", 1, 120);
        let fresh = in_progress(&run, "new", 1, 0);
        state.upsert_work_item(&stale).await.unwrap();
        state.upsert_work_item(&fresh).await.unwrap();

        let config = EngineConfig::new().with_in_progress_timeout(Duration::from_secs(60));
        let report = recover_stale_items(&state, &run, &config).await.unwrap();

        assert_eq!(report, RecoveryReport { requeued: 1, failed: 0 });
        let items = state.get_work_items(run.id, "extract").await.unwrap();
        assert_eq!(items[0].status, WorkItemStatus::Pending);
        assert_eq!(items[1].status, WorkItemStatus::InProgress);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_instead_of_resuming() {
        let state = InMemoryStateService::new();
        let run = run();
        let item = in_progress(&run, "old", MAX_PROCESSING_ATTEMPTS, 120);
        state.upsert_work_item(&item).await.unwrap();

        let config = EngineConfig::new().with_in_progress_timeout(Duration::from_secs(60));
        let report = recover_stale_items(&state, &run, &config).await.unwrap();

        assert_eq!(report.failed, 1);
        let items = state.get_work_items(run.id, "extract").await.unwrap();
        assert_eq!(items[0].status, WorkItemStatus::Failed);
        assert_eq!(items[0].errors, vec!["Processing timed out"]);
    }

    #[tokio::test]
    async fn test_fail_policy_fails_stale_items() {
        let state = InMemoryStateService::new();
        let run = run();
        state
            .upsert_work_item(&in_progress(&run, "old", 1, 120))
            .await
            .unwrap();

        let config = EngineConfig::new()
            .with_in_progress_timeout(Duration::from_secs(60))
            .with_stale_policy(StalePolicy::Fail);
        let report = recover_stale_items(&state, &run, &config).await.unwrap();

        assert_eq!(report, RecoveryReport { requeued: 0, failed: 1 });
        assert_eq!(report.total(), 1);
    }

    #[tokio::test]
    async fn test_inactive_stages_are_ignored() {
        let state = InMemoryStateService::new();
        let mut run = run();
        state
            .upsert_work_item(&in_progress(&run, "old", 1, 120))
            .await
            .unwrap();
        run.mark_stage_completed("extract");

        let config = EngineConfig::new().with_in_progress_timeout(Duration::from_secs(60));
        let report = recover_stale_items(&state, &run, &config).await.unwrap();

        assert_eq!(report.total(), 0);
    }
}
