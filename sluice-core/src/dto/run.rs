//! Run summary DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus};
use crate::domain::work_item::{WorkItem, WorkItemStatus};

/// Per-stage work item counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Succeeded items that removed their content item; also counted in `succeeded`
    #[serde(default)]
    pub removed: usize,
}

impl StageSummary {
    pub fn from_items(stage: &str, items: &[WorkItem]) -> Self {
        let mut summary = Self {
            stage: stage.to_string(),
            ..Self::default()
        };
        for item in items {
            match item.status {
                WorkItemStatus::Pending => summary.pending += 1,
                WorkItemStatus::InProgress => summary.in_progress += 1,
                WorkItemStatus::Succeeded => {
                    summary.succeeded += 1;
                    if item.is_removal() {
                        summary.removed += 1;
                    }
                }
                WorkItemStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.succeeded + self.failed
    }
}

/// Externally observable result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub stages: Vec<StageSummary>,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn new(run: &PipelineRun, stages: Vec<StageSummary>) -> Self {
        Self {
            run_id: run.id,
            pipeline_name: run.pipeline_name.clone(),
            status: run.status,
            stages,
            errors: run.errors.clone(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}
