//! Pipeline run domain types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

use crate::domain::pipeline::PipelineDefinition;
use crate::domain::work_item::{WorkItem, WorkItemStatus};
use crate::error::DomainError;

/// Prefix of run parameters that target a single stage (`Stage.<stage>.<param>`)
pub const STAGE_PARAMETER_PREFIX: &str = "Stage.";

/// Pipeline run status
///
/// Transitions only move forward: `Created -> Running -> (Completed | Failed | Cancelled)`.
/// A run may also fail or be cancelled before it starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Created, Self::Failed)
                | (Self::Created, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Work item counters for one stage of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub work_items: usize,
    /// Items in a terminal status
    pub completed: usize,
    pub successful: usize,
}

impl StageMetrics {
    pub fn from_items(items: &[WorkItem]) -> Self {
        Self {
            work_items: items.len(),
            completed: items.iter().filter(|i| i.status.is_terminal()).count(),
            successful: items
                .iter()
                .filter(|i| i.status == WorkItemStatus::Succeeded)
                .count(),
        }
    }

    pub fn failed(&self) -> usize {
        self.completed - self.successful
    }
}

/// One execution of a pipeline definition over a set of content items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_name: String,
    pub pipeline_version: String,
    /// Stage names in execution order, captured from the definition
    pub stages: Vec<String>,
    pub status: RunStatus,
    /// Trigger parameters; `Stage.<stage>.<param>` keys override stage parameters
    pub parameters: HashMap<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Stages whose wave has been created and not yet drained
    pub active_stages: Vec<String>,
    pub completed_stages: Vec<String>,
    pub failed_stages: Vec<String>,
    pub stage_metrics: BTreeMap<String, StageMetrics>,
    pub errors: Vec<String>,
}

impl PipelineRun {
    /// Creates a run in the `Created` state
    pub fn new(
        definition: &PipelineDefinition,
        parameters: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_name: definition.name.clone(),
            pipeline_version: definition.version.clone(),
            stages: definition.stage_names(),
            status: RunStatus::Created,
            parameters,
            created_at: now,
            updated_at: now,
            completed_at: None,
            active_stages: Vec::new(),
            completed_stages: Vec::new(),
            failed_stages: Vec::new(),
            stage_metrics: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Moves the run to `next`, rejecting backward or sideways moves
    pub fn transition(&mut self, next: RunStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "run",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = chrono::Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Run parameters addressed to `stage`, with the `Stage.<stage>.` prefix removed
    pub fn stage_parameters(&self, stage: &str) -> HashMap<String, serde_json::Value> {
        let prefix = format!("{}{}.", STAGE_PARAMETER_PREFIX, stage);
        self.parameters
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect()
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.updated_at = chrono::Utc::now();
    }

    pub fn is_stage_active(&self, stage: &str) -> bool {
        self.active_stages.iter().any(|s| s == stage)
    }

    pub fn is_stage_completed(&self, stage: &str) -> bool {
        self.completed_stages.iter().any(|s| s == stage)
    }

    pub fn mark_stage_active(&mut self, stage: &str) {
        if !self.is_stage_active(stage) {
            self.active_stages.push(stage.to_string());
        }
        self.updated_at = chrono::Utc::now();
    }

    pub fn mark_stage_completed(&mut self, stage: &str) {
        self.active_stages.retain(|s| s != stage);
        if !self.is_stage_completed(stage) {
            self.completed_stages.push(stage.to_string());
        }
        self.updated_at = chrono::Utc::now();
    }

    pub fn mark_stage_failed(&mut self, stage: &str) {
        self.active_stages.retain(|s| s != stage);
        if !self.failed_stages.iter().any(|s| s == stage) {
            self.failed_stages.push(stage.to_string());
        }
        self.updated_at = chrono::Utc::now();
    }

    pub fn update_metrics(&mut self, stage: &str, metrics: StageMetrics) {
        self.stage_metrics.insert(stage.to_string(), metrics);
        self.updated_at = chrono::Utc::now();
    }
}
