//! Work item domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::artifact::ArtifactId;
use crate::domain::content::{ContentAction, ContentItem};
use crate::error::DomainError;

/// Work item status
///
/// `Pending -> InProgress -> (Succeeded | Failed)`. The only way back is
/// `InProgress -> Pending`, used when recovering items abandoned by a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItemStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl WorkItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(self, next: WorkItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Succeeded)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Pending)
        )
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// The unit of scheduling: one content item or artifact processed by one stage of one run
///
/// A work item never moves between stages. Its status and outcome fields are the
/// only things that change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub run_id: Uuid,
    pub stage: String,
    /// None for items of the starting stage
    pub previous_stage: Option<String>,
    pub content_item_canonical_id: String,
    /// Where the raw bytes of the content item live; starting-stage items only
    #[serde(default)]
    pub content_id: Option<String>,
    /// Action requested for the content item; downstream items always add or update
    #[serde(default)]
    pub action: ContentAction,
    /// Artifact consumed from the previous stage
    pub input_artifact_id: Option<ArtifactId>,
    pub status: WorkItemStatus,
    /// Artifacts produced on success
    pub artifact_ids: Vec<ArtifactId>,
    pub errors: Vec<String>,
    pub processing_attempts: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl WorkItem {
    fn pending(
        run_id: Uuid,
        stage: &str,
        previous_stage: Option<&str>,
        content_item_canonical_id: String,
        input_artifact_id: Option<ArtifactId>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            stage: stage.to_string(),
            previous_stage: previous_stage.map(str::to_string),
            content_item_canonical_id,
            content_id: None,
            action: ContentAction::AddOrUpdate,
            input_artifact_id,
            status: WorkItemStatus::Pending,
            artifact_ids: Vec::new(),
            errors: Vec::new(),
            processing_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a starting-stage item for a content item
    pub fn starting(run_id: Uuid, stage: &str, content_item: &ContentItem) -> Self {
        Self {
            content_id: Some(content_item.content_id.clone()),
            action: content_item.action,
            ..Self::pending(run_id, stage, None, content_item.canonical_id.clone(), None)
        }
    }

    /// True if the item asks for its content item to be removed
    pub fn is_removal(&self) -> bool {
        self.action == ContentAction::Remove
    }

    /// Creates a downstream item consuming one artifact of the previous stage
    pub fn downstream(
        run_id: Uuid,
        stage: &str,
        previous_stage: &str,
        input_artifact_id: ArtifactId,
        content_item_canonical_id: impl Into<String>,
    ) -> Self {
        Self::pending(
            run_id,
            stage,
            Some(previous_stage),
            content_item_canonical_id.into(),
            Some(input_artifact_id),
        )
    }

    fn transition(&mut self, next: WorkItemStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "work item",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Marks the item as being processed and counts the attempt
    pub fn start(&mut self) -> Result<(), DomainError> {
        self.transition(WorkItemStatus::InProgress)?;
        self.processing_attempts += 1;
        Ok(())
    }

    pub fn succeed(&mut self, artifact_ids: Vec<ArtifactId>) -> Result<(), DomainError> {
        self.transition(WorkItemStatus::Succeeded)?;
        self.artifact_ids = artifact_ids;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.transition(WorkItemStatus::Failed)?;
        self.errors.push(reason.into());
        Ok(())
    }

    /// Returns an abandoned in-progress item to the queue
    pub fn requeue(&mut self) -> Result<(), DomainError> {
        self.transition(WorkItemStatus::Pending)
    }

    /// First artifact produced on success, if any
    pub fn result_artifact_id(&self) -> Option<&ArtifactId> {
        match self.status {
            WorkItemStatus::Succeeded => self.artifact_ids.first(),
            _ => None,
        }
    }

    /// True if the item has been in progress for longer than `timeout`
    pub fn is_stale(&self, now: chrono::DateTime<chrono::Utc>, timeout: chrono::Duration) -> bool {
        self.status == WorkItemStatus::InProgress && now - self.updated_at >= timeout
    }
}
