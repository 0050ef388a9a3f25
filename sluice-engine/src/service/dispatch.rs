//! Wave dispatcher
//!
//! Processes the work items of one stage (a wave) with bounded concurrency:
//! - Items are spawned only while a permit is available
//! - Every status change is written to the state service, with retries,
//!   before the item counts toward the wave's result
//! - Dispatch stops early on cancellation, on a stop-processing signal, on
//!   an unhandled plugin error, or when the failure threshold is crossed.
//!   In-flight items are always awaited.

use sluice_core::domain::artifact::ArtifactId;
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::work_item::{WorkItem, WorkItemStatus};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::plugin::StagePlugin;
use crate::repository::{PipelineStateService, StateError};
use crate::retry::{RetryPolicy, with_backoff};

/// Everything a work item needs from its run while being processed
#[derive(Clone)]
pub struct StageContext {
    pub definition: Arc<PipelineDefinition>,
    pub run: Arc<PipelineRun>,
    pub stage: String,
    pub plugin: Arc<dyn StagePlugin>,
}

/// Result of dispatching one wave
#[derive(Debug, Default)]
pub struct WaveOutcome {
    /// The wave's items after dispatch, in their original order
    pub items: Vec<WorkItem>,
    /// Message of the first item that asked to stop the run
    pub stop_requested: Option<String>,
    /// Unhandled plugin error or panic
    pub fatal: Option<String>,
    pub threshold_exceeded: bool,
    pub cancelled: bool,
}

impl WaveOutcome {
    /// True if dispatch was cut short for a reason that fails the run
    pub fn is_halted(&self) -> bool {
        self.stop_requested.is_some() || self.fatal.is_some() || self.threshold_exceeded
    }

    /// True if every item reached a terminal status
    pub fn is_drained(&self) -> bool {
        self.items.iter().all(|i| i.status.is_terminal())
    }

    pub fn succeeded(&self) -> usize {
        self.count(WorkItemStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(WorkItemStatus::Failed)
    }

    fn count(&self, status: WorkItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    /// Artifacts of succeeded items, in item order, without duplicates
    pub fn artifact_ids(&self) -> Vec<ArtifactId> {
        collect_artifacts(&self.items)
    }
}

/// Collects the artifacts of succeeded items, in item order, without duplicates
pub fn collect_artifacts(items: &[WorkItem]) -> Vec<ArtifactId> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|i| i.status == WorkItemStatus::Succeeded)
        .flat_map(|i| i.artifact_ids.iter())
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

struct ItemOutcome {
    item: WorkItem,
    stop_requested: Option<String>,
    fatal: Option<String>,
}

/// Dispatches waves of work items to their stage plugin
pub struct WaveDispatcher {
    state: Arc<dyn PipelineStateService>,
    config: EngineConfig,
}

impl WaveDispatcher {
    /// Creates a new dispatcher
    pub fn new(state: Arc<dyn PipelineStateService>, config: EngineConfig) -> Self {
        Self { state, config }
    }

    /// Processes every pending item of a wave and waits for all of them
    ///
    /// Items that are already terminal are kept as they are, so a resumed wave
    /// only processes what is left.
    pub async fn dispatch(
        &self,
        context: &StageContext,
        items: Vec<WorkItem>,
        token: &CancellationToken,
    ) -> WaveOutcome {
        let total = items.len();
        let mut queue: VecDeque<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == WorkItemStatus::Pending)
            .map(|(idx, _)| idx)
            .collect();

        let mut outcome = WaveOutcome {
            items,
            ..WaveOutcome::default()
        };
        let mut failed = outcome.failed();
        outcome.threshold_exceeded = self.threshold_exceeded(failed, total);

        info!(
            "Dispatching {} of {} work item(s) for stage '{}' (max parallel: {})",
            queue.len(),
            total,
            context.stage,
            self.config.max_parallel_work_items
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_work_items));
        let mut tasks: JoinSet<(usize, ItemOutcome)> = JoinSet::new();
        let mut cancel_seen = false;

        loop {
            while !outcome.is_halted() && !token.is_cancelled() {
                let Some(&idx) = queue.front() else {
                    break;
                };
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                queue.pop_front();

                let item = outcome.items[idx].clone();
                let state = Arc::clone(&self.state);
                let retry = self.config.state_retry.clone();
                let context = context.clone();

                tasks.spawn(async move {
                    let result = process_item(state, retry, context, item, permit).await;
                    (idx, result)
                });
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = token.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!(
                        "Stage '{}' cancelled, draining {} in-flight work item(s)",
                        context.stage,
                        tasks.len()
                    );
                }

                joined = tasks.join_next() => match joined {
                    Some(Ok((idx, result))) => {
                        if result.item.status == WorkItemStatus::Failed {
                            failed += 1;
                            if !outcome.threshold_exceeded && self.threshold_exceeded(failed, total) {
                                warn!(
                                    "Stage '{}' crossed its failure threshold ({} of {} failed)",
                                    context.stage, failed, total
                                );
                                outcome.threshold_exceeded = true;
                            }
                        }
                        if outcome.stop_requested.is_none() {
                            outcome.stop_requested = result.stop_requested;
                        }
                        if outcome.fatal.is_none() {
                            outcome.fatal = result.fatal;
                        }
                        outcome.items[idx] = result.item;
                    }
                    Some(Err(e)) => {
                        error!("Work item task for stage '{}' failed: {}", context.stage, e);
                        if outcome.fatal.is_none() {
                            outcome.fatal = Some(format!("Work item task failed: {}", e));
                        }
                    }
                    None => break,
                }
            }
        }

        outcome.cancelled = token.is_cancelled();

        debug!(
            "Stage '{}' dispatch finished: {} succeeded, {} failed, {} not started",
            context.stage,
            outcome.succeeded(),
            outcome.failed(),
            queue.len()
        );

        outcome
    }

    fn threshold_exceeded(&self, failed: usize, total: usize) -> bool {
        failed > 0
            && self
                .config
                .failure_threshold
                .is_some_and(|t| t.is_exceeded(failed, total))
    }
}

/// Runs one work item through its plugin and records the outcome
async fn process_item(
    state: Arc<dyn PipelineStateService>,
    retry: RetryPolicy,
    context: StageContext,
    mut item: WorkItem,
    _permit: OwnedSemaphorePermit,
) -> ItemOutcome {
    let mut outcome = ItemOutcome {
        item: item.clone(),
        stop_requested: None,
        fatal: None,
    };

    if let Err(e) = item.start() {
        warn!("Skipping work item {}: {}", item.id, e);
        return outcome;
    }

    // Unrecorded start: the item stays pending and the wave is not drained
    if let Err(e) = persist(state.as_ref(), &retry, &item).await {
        error!(
            "Could not record start of work item {}, leaving it pending: {}",
            item.id, e
        );
        return outcome;
    }

    let in_progress = item.clone();
    debug!(
        "Processing work item {} (stage '{}', content '{}', attempt {})",
        item.id, item.stage, item.content_item_canonical_id, item.processing_attempts
    );

    // Separate task so a panicking plugin only takes down this item
    let plugin = Arc::clone(&context.plugin);
    let definition = Arc::clone(&context.definition);
    let run = Arc::clone(&context.run);
    let input = item.clone();
    let handle =
        tokio::spawn(async move { plugin.process_work_item(&definition, &run, &input).await });

    let transition = match handle.await {
        Ok(Ok(result)) => {
            if result.stop_processing {
                let reason = result
                    .message
                    .clone()
                    .unwrap_or_else(|| "stop requested".to_string());
                warn!(
                    "Work item {} in stage '{}' requested to stop processing: {}",
                    item.id, context.stage, reason
                );
                outcome.stop_requested = Some(format!(
                    "Work item {} in stage '{}' stopped the run: {}",
                    item.id, context.stage, reason
                ));
            }

            if result.success {
                if let Some(message) = &result.message {
                    debug!("Work item {} succeeded with message: {}", item.id, message);
                }
                item.succeed(result.artifact_ids)
            } else {
                let reason = result
                    .message
                    .unwrap_or_else(|| "Work item processing failed".to_string());
                warn!("Work item {} failed: {}", item.id, reason);
                item.fail(reason)
            }
        }
        Ok(Err(e)) => {
            error!(
                "Plugin '{}' returned an error for work item {}: {}",
                context.plugin.name(),
                item.id,
                e
            );
            outcome.fatal = Some(format!(
                "Plugin '{}' failed on work item {}: {}",
                context.plugin.name(),
                item.id,
                e
            ));
            item.fail(format!("Plugin error: {}", e))
        }
        Err(e) => {
            let reason = if e.is_panic() {
                "Plugin panicked"
            } else {
                "Plugin task was cancelled"
            };
            error!("{} while processing work item {}", reason, item.id);
            outcome.fatal = Some(format!("{} while processing work item {}", reason, item.id));
            item.fail(reason)
        }
    };

    if let Err(e) = transition {
        // Only reachable if the item changed status behind our back
        error!("Could not complete work item {}: {}", item.id, e);
    }

    if let Err(e) = persist(state.as_ref(), &retry, &item).await {
        error!("Could not record outcome of work item {}: {}", item.id, e);
        if item.status == WorkItemStatus::Succeeded {
            // Without a durable success its artifacts must not flow downstream
            let mut escalated = in_progress.clone();
            let _ = escalated.fail(format!("Could not record processing outcome: {}", e));
            item = match state.upsert_work_item(&escalated).await {
                Ok(()) => escalated,
                Err(e) => {
                    // Stored as in progress; stale recovery picks it up on resume
                    warn!("Could not record failure of work item {}: {}", escalated.id, e);
                    in_progress
                }
            };
        }
    }

    outcome.item = item;
    outcome
}

async fn persist(
    state: &dyn PipelineStateService,
    retry: &RetryPolicy,
    item: &WorkItem,
) -> Result<(), StateError> {
    let description = format!("Persisting work item {}", item.id);
    with_backoff(retry, &description, move || state.upsert_work_item(item)).await
}
