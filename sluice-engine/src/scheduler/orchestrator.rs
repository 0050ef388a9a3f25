//! Pipeline orchestrator
//!
//! Drives a pipeline run across its stages in definition order. Each stage is
//! a wave: its work items are created from the previous stage's artifacts,
//! dispatched, and fully drained before the next stage is asked for work.
//!
//! Every run and work item transition is written to the state service, so an
//! interrupted run can be resumed by calling [`PipelineOrchestrator::execute`]
//! again. Stages already completed are skipped and succeeded items are never
//! processed twice.

use serde_json::Value;
use sluice_core::domain::artifact::ArtifactId;
use sluice_core::domain::content::ContentItem;
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::run::{PipelineRun, RunStatus, StageMetrics};
use sluice_core::domain::work_item::WorkItem;
use sluice_core::dto::run::{RunSummary, StageSummary};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::plugin::{PluginError, PluginResolver, StagePlugin, StageRole, params};
use crate::repository::PipelineStateService;
use crate::retry::with_backoff;
use crate::scheduler::recovery::recover_stale_items;
use crate::service::{StageContext, WaveDispatcher, collect_artifacts};

struct ResolvedStage {
    name: String,
    plugin: Arc<dyn StagePlugin>,
}

/// Runs pipelines stage by stage
pub struct PipelineOrchestrator {
    state: Arc<dyn PipelineStateService>,
    resolver: Arc<dyn PluginResolver>,
    config: EngineConfig,
    dispatcher: WaveDispatcher,
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl PipelineOrchestrator {
    /// Creates a new orchestrator
    pub fn new(
        state: Arc<dyn PipelineStateService>,
        resolver: Arc<dyn PluginResolver>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = WaveDispatcher::new(Arc::clone(&state), config.clone());
        Self {
            state,
            resolver,
            config,
            dispatcher,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers a new run in the `Created` state
    pub async fn create_run(
        &self,
        definition: &PipelineDefinition,
        content_items: Vec<ContentItem>,
        parameters: HashMap<String, Value>,
    ) -> Result<PipelineRun> {
        definition
            .validate()
            .map_err(|e| EngineError::configuration(e.to_string()))?;

        let run = PipelineRun::new(definition, parameters);
        self.save_run(&run).await?;

        let state = self.state.as_ref();
        let items = content_items.as_slice();
        let run_id = run.id;
        with_backoff(
            &self.config.state_retry,
            &format!("Persisting content items of run {}", run_id),
            move || state.save_content_items(run_id, items),
        )
        .await?;

        info!(
            "Created run {} of pipeline '{}' with {} content item(s)",
            run.id,
            run.pipeline_name,
            content_items.len()
        );

        Ok(run)
    }

    /// Checks a definition and resolves every stage without creating a run
    pub fn validate_definition(&self, definition: &PipelineDefinition) -> Result<()> {
        self.resolve_stages(definition, None).map(|_| ())
    }

    /// Creates a run and executes it to the end
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        content_items: Vec<ContentItem>,
        parameters: HashMap<String, Value>,
    ) -> Result<PipelineRun> {
        let run = self.create_run(definition, content_items, parameters).await?;
        self.execute(definition, run.id).await
    }

    /// Executes a run, or resumes it where it stopped
    ///
    /// Returns the run in its final state. Run-level failures are reported
    /// through the run's status; `Err` means the run could not be driven at
    /// all (configuration problems, unknown run, state service down).
    ///
    /// The run can be cancelled through [`PipelineOrchestrator::cancel`] only
    /// while this call is in progress.
    pub async fn execute(&self, definition: &PipelineDefinition, run_id: Uuid) -> Result<PipelineRun> {
        let token = self.token_for(run_id);
        let result = self.drive(definition, run_id, &token).await;
        self.release_token(run_id);
        result
    }

    /// Unfinished runs of a pipeline, oldest first
    pub async fn active_runs(&self, pipeline_name: &str) -> Result<Vec<PipelineRun>> {
        let state = self.state.as_ref();
        let runs = with_backoff(&self.config.state_retry, "Listing active runs", move || {
            state.list_active_runs()
        })
        .await?;

        Ok(runs
            .into_iter()
            .filter(|r| r.pipeline_name == pipeline_name)
            .collect())
    }

    /// Executes every unfinished run of a pipeline, oldest first
    ///
    /// Used after a restart. Stops at the first run that cannot be driven.
    pub async fn resume_active_runs(&self, definition: &PipelineDefinition) -> Result<Vec<PipelineRun>> {
        let runs = self.active_runs(&definition.name).await?;
        if !runs.is_empty() {
            info!(
                "Resuming {} unfinished run(s) of pipeline '{}'",
                runs.len(),
                definition.name
            );
        }

        let mut resumed = Vec::with_capacity(runs.len());
        for run in runs {
            resumed.push(self.execute(definition, run.id).await?);
        }
        Ok(resumed)
    }

    async fn drive(
        &self,
        definition: &PipelineDefinition,
        run_id: Uuid,
        token: &CancellationToken,
    ) -> Result<PipelineRun> {
        let mut run = self.load_run(run_id).await?;

        if run.status.is_terminal() {
            info!("Run {} is already {}, nothing to execute", run.id, run.status);
            return Ok(run);
        }

        if run.pipeline_name != definition.name || run.stages != definition.stage_names() {
            return Err(EngineError::configuration(format!(
                "Run {} was created from a different definition than pipeline '{}'",
                run.id, definition.name
            )));
        }

        let stages = match self.resolve_stages(definition, Some(&run)) {
            Ok(stages) => stages,
            Err(e) => {
                error!("Run {} cannot start: {}", run.id, e);
                run.record_error(e.to_string());
                self.save_run(&run).await?;
                return Err(e);
            }
        };

        if run.status == RunStatus::Running {
            let report = recover_stale_items(self.state.as_ref(), &run, &self.config).await?;
            if report.total() > 0 {
                info!(
                    "Recovered stale work items of run {}: {} requeued, {} failed",
                    run.id, report.requeued, report.failed
                );
            }
        }

        let definition = Arc::new(definition.clone());
        let mut inbound: Vec<ArtifactId> = Vec::new();
        let mut previous: Option<&str> = None;

        for stage in &stages {
            if run.is_stage_completed(&stage.name) {
                let items = self.load_items(run.id, &stage.name).await?;
                inbound = collect_artifacts(&items);
                previous = Some(&stage.name);
                debug!("Stage '{}' of run {} already completed", stage.name, run.id);
                continue;
            }

            if token.is_cancelled() {
                return self.cancel_run(run).await;
            }

            // A stage only becomes active once its whole wave is stored
            let mut items = self.load_items(run.id, &stage.name).await?;
            if !run.is_stage_active(&stage.name) {
                let planned = match self.create_wave(&run, stage, previous, &inbound).await {
                    Ok(planned) => planned,
                    Err(e) if e.is_configuration() && run.status == RunStatus::Created => {
                        error!("Run {} cannot start: {}", run.id, e);
                        run.record_error(e.to_string());
                        self.save_run(&run).await?;
                        return Err(e);
                    }
                    Err(e) => {
                        return self
                            .fail_run(run, &stage.name, format!("Could not create work items: {}", e))
                            .await;
                    }
                };

                if !items.is_empty() {
                    info!(
                        "Completing partially stored wave of stage '{}' of run {} ({} of {} work item(s) stored)",
                        stage.name,
                        run.id,
                        items.len(),
                        planned.len()
                    );
                }
                let (wave, missing) = reconcile_wave(items, planned);

                if run.status == RunStatus::Created {
                    run.transition(RunStatus::Running)?;
                    self.save_run(&run).await?;
                    info!("Run {} of pipeline '{}' is running", run.id, run.pipeline_name);
                }
                self.save_items(&missing).await?;
                items = wave;
            } else if !items.is_empty() {
                debug!(
                    "Resuming stage '{}' of run {} with {} existing work item(s)",
                    stage.name,
                    run.id,
                    items.len()
                );
            }

            run.mark_stage_active(&stage.name);
            run.update_metrics(&stage.name, StageMetrics::from_items(&items));
            self.save_run(&run).await?;

            info!(
                "Starting stage '{}' of run {} with {} work item(s)",
                stage.name,
                run.id,
                items.len()
            );

            let context = StageContext {
                definition: Arc::clone(&definition),
                run: Arc::new(run.clone()),
                stage: stage.name.clone(),
                plugin: Arc::clone(&stage.plugin),
            };
            let outcome = self.dispatcher.dispatch(&context, items, token).await;

            run.update_metrics(&stage.name, StageMetrics::from_items(&outcome.items));
            info!(
                "Stage '{}' of run {} finished: {} succeeded, {} failed",
                stage.name,
                run.id,
                outcome.succeeded(),
                outcome.failed()
            );

            if let Some(reason) = outcome
                .stop_requested
                .clone()
                .or_else(|| outcome.fatal.clone())
            {
                return self.fail_run(run, &stage.name, reason).await;
            }

            if outcome.threshold_exceeded {
                let reason = format!(
                    "Stage '{}' exceeded its failure threshold ({} of {} work items failed)",
                    stage.name,
                    outcome.failed(),
                    outcome.items.len()
                );
                return self.fail_run(run, &stage.name, reason).await;
            }

            if outcome.cancelled {
                return self.cancel_run(run).await;
            }

            if !outcome.is_drained() {
                warn!(
                    "Stage '{}' of run {} still has unfinished work items, leaving the run running",
                    stage.name, run.id
                );
                self.save_run(&run).await?;
                return Ok(run);
            }

            run.mark_stage_completed(&stage.name);
            self.save_run(&run).await?;

            inbound = outcome.artifact_ids();
            previous = Some(&stage.name);
        }

        run.transition(RunStatus::Completed)?;
        self.save_run(&run).await?;
        info!("Run {} completed", run.id);

        Ok(run)
    }

    /// Requests cancellation of a run being executed
    ///
    /// Returns false if the run is not currently executing on this orchestrator.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        match tokens.get(&run_id) {
            Some(token) => {
                info!("Cancellation requested for run {}", run_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancellation token of a run currently executing
    pub fn cancellation_token(&self, run_id: Uuid) -> Option<CancellationToken> {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&run_id)
            .cloned()
    }

    /// Per-stage work item counts of a run
    pub async fn summarize(&self, run_id: Uuid) -> Result<RunSummary> {
        let run = self.load_run(run_id).await?;

        let mut stages = Vec::with_capacity(run.stages.len());
        for stage in &run.stages {
            let items = self.load_items(run.id, stage).await?;
            stages.push(StageSummary::from_items(stage, &items));
        }

        Ok(RunSummary::new(&run, stages))
    }

    fn resolve_stages(
        &self,
        definition: &PipelineDefinition,
        run: Option<&PipelineRun>,
    ) -> Result<Vec<ResolvedStage>> {
        definition
            .validate()
            .map_err(|e| EngineError::configuration(e.to_string()))?;

        let mut resolved = Vec::with_capacity(definition.stages.len());
        for (index, stage) in definition.stages.iter().enumerate() {
            let overrides = run.map(|r| r.stage_parameters(&stage.name)).unwrap_or_default();
            let parameters = params::merge(&stage.parameters, overrides);

            let plugin = self
                .resolver
                .resolve(&stage.plugin, &parameters)
                .map_err(|e| EngineError::from_plugin(&stage.name, e))?;

            let role = if index == 0 {
                StageRole::Starting
            } else {
                StageRole::Downstream
            };

            if !plugin.capabilities().supports(role) {
                let plugin = stage.plugin.clone();
                let err = match role {
                    StageRole::Starting => PluginError::NotStartingStage { plugin },
                    StageRole::Downstream => PluginError::NotDownstreamStage { plugin },
                };
                return Err(EngineError::from_plugin(&stage.name, err));
            }

            debug!("Resolved stage '{}' to plugin '{}'", stage.name, stage.plugin);
            resolved.push(ResolvedStage {
                name: stage.name.clone(),
                plugin,
            });
        }

        Ok(resolved)
    }

    async fn create_wave(
        &self,
        run: &PipelineRun,
        stage: &ResolvedStage,
        previous: Option<&str>,
        inbound: &[ArtifactId],
    ) -> Result<Vec<WorkItem>> {
        let items = match previous {
            None => {
                let content_items = self.load_content_items(run.id).await?;
                stage
                    .plugin
                    .get_starting_work_items(&content_items, run.id, &stage.name)
                    .await
            }
            Some(previous) => {
                stage
                    .plugin
                    .get_work_items(inbound, run.id, &stage.name, previous)
                    .await
            }
        }
        .map_err(|e| EngineError::from_plugin(&stage.name, e))?;

        if let Some(stray) = items
            .iter()
            .find(|i| i.run_id != run.id || i.stage != stage.name)
        {
            return Err(EngineError::from_plugin(
                &stage.name,
                PluginError::from(anyhow::anyhow!(
                    "work item {} does not belong to stage '{}' of run {}",
                    stray.id,
                    stage.name,
                    run.id
                )),
            ));
        }

        Ok(items)
    }

    async fn fail_run(&self, mut run: PipelineRun, stage: &str, reason: String) -> Result<PipelineRun> {
        error!("Run {} failed in stage '{}': {}", run.id, stage, reason);
        run.mark_stage_failed(stage);
        run.record_error(reason);
        run.transition(RunStatus::Failed)?;
        self.save_run(&run).await?;
        Ok(run)
    }

    async fn cancel_run(&self, mut run: PipelineRun) -> Result<PipelineRun> {
        info!("Run {} cancelled", run.id);
        run.transition(RunStatus::Cancelled)?;
        self.save_run(&run).await?;
        Ok(run)
    }

    fn token_for(&self, run_id: Uuid) -> CancellationToken {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(run_id)
            .or_default()
            .clone()
    }

    fn release_token(&self, run_id: Uuid) {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run_id);
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let state = self.state.as_ref();
        with_backoff(
            &self.config.state_retry,
            &format!("Loading run {}", run_id),
            move || state.get_run(run_id),
        )
        .await?
        .ok_or(EngineError::RunNotFound(run_id))
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        let state = self.state.as_ref();
        with_backoff(
            &self.config.state_retry,
            &format!("Persisting run {}", run.id),
            move || state.upsert_run(run),
        )
        .await?;
        Ok(())
    }

    async fn load_items(&self, run_id: Uuid, stage: &str) -> Result<Vec<WorkItem>> {
        let state = self.state.as_ref();
        let items = with_backoff(
            &self.config.state_retry,
            &format!("Loading work items of stage '{}'", stage),
            move || state.get_work_items(run_id, stage),
        )
        .await?;
        Ok(items)
    }

    async fn save_items(&self, items: &[WorkItem]) -> Result<()> {
        let state = self.state.as_ref();
        for item in items {
            with_backoff(
                &self.config.state_retry,
                &format!("Persisting work item {}", item.id),
                move || state.upsert_work_item(item),
            )
            .await?;
        }
        Ok(())
    }

    async fn load_content_items(&self, run_id: Uuid) -> Result<Vec<ContentItem>> {
        let state = self.state.as_ref();
        let items = with_backoff(
            &self.config.state_retry,
            &format!("Loading content items of run {}", run_id),
            move || state.get_content_items(run_id),
        )
        .await?;
        Ok(items)
    }
}

/// Merges a freshly planned wave with the items already stored for it
///
/// A stored item stands in for the planned item with the same content item and
/// input artifact. Returns the whole wave and the planned items not stored yet.
fn reconcile_wave(stored: Vec<WorkItem>, planned: Vec<WorkItem>) -> (Vec<WorkItem>, Vec<WorkItem>) {
    let mut by_slot: HashMap<(String, Option<ArtifactId>), VecDeque<WorkItem>> = HashMap::new();
    for item in stored {
        by_slot
            .entry((item.content_item_canonical_id.clone(), item.input_artifact_id.clone()))
            .or_default()
            .push_back(item);
    }

    let mut wave = Vec::with_capacity(planned.len());
    let mut missing = Vec::new();
    for item in planned {
        let slot = (item.content_item_canonical_id.clone(), item.input_artifact_id.clone());
        match by_slot.get_mut(&slot).and_then(VecDeque::pop_front) {
            Some(existing) => wave.push(existing),
            None => {
                missing.push(item.clone());
                wave.push(item);
            }
        }
    }

    // Stored items the plugin no longer plans still belong to the wave
    let mut leftover: Vec<WorkItem> = by_slot.into_values().flatten().collect();
    leftover.sort_by_key(|i| i.created_at);
    wave.extend(leftover);

    (wave, missing)
}
