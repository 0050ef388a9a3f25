//! Lua stage plugin
//!
//! Runs the stage's `script` parameter once per work item, each time in a
//! fresh sandbox on a blocking thread. The script sees these globals:
//!
//! - `item`: `id`, `stage`, `previous_stage`, `canonical_id`, `content_id`,
//!   `action` (`"add_or_update"` or `"remove"`), `attempt`
//! - `input`: bytes of the inbound artifact (downstream stages), or nil
//! - `artifact`, `content`, `params` and `log` modules
//!
//! and returns `{ success = bool, stop = bool?, message = string? }`, or
//! nothing for success. A Lua error fails the item without stopping the run.
//!
//! A script running longer than the stage's `timeout` parameter (seconds,
//! default [`DEFAULT_TIMEOUT_SECS`]) is aborted and its item fails.

use async_trait::async_trait;
use mlua::{HookTriggers, Lua, Value, VmState};
use sluice_core::domain::artifact::{Artifact, ArtifactId};
use sluice_core::domain::content::{ContentAction, ContentItem};
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::work_item::WorkItem;
use sluice_engine::plugin::{one_work_item_per_stored_artifact, params};
use sluice_engine::{
    ArtifactStore, PluginCapabilities, PluginDescriptor, PluginError, PluginParameters,
    PluginRegistry, PluginResult, StagePlugin,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::module::ModuleRegistry;
use crate::modules::{
    ArtifactModule, ContentModule, EmittedArtifacts, LogModule, ParamsModule, TracingLogSink,
};
use crate::sandbox::create_sandbox;

pub const LUA_PLUGIN: &str = "lua";

/// Default script time limit, in seconds
pub const DEFAULT_TIMEOUT_SECS: usize = 30;

/// Instructions between two deadline checks
const DEADLINE_CHECK_INTERVAL: u32 = 10_000;

pub struct LuaStagePlugin {
    script: Arc<str>,
    parameters: Arc<PluginParameters>,
    artifacts: Arc<dyn ArtifactStore>,
    timeout: Duration,
}

/// What one script execution produced
struct ScriptRun {
    result: PluginResult,
    emitted: Vec<Artifact>,
}

impl LuaStagePlugin {
    /// Creates the plugin, rejecting scripts that do not compile
    pub fn new(
        script: impl Into<String>,
        parameters: PluginParameters,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, PluginError> {
        let script: String = script.into();

        let lua = create_sandbox()
            .map_err(|e| PluginError::Other(anyhow::anyhow!("Failed to create Lua sandbox: {}", e)))?;
        lua.load(script.as_str())
            .into_function()
            .map_err(|e| PluginError::invalid_parameter("script", e.to_string()))?;

        let timeout_secs = params::get_usize(&parameters, "timeout", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(PluginError::invalid_parameter("timeout", "must be greater than 0"));
        }

        Ok(Self {
            script: Arc::from(script),
            parameters: Arc::new(parameters),
            artifacts,
            timeout: Duration::from_secs(timeout_secs as u64),
        })
    }

    /// Builds the plugin from stage parameters; `script` is required
    pub fn from_parameters(
        artifacts: Arc<dyn ArtifactStore>,
        parameters: &PluginParameters,
    ) -> Result<Self, PluginError> {
        let script = params::require_str(parameters, "script")?;
        Self::new(script, parameters.clone(), artifacts)
    }

    async fn load_input(&self, item: &WorkItem) -> Result<Option<Vec<u8>>, PluginResult> {
        let Some(input_id) = &item.input_artifact_id else {
            return Ok(None);
        };

        match self.artifacts.load(input_id).await {
            Ok(Some(artifact)) => Ok(Some(artifact.content)),
            Ok(None) => Err(PluginResult::failed(format!(
                "Input artifact {} not found",
                input_id
            ))),
            Err(e) => Err(PluginResult::failed(format!(
                "Could not load input artifact {}: {}",
                input_id, e
            ))),
        }
    }
}

fn run_script(
    script: &str,
    parameters: Arc<PluginParameters>,
    item: &WorkItem,
    input: Option<Vec<u8>>,
    timeout: Duration,
) -> anyhow::Result<ScriptRun> {
    let lua = create_sandbox()?;
    let emitted = EmittedArtifacts::default();

    let deadline = Instant::now() + timeout;
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                return Err(mlua::Error::runtime(format!(
                    "script exceeded its time limit of {}s",
                    timeout.as_secs()
                )));
            }
            Ok(VmState::Continue)
        },
    )?;

    let mut modules = ModuleRegistry::new();
    modules.register(LogModule::new(TracingLogSink::new(item.stage.as_str(), item.id)))?;
    modules.register(ParamsModule::new(parameters))?;
    modules.register(ArtifactModule::new(
        item.content_item_canonical_id.as_str(),
        Arc::clone(&emitted),
    ))?;
    modules.register(ContentModule::new())?;
    modules.register_all(&lua)?;

    set_item_globals(&lua, item, input)?;

    let returned = lua
        .load(script)
        .set_name(format!("={}", item.stage))
        .eval::<Value>();

    let result = match returned {
        Ok(value) => script_result(value),
        Err(e) => {
            if Instant::now() >= deadline {
                warn!("Script for work item {} timed out after {:?}", item.id, timeout);
            }
            return Ok(ScriptRun {
                result: PluginResult::failed(format!("Script error: {}", e)),
                emitted: Vec::new(),
            });
        }
    };

    let emitted = std::mem::take(&mut *emitted.lock().unwrap_or_else(|e| e.into_inner()));
    Ok(ScriptRun { result, emitted })
}

fn set_item_globals(lua: &Lua, item: &WorkItem, input: Option<Vec<u8>>) -> mlua::Result<()> {
    let item_table = lua.create_table()?;
    item_table.set("id", item.id.to_string())?;
    item_table.set("stage", item.stage.as_str())?;
    item_table.set("previous_stage", item.previous_stage.as_deref())?;
    item_table.set("canonical_id", item.content_item_canonical_id.as_str())?;
    item_table.set("content_id", item.content_id.as_deref())?;
    let action = match item.action {
        ContentAction::AddOrUpdate => "add_or_update",
        ContentAction::Remove => "remove",
    };
    item_table.set("action", action)?;
    item_table.set("attempt", item.processing_attempts)?;
    lua.globals().set("item", item_table)?;

    if let Some(bytes) = input {
        lua.globals().set("input", lua.create_string(&bytes)?)?;
    }

    Ok(())
}

/// Interprets the script's return value; artifact ids are filled in later
fn script_result(value: Value) -> PluginResult {
    let (success, stop, message) = match value {
        Value::Nil => (true, false, None),
        Value::Boolean(success) => (success, false, None),
        Value::Table(table) => {
            let fields = (|| -> mlua::Result<_> {
                Ok((
                    table.get::<Option<bool>>("success")?.unwrap_or(true),
                    table.get::<Option<bool>>("stop")?.unwrap_or(false),
                    table.get::<Option<String>>("message")?,
                ))
            })();
            match fields {
                Ok(fields) => fields,
                Err(e) => return PluginResult::failed(format!("Invalid script result: {}", e)),
            }
        }
        other => {
            return PluginResult::failed(format!(
                "Script must return a table or nil, got {}",
                other.type_name()
            ));
        }
    };

    let mut result = if success {
        PluginResult {
            message,
            ..PluginResult::succeeded(Vec::new())
        }
    } else {
        PluginResult::failed(message.unwrap_or_else(|| "Script reported failure".to_string()))
    };
    result.stop_processing = stop;
    result
}

#[async_trait]
impl StagePlugin for LuaStagePlugin {
    fn name(&self) -> &str {
        LUA_PLUGIN
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::ANY
    }

    async fn get_starting_work_items(
        &self,
        content_items: &[ContentItem],
        run_id: Uuid,
        stage: &str,
    ) -> Result<Vec<WorkItem>, PluginError> {
        Ok(content_items
            .iter()
            .map(|c| WorkItem::starting(run_id, stage, c))
            .collect())
    }

    async fn get_work_items(
        &self,
        inbound_artifact_ids: &[ArtifactId],
        run_id: Uuid,
        stage: &str,
        previous_stage: &str,
    ) -> Result<Vec<WorkItem>, PluginError> {
        one_work_item_per_stored_artifact(
            self.artifacts.as_ref(),
            inbound_artifact_ids,
            run_id,
            stage,
            previous_stage,
        )
        .await
    }

    async fn process_work_item(
        &self,
        _definition: &PipelineDefinition,
        _run: &PipelineRun,
        item: &WorkItem,
    ) -> Result<PluginResult, PluginError> {
        let input = match self.load_input(item).await {
            Ok(input) => input,
            Err(result) => return Ok(result),
        };

        let script = Arc::clone(&self.script);
        let parameters = Arc::clone(&self.parameters);
        let owned_item = item.clone();
        let timeout = self.timeout;
        let run = tokio::task::spawn_blocking(move || {
            run_script(&script, parameters, &owned_item, input, timeout)
        })
        .await
        .map_err(|e| PluginError::Other(anyhow::anyhow!("Lua execution task failed: {}", e)))??;

        let ScriptRun {
            mut result,
            emitted,
        } = run;

        if !result.success {
            return Ok(result);
        }

        let mut artifact_ids: Vec<ArtifactId> = Vec::with_capacity(emitted.len());
        for artifact in emitted {
            let name = artifact.name.clone();
            match self.artifacts.save(artifact).await {
                Ok(id) => artifact_ids.push(id),
                Err(e) => {
                    return Ok(PluginResult::failed(format!(
                        "Could not save artifact '{}': {}",
                        name, e
                    )));
                }
            }
        }

        debug!(
            "Script for work item {} emitted {} artifact(s)",
            item.id,
            artifact_ids.len()
        );

        result.artifact_ids = artifact_ids;
        Ok(result)
    }
}

/// Registers the `lua` plugin
pub fn register_lua_plugin(
    registry: &mut PluginRegistry,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<(), PluginError> {
    registry.register(
        PluginDescriptor::new(
            LUA_PLUGIN,
            "Runs a sandboxed Lua script per work item",
            PluginCapabilities::ANY,
        ),
        move |parameters: &PluginParameters| {
            let plugin = LuaStagePlugin::from_parameters(Arc::clone(&artifacts), parameters)?;
            Ok(Arc::new(plugin) as Arc<dyn StagePlugin>)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::domain::pipeline::StageDefinition;
    use sluice_core::domain::run::RunStatus;
    use sluice_engine::{
        EngineConfig, InMemoryArtifactStore, InMemoryStateService, PipelineOrchestrator,
        PipelineStateService,
    };
    use std::collections::HashMap;

    fn plugin(store: &Arc<InMemoryArtifactStore>, script: &str) -> LuaStagePlugin {
        let mut parameters = PluginParameters::new();
        parameters.insert("script".to_string(), json!(script));
        parameters.insert("suffix".to_string(), json!("!"));
        LuaStagePlugin::from_parameters(store.clone(), &parameters).unwrap()
    }

    async fn process(plugin: &LuaStagePlugin, item: &WorkItem) -> PluginResult {
        let definition =
            PipelineDefinition::new("p", vec![StageDefinition::new("script", LUA_PLUGIN)]);
        let run = PipelineRun::new(&definition, HashMap::new());
        plugin
            .process_work_item(&definition, &run, item)
            .await
            .unwrap()
    }

    fn starting_item(canonical_id: &str) -> WorkItem {
        WorkItem::starting(
            Uuid::new_v4(),
            "script",
            &ContentItem::new(canonical_id, canonical_id),
        )
    }

    #[tokio::test]
    async fn test_nil_return_is_success() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let plugin = plugin(&store, r#"log.info("processing " .. item.canonical_id)"#);

        let result = process(&plugin, &starting_item("a.txt")).await;

        assert!(result.success);
        assert!(result.artifact_ids.is_empty());
        assert!(result.message.is_none());
    }

    #[tokio::test]
    async fn test_emitted_artifacts_are_saved() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let plugin = plugin(
            &store,
            r#"
            artifact.emit("name", item.canonical_id .. params.get("suffix"))
            artifact.emit("hash", content.hash(item.canonical_id))
            return { success = true, message = "done" }
        "#,
        );

        let result = process(&plugin, &starting_item("a.txt")).await;

        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("done"));
        assert_eq!(result.artifact_ids.len(), 2);
        let first = store.load(&result.artifact_ids[0]).await.unwrap().unwrap();
        assert_eq!(first.text(), Some("a.txt!"));
        assert_eq!(first.content_item_canonical_id, "a.txt");
    }

    #[tokio::test]
    async fn test_downstream_script_reads_input() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let input = store
            .save(Artifact::new("a.txt", "text", "hello"))
            .await
            .unwrap();
        let plugin = plugin(&store, r#"artifact.emit("upper", string.upper(input))"#);
        let item = WorkItem::downstream(Uuid::new_v4(), "script", "extract", input, "a.txt");

        let result = process(&plugin, &item).await;

        assert!(result.success);
        let upper = store.load(&result.artifact_ids[0]).await.unwrap().unwrap();
        assert_eq!(upper.text(), Some("HELLO"));
    }

    #[tokio::test]
    async fn test_missing_input_artifact_fails_item() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let plugin = plugin(&store, "return nil");
        let item = WorkItem::downstream(
            Uuid::new_v4(),
            "script",
            "extract",
            ArtifactId::new("gone"),
            "a.txt",
        );

        let result = process(&plugin, &item).await;

        assert!(!result.success);
        assert!(!result.stop_processing);
    }

    #[tokio::test]
    async fn test_reported_failure_and_stop() {
        let store = Arc::new(InMemoryArtifactStore::new());

        let failed = process(
            &plugin(&store, r#"artifact.emit("x", "y") return { success = false, message = "bad input" }"#),
            &starting_item("a"),
        )
        .await;
        assert!(!failed.success);
        assert!(!failed.stop_processing);
        assert_eq!(failed.message.as_deref(), Some("bad input"));
        assert!(store.is_empty());

        let stopped = process(
            &plugin(&store, r#"return { success = false, stop = true }"#),
            &starting_item("a"),
        )
        .await;
        assert!(!stopped.success);
        assert!(stopped.stop_processing);
        assert_eq!(stopped.message.as_deref(), Some("Script reported failure"));
    }

    #[tokio::test]
    async fn test_runtime_error_fails_item_only() {
        let store = Arc::new(InMemoryArtifactStore::new());

        let result = process(&plugin(&store, r#"error("boom")"#), &starting_item("a")).await;
        assert!(!result.success);
        assert!(!result.stop_processing);
        assert!(result.message.unwrap().contains("boom"));

        let sandboxed = process(&plugin(&store, r#"io.open("/etc/passwd")"#), &starting_item("a")).await;
        assert!(!sandboxed.success);

        let missing = process(&plugin(&store, r#"params.require("nope")"#), &starting_item("a")).await;
        assert!(missing.message.unwrap().contains("Required parameter 'nope'"));
    }

    #[tokio::test]
    async fn test_endless_script_is_aborted_at_its_deadline() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let mut parameters = PluginParameters::new();
        parameters.insert("script".to_string(), json!("while true do end"));
        parameters.insert("timeout".to_string(), json!(1));
        let plugin = LuaStagePlugin::from_parameters(store.clone(), &parameters).unwrap();

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            process(&plugin, &starting_item("a")),
        )
        .await
        .expect("script was not aborted");

        assert!(!result.success);
        assert!(!result.stop_processing);
        assert!(result.message.unwrap().contains("time limit"));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_script_sees_content_id_and_removal() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let plugin = plugin(
            &store,
            r#"
            if item.action == "remove" then
                return { message = "removed " .. item.canonical_id }
            end
            artifact.emit("source", item.content_id)
        "#,
        );

        let added = WorkItem::starting(
            Uuid::new_v4(),
            "script",
            &ContentItem::new("docs/a.md", "blobs/7f3a"),
        );
        let result = process(&plugin, &added).await;
        let source = store.load(&result.artifact_ids[0]).await.unwrap().unwrap();
        assert_eq!(source.text(), Some("blobs/7f3a"));

        let removed = WorkItem::starting(
            Uuid::new_v4(),
            "script",
            &ContentItem::new("docs/a.md", "blobs/7f3a").with_action(ContentAction::Remove),
        );
        let result = process(&plugin, &removed).await;
        assert!(result.success);
        assert!(result.artifact_ids.is_empty());
        assert_eq!(result.message.as_deref(), Some("removed docs/a.md"));
    }

    #[tokio::test]
    async fn test_unexpected_return_value_fails_item() {
        let store = Arc::new(InMemoryArtifactStore::new());

        let result = process(&plugin(&store, "return 42"), &starting_item("a")).await;

        assert!(!result.success);
        assert!(result.message.unwrap().contains("got integer"));
    }

    #[test]
    fn test_script_parameter_is_validated() {
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());

        let missing = LuaStagePlugin::from_parameters(store.clone(), &PluginParameters::new())
            .err()
            .unwrap();
        assert!(missing.is_configuration());

        let mut parameters = PluginParameters::new();
        parameters.insert("script".to_string(), json!("return {"));
        let syntax = LuaStagePlugin::from_parameters(store.clone(), &parameters)
            .err()
            .unwrap();
        assert!(syntax.is_configuration());

        let mut parameters = PluginParameters::new();
        parameters.insert("script".to_string(), json!("return nil"));
        parameters.insert("timeout".to_string(), json!(0));
        let timeout = LuaStagePlugin::from_parameters(store, &parameters)
            .err()
            .unwrap();
        assert!(timeout.is_configuration());
    }

    #[tokio::test]
    async fn test_lua_stages_in_a_pipeline() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let mut registry = PluginRegistry::new();
        register_lua_plugin(&mut registry, store.clone()).unwrap();

        let definition = PipelineDefinition::new(
            "scripted",
            vec![
                StageDefinition::new("name", LUA_PLUGIN).with_parameter(
                    "script",
                    json!(r#"artifact.emit("name", item.canonical_id)"#),
                ),
                StageDefinition::new("shout", LUA_PLUGIN).with_parameter(
                    "script",
                    json!(r#"
                        if input == "skip.txt" then
                            return { success = false, message = "skipped" }
                        end
                        artifact.emit("upper", string.upper(input))
                    "#),
                ),
            ],
        );

        let state = Arc::new(InMemoryStateService::new());
        let orchestrator = PipelineOrchestrator::new(
            state.clone(),
            Arc::new(registry),
            EngineConfig::default(),
        );
        let content = vec![
            ContentItem::new("a.txt", "a.txt"),
            ContentItem::new("skip.txt", "skip.txt"),
        ];

        let run = orchestrator
            .run(&definition, content, HashMap::new())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        let summary = orchestrator.summarize(run.id).await.unwrap();
        assert_eq!(summary.stage("name").unwrap().succeeded, 2);
        assert_eq!(summary.stage("shout").unwrap().succeeded, 1);
        assert_eq!(summary.stage("shout").unwrap().failed, 1);
        assert_eq!(store.len(), 3);

        let mut shout: Vec<String> = state
            .get_work_items(run.id, "shout")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.content_item_canonical_id)
            .collect();
        shout.sort();
        assert_eq!(shout, vec!["a.txt", "skip.txt"]);
    }
}
