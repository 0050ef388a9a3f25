//! `sluice run`: executes a pipeline over a directory of content

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use serde_json::Value as JsonValue;
use sluice_core::domain::run::RunStatus;
use sluice_core::dto::run::RunSummary;
use sluice_engine::{
    EngineConfig, FailureThreshold, InMemoryArtifactStore, InMemoryStateService,
    PipelineOrchestrator,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::build_registry;
use crate::pipeline::load_pipeline;
use crate::source::DirectoryContentSource;

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline definition (.lua or .json)
    #[arg(short, long)]
    pipeline: PathBuf,

    /// Directory whose files become the run's content items
    #[arg(short, long)]
    source: PathBuf,

    /// Work items processed concurrently per stage (overrides SLUICE_MAX_PARALLEL)
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Fail the run once this many items of a stage have failed
    #[arg(long)]
    fail_after: Option<usize>,

    /// Run parameters as KEY=VALUE; `Stage.<stage>.<name>=VALUE` overrides a
    /// stage parameter. Values are parsed as JSON when possible.
    #[arg(long, value_parser = parse_key_val)]
    param: Vec<(String, JsonValue)>,
}

/// Parse a single KEY=VALUE pair
fn parse_key_val(s: &str) -> Result<(String, JsonValue)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].trim();
    if key.is_empty() {
        anyhow::bail!("invalid KEY=value: empty key in `{}`", s);
    }
    let raw = &s[pos + 1..];
    let value =
        serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Environment configuration with command-line overrides applied
fn engine_config(max_parallel: Option<usize>, fail_after: Option<usize>) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env();
    if let Some(max_parallel) = max_parallel {
        config = config.with_max_parallel(max_parallel);
    }
    if let Some(count) = fail_after {
        config = config.with_failure_threshold(FailureThreshold::Count(count));
    }
    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}

pub async fn run_pipeline(args: RunArgs) -> Result<()> {
    let definition = load_pipeline(&args.pipeline)?;
    let config = engine_config(args.max_parallel, args.fail_after)?;

    let source = Arc::new(DirectoryContentSource::new(&args.source)?);
    let content = source.scan()?;
    info!(
        "Found {} content item(s) in {}",
        content.len(),
        args.source.display()
    );

    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let registry = build_registry(source, artifacts.clone())?;
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(InMemoryStateService::new()),
        Arc::new(registry),
        config,
    );

    let parameters: HashMap<String, JsonValue> = args.param.into_iter().collect();
    let run = orchestrator
        .create_run(&definition, content, parameters)
        .await
        .context("Failed to create run")?;

    let run_id = run.id;
    let execution = orchestrator.execute(&definition, run_id);
    tokio::pin!(execution);

    let run = tokio::select! {
        result = &mut execution => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling run");
            orchestrator.cancel(run_id);
            execution.await
        }
    }
    .with_context(|| format!("Failed to execute run {}", run_id))?;
    let summary = orchestrator.summarize(run.id).await?;

    print_summary(&summary, artifacts.len());

    if summary.status != RunStatus::Completed {
        anyhow::bail!("Run {} finished as {}", summary.run_id, summary.status);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, artifact_count: usize) {
    let headline = match summary.status {
        RunStatus::Completed => "✓ Run completed".green().bold(),
        RunStatus::Cancelled => "⊘ Run cancelled".yellow().bold(),
        _ => format!("✗ Run {}", summary.status).red().bold(),
    };
    println!("{}", headline);
    println!("  Run:       {}", summary.run_id.to_string().cyan());
    println!("  Pipeline:  {}", summary.pipeline_name.bold());
    println!("  Artifacts: {}", artifact_count.to_string().dimmed());
    println!();
    println!(
        "  {:<20} {:>9} {:>9} {:>9} {:>11} {:>9}",
        "STAGE".bold(),
        "PENDING".bold(),
        "SUCCEEDED".bold(),
        "FAILED".bold(),
        "IN PROGRESS".bold(),
        "REMOVED".bold()
    );

    for stage in &summary.stages {
        let failed = if stage.failed > 0 {
            stage.failed.to_string().red()
        } else {
            stage.failed.to_string().normal()
        };
        println!(
            "  {:<20} {:>9} {:>9} {:>9} {:>11} {:>9}",
            stage.stage,
            stage.pending,
            stage.succeeded.to_string().green(),
            failed,
            stage.in_progress,
            stage.removed.to_string().dimmed()
        );
    }

    if !summary.errors.is_empty() {
        println!();
        println!("{}", "Errors:".red().bold());
        for error in &summary.errors {
            println!("  - {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("Stage.partition.chunk_size=500").unwrap(),
            ("Stage.partition.chunk_size".to_string(), json!(500))
        );
        assert_eq!(
            parse_key_val("label=hello world").unwrap(),
            ("label".to_string(), json!("hello world"))
        );
        assert_eq!(
            parse_key_val("expr=a=b").unwrap(),
            ("expr".to_string(), json!("a=b"))
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn test_command_line_overrides_config() {
        let config = engine_config(Some(2), Some(3)).unwrap();
        assert_eq!(config.max_parallel_work_items, 2);
        assert_eq!(config.failure_threshold, Some(FailureThreshold::Count(3)));

        assert!(engine_config(Some(0), None).is_err());
        assert!(engine_config(None, Some(0)).is_err());
    }
}
