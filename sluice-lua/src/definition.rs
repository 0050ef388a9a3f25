//! Lua pipeline definitions
//!
//! A definition file is a Lua chunk returning a table:
//!
//! ```lua
//! return pipeline.define({
//!     name = "ingest",
//!     version = "1.2.0",
//!     stages = {
//!         { name = "extract", plugin = "text-extraction" },
//!         { name = "partition", plugin = "text-partitioning",
//!           parameters = { chunk_size = 1000, overlap = 50 } },
//!     },
//! })
//! ```
//!
//! The chunk runs in the restricted sandbox. Stage parameters are converted
//! to JSON; functions and other non-data values are rejected.

use anyhow::{Context, Result};
use mlua::{Table, Value};
use sluice_core::domain::pipeline::{PipelineDefinition, StageDefinition};
use std::collections::HashMap;

use crate::sandbox::create_sandbox;

/// Nesting limit for parameter tables; also stops self-referencing tables
const MAX_TABLE_DEPTH: usize = 32;

/// Parse a pipeline definition from Lua source
///
/// # Errors
/// Fails if the source does not evaluate to a table, if `name` or `stages`
/// is missing, if a field has the wrong type, or if the resulting definition
/// does not validate.
pub fn parse_pipeline_definition(source: &str) -> Result<PipelineDefinition> {
    let lua = create_sandbox().context("Failed to create Lua sandbox")?;

    let pipeline: Table = lua
        .load(source)
        .set_name("=pipeline")
        .eval()
        .map_err(|e| anyhow::anyhow!("Failed to evaluate pipeline definition: {}", e))?;

    let name: String = pipeline
        .get("name")
        .map_err(|e| anyhow::anyhow!("Pipeline must have a 'name' field: {}", e))?;

    let version: Option<String> = pipeline
        .get("version")
        .map_err(|e| anyhow::anyhow!("Field 'version' must be a string: {}", e))?;

    let description: Option<String> = pipeline
        .get("description")
        .map_err(|e| anyhow::anyhow!("Field 'description' must be a string: {}", e))?;

    let stages = parse_stages_from_table(&pipeline)?;

    let mut definition = PipelineDefinition::new(name, stages);
    if let Some(version) = version {
        definition.version = version;
    }
    definition.description = description;

    definition
        .validate()
        .with_context(|| format!("Invalid pipeline '{}'", definition.name))?;

    Ok(definition)
}

fn parse_stages_from_table(pipeline: &Table) -> Result<Vec<StageDefinition>> {
    let stages_table: Table = pipeline
        .get("stages")
        .map_err(|e| anyhow::anyhow!("Pipeline must have a 'stages' field: {}", e))?;

    let mut stages = Vec::new();

    for pair in stages_table.sequence_values::<Table>() {
        let stage_table = pair.map_err(|e| anyhow::anyhow!("Failed to read stage entry: {}", e))?;

        let name: String = stage_table
            .get("name")
            .map_err(|e| anyhow::anyhow!("Stage must have a 'name' field: {}", e))?;

        let plugin: String = stage_table
            .get("plugin")
            .map_err(|e| anyhow::anyhow!("Stage '{}' must have a 'plugin' field: {}", name, e))?;

        let parameters = parse_parameters_from_table(&stage_table)
            .with_context(|| format!("Invalid parameters for stage '{}'", name))?;

        stages.push(StageDefinition {
            name,
            plugin,
            parameters,
        });
    }

    if stages.is_empty() {
        anyhow::bail!("Pipeline must have at least one stage");
    }

    Ok(stages)
}

fn parse_parameters_from_table(stage: &Table) -> Result<HashMap<String, serde_json::Value>> {
    match stage.get::<Value>("parameters")? {
        Value::Nil => Ok(HashMap::new()),
        Value::Table(table) => {
            let mut parameters = HashMap::new();
            for pair in table.pairs::<String, Value>() {
                let (key, value) =
                    pair.map_err(|e| anyhow::anyhow!("Parameter names must be strings: {}", e))?;
                let json = lua_value_to_json(&value, 0)
                    .with_context(|| format!("Parameter '{}' has an unsupported value", key))?;
                parameters.insert(key, json);
            }
            Ok(parameters)
        }
        _ => anyhow::bail!("Field 'parameters' must be a table"),
    }
}

/// Convert a Lua value to JSON
///
/// Tables whose keys are exactly `1..n` become arrays, other tables become
/// objects. An empty table becomes an empty object.
pub fn lua_value_to_json(val: &Value, depth: usize) -> Result<serde_json::Value> {
    match val {
        Value::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| anyhow::anyhow!("Invalid number value")),
        Value::Integer(i) => Ok(serde_json::Value::Number((*i).into())),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Table(table) => table_to_json(table, depth + 1),
        other => anyhow::bail!(
            "Unsupported Lua value type '{}' for JSON conversion",
            other.type_name()
        ),
    }
}

fn table_to_json(table: &Table, depth: usize) -> Result<serde_json::Value> {
    if depth > MAX_TABLE_DEPTH {
        anyhow::bail!("Tables nested deeper than {} levels", MAX_TABLE_DEPTH);
    }

    let len = table.raw_len();
    let entries = table.pairs::<Value, Value>().count();

    if len > 0 && entries == len {
        let mut items = Vec::with_capacity(len);
        for value in table.sequence_values::<Value>() {
            items.push(lua_value_to_json(&value?, depth)?);
        }
        return Ok(serde_json::Value::Array(items));
    }

    let mut object = serde_json::Map::new();
    for pair in table.pairs::<Value, Value>() {
        let (key, value) = pair?;
        let key = match key {
            Value::String(s) => s.to_str()?.to_string(),
            Value::Integer(i) => i.to_string(),
            other => anyhow::bail!("Unsupported table key type '{}'", other.type_name()),
        };
        object.insert(key, lua_value_to_json(&value, depth)?);
    }
    Ok(serde_json::Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pipeline_definition() {
        let definition = parse_pipeline_definition(
            r#"
            return pipeline.define({
                name = "ingest",
                version = "2.0.0",
                description = "Extract and partition",
                stages = {
                    { name = "extract", plugin = "text-extraction" },
                    {
                        name = "partition",
                        plugin = "text-partitioning",
                        parameters = { chunk_size = 1000, overlap = 50 },
                    },
                },
            })
        "#,
        )
        .unwrap();

        assert_eq!(definition.name, "ingest");
        assert_eq!(definition.version, "2.0.0");
        assert_eq!(definition.description.as_deref(), Some("Extract and partition"));
        assert_eq!(definition.stage_names(), vec!["extract", "partition"]);

        let partition = definition.stage("partition").unwrap();
        assert_eq!(partition.parameters.get("chunk_size"), Some(&json!(1000)));
        assert_eq!(partition.parameters.get("overlap"), Some(&json!(50)));
    }

    #[test]
    fn test_version_defaults() {
        let definition = parse_pipeline_definition(
            r#"return { name = "p", stages = { { name = "s", plugin = "lua" } } }"#,
        )
        .unwrap();

        assert_eq!(definition.version, "1.0.0");
        assert!(definition.description.is_none());
    }

    #[test]
    fn test_nested_parameters_convert_to_json() {
        let definition = parse_pipeline_definition(
            r#"
            return {
                name = "p",
                stages = {
                    {
                        name = "s",
                        plugin = "lua",
                        parameters = {
                            tags = { "a", "b" },
                            limits = { max = 10, ratio = 0.5 },
                            enabled = true,
                            empty = {},
                        },
                    },
                },
            }
        "#,
        )
        .unwrap();

        let parameters = &definition.stages[0].parameters;
        assert_eq!(parameters["tags"], json!(["a", "b"]));
        assert_eq!(parameters["limits"], json!({"max": 10, "ratio": 0.5}));
        assert_eq!(parameters["enabled"], json!(true));
        assert_eq!(parameters["empty"], json!({}));
    }

    #[test]
    fn test_missing_fields() {
        let err = parse_pipeline_definition(r#"return { stages = {} }"#).unwrap_err();
        assert!(err.to_string().contains("'name'"));

        let err = parse_pipeline_definition(r#"return { name = "p" }"#).unwrap_err();
        assert!(err.to_string().contains("'stages'"));

        let err = parse_pipeline_definition(r#"return { name = "p", stages = {} }"#).unwrap_err();
        assert!(err.to_string().contains("at least one stage"));

        let err =
            parse_pipeline_definition(r#"return { name = "p", stages = { { name = "s" } } }"#)
                .unwrap_err();
        assert!(err.to_string().contains("'plugin'"));
    }

    #[test]
    fn test_duplicate_stages_are_invalid() {
        let err = parse_pipeline_definition(
            r#"
            return {
                name = "p",
                stages = {
                    { name = "s", plugin = "a" },
                    { name = "s", plugin = "b" },
                },
            }
        "#,
        )
        .unwrap_err();

        assert!(format!("{:#}", err).contains("Invalid pipeline 'p'"));
    }

    #[test]
    fn test_function_parameters_are_rejected() {
        let err = parse_pipeline_definition(
            r#"
            return {
                name = "p",
                stages = { { name = "s", plugin = "lua", parameters = { f = function() end } } },
            }
        "#,
        )
        .unwrap_err();

        assert!(format!("{:#}", err).contains("Parameter 'f'"));
    }

    #[test]
    fn test_definition_runs_in_sandbox() {
        let err = parse_pipeline_definition(r#"os.exit(1)"#).unwrap_err();
        assert!(err.to_string().contains("Failed to evaluate"));
    }

    #[test]
    fn test_self_referencing_table_is_rejected() {
        let err = parse_pipeline_definition(
            r#"
            local loop = {}
            loop.self = loop
            return {
                name = "p",
                stages = { { name = "s", plugin = "lua", parameters = { loop = loop } } },
            }
        "#,
        )
        .unwrap_err();

        assert!(format!("{:#}", err).contains("nested deeper"));
    }
}
