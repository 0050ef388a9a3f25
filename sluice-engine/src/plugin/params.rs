//! Stage parameter helpers

use std::collections::HashMap;

use crate::plugin::PluginError;

/// Parameters handed to a plugin factory after stage and run parameters are merged
pub type PluginParameters = HashMap<String, serde_json::Value>;

/// Reads an optional non-negative integer parameter
///
/// Accepts JSON numbers and numeric strings, so values passed as `--param k=v`
/// on the command line work too.
pub fn get_usize(
    params: &PluginParameters,
    name: &str,
    default: usize,
) -> Result<usize, PluginError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| PluginError::invalid_parameter(name, "expected a non-negative integer")),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<usize>()
            .map_err(|_| PluginError::invalid_parameter(name, "expected a non-negative integer")),
        Some(_) => Err(PluginError::invalid_parameter(
            name,
            "expected a non-negative integer",
        )),
    }
}

/// Reads an optional string parameter
pub fn get_str<'a>(params: &'a PluginParameters, name: &str) -> Result<Option<&'a str>, PluginError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(PluginError::invalid_parameter(name, "expected a string")),
    }
}

/// Reads a required, non-empty string parameter
pub fn require_str<'a>(params: &'a PluginParameters, name: &str) -> Result<&'a str, PluginError> {
    match get_str(params, name)? {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PluginError::invalid_parameter(name, "is required")),
    }
}

/// Overlays `overrides` on top of `base`
pub fn merge(base: &PluginParameters, overrides: PluginParameters) -> PluginParameters {
    let mut merged = base.clone();
    merged.extend(overrides);
    merged
}
