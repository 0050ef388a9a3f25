//! Stage parameter module
//!
//! Exposes the merged stage parameters to stage scripts:
//! - `params.get(name, default?)`: the value, or `default` when absent
//! - `params.require(name)`: the value, raising an error when absent
//! - `params.has(name)`
//! - `params.all()`: every parameter as a table
//!
//! JSON values are converted to their Lua equivalents; JSON `null` counts as
//! absent.

use crate::module::LuaModule;
use mlua::prelude::*;
use sluice_engine::PluginParameters;
use std::sync::Arc;

pub struct ParamsModule {
    parameters: Arc<PluginParameters>,
}

impl ParamsModule {
    pub fn new(parameters: Arc<PluginParameters>) -> Self {
        Self { parameters }
    }
}

fn lookup<'a>(parameters: &'a PluginParameters, name: &str) -> Option<&'a serde_json::Value> {
    parameters.get(name).filter(|v| !v.is_null())
}

impl LuaModule for ParamsModule {
    fn id(&self) -> &'static str {
        "params"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let params_table = lua.create_table()?;

        {
            let parameters = Arc::clone(&self.parameters);
            params_table.set(
                "get",
                lua.create_function(move |lua, (name, default): (String, LuaValue)| {
                    match lookup(&parameters, &name) {
                        Some(value) => lua.to_value(value),
                        None => Ok(default),
                    }
                })?,
            )?;
        }

        {
            let parameters = Arc::clone(&self.parameters);
            params_table.set(
                "require",
                lua.create_function(move |lua, name: String| {
                    let value = lookup(&parameters, &name).ok_or_else(|| {
                        LuaError::RuntimeError(format!("Required parameter '{}' is not set", name))
                    })?;
                    lua.to_value(value)
                })?,
            )?;
        }

        {
            let parameters = Arc::clone(&self.parameters);
            params_table.set(
                "has",
                lua.create_function(move |_, name: String| {
                    Ok(lookup(&parameters, &name).is_some())
                })?,
            )?;
        }

        {
            let parameters = Arc::clone(&self.parameters);
            params_table.set(
                "all",
                lua.create_function(move |lua, ()| {
                    let table = lua.create_table()?;
                    for (key, value) in parameters.iter().filter(|(_, v)| !v.is_null()) {
                        table.set(key.as_str(), lua.to_value(value)?)?;
                    }
                    Ok(table)
                })?,
            )?;
        }

        lua.globals().set(self.id(), params_table)?;
        Ok(())
    }
}
