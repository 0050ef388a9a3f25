//! Sluice Lua
//!
//! Lua support for Sluice pipelines:
//! - [`parse_pipeline_definition`]: pipeline definitions written in Lua
//! - [`LuaStagePlugin`]: stages implemented as sandboxed Lua scripts
//!
//! Both run in the sandbox from [`sandbox::create_sandbox`], which has no
//! filesystem, process or network access.

pub mod definition;
pub mod module;
pub mod modules;
pub mod plugin;
pub mod sandbox;

pub use definition::parse_pipeline_definition;
pub use module::{LuaModule, ModuleRegistry};
pub use plugin::{LUA_PLUGIN, LuaStagePlugin, register_lua_plugin};
