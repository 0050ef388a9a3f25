//! Lua sandbox creation
//!
//! Pipeline definitions and stage scripts both run in a restricted sandbox
//! with no filesystem, process or network access and no way to load
//! external code.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox
///
/// Only the table, string, math and coroutine libraries are loaded.
/// `require`, `dofile` and `loadfile` are removed.
///
/// The `pipeline` helper module is always present; stage modules (log,
/// params, artifact, ...) are registered by the caller.
pub fn create_sandbox() -> LuaResult<Lua> {
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    register_pipeline_module(&lua)?;

    Ok(lua)
}

/// `pipeline.define(table)` and `pipeline.stage(table)` return their argument,
/// so definitions can be written with or without them
fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    pipeline.set(
        "define",
        lua.create_function(|_, definition: Table| Ok(definition))?,
    )?;
    pipeline.set("stage", lua.create_function(|_, stage: Table| Ok(stage))?)?;

    lua.globals().set("pipeline", pipeline)?;
    Ok(())
}
