//! `content.hash(text)`: the content hash of a string, as lowercase hex

use crate::module::LuaModule;
use mlua::prelude::*;
use sluice_core::ContentHasher;

#[derive(Default)]
pub struct ContentModule {
    hasher: ContentHasher,
}

impl ContentModule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LuaModule for ContentModule {
    fn id(&self) -> &'static str {
        "content"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let content_table = lua.create_table()?;

        let hasher = self.hasher;
        content_table.set(
            "hash",
            lua.create_function(move |_, text: LuaString| {
                Ok(hasher.hash(&*text.as_bytes()).to_string())
            })?,
        )?;

        lua.globals().set(self.id(), content_table)?;
        Ok(())
    }
}
