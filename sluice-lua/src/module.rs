use mlua::prelude::*;

/// A table of functions exposed to stage scripts as a Lua global
///
/// # Example
///
/// ```rust
/// use sluice_lua::LuaModule;
/// use mlua::prelude::*;
///
/// struct ClockModule;
///
/// impl LuaModule for ClockModule {
///     fn id(&self) -> &'static str {
///         "clock"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("zero", lua.create_function(|_, ()| Ok(0))?)?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
/// }
/// ```
pub trait LuaModule: Send + Sync {
    /// Name of the global the module is registered under
    ///
    /// Must be a valid Lua identifier and unique within a registry.
    fn id(&self) -> &'static str;

    /// Registers the module's table into the Lua globals
    fn register(&self, lua: &Lua) -> LuaResult<()>;
}

/// The set of modules loaded into one sandbox
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn LuaModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module
    ///
    /// # Errors
    /// Fails if a module with the same id is already registered
    pub fn register<M: LuaModule + 'static>(&mut self, module: M) -> anyhow::Result<()> {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            anyhow::bail!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn LuaModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// Ids of the registered modules, in registration order
    pub fn ids(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    /// Registers every module into a Lua context, stopping at the first error
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }
}
