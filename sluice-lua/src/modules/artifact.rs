//! Artifact module
//!
//! `artifact.emit(name, text)` records an artifact for the current content
//! item and returns its content-addressed id. Emitted artifacts are collected
//! in memory; the stage plugin saves them once the script has returned.

use crate::module::LuaModule;
use mlua::prelude::*;
use sluice_core::domain::artifact::Artifact;
use std::sync::{Arc, Mutex};

/// Artifacts emitted by one script execution
pub type EmittedArtifacts = Arc<Mutex<Vec<Artifact>>>;

pub struct ArtifactModule {
    canonical_id: String,
    emitted: EmittedArtifacts,
}

impl ArtifactModule {
    pub fn new(canonical_id: impl Into<String>, emitted: EmittedArtifacts) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            emitted,
        }
    }
}

impl LuaModule for ArtifactModule {
    fn id(&self) -> &'static str {
        "artifact"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let artifact_table = lua.create_table()?;

        let canonical_id = self.canonical_id.clone();
        let emitted = Arc::clone(&self.emitted);
        artifact_table.set(
            "emit",
            lua.create_function(move |_, (name, text): (String, LuaString)| {
                if name.trim().is_empty() {
                    return Err(LuaError::RuntimeError(
                        "Artifact name must not be empty".to_string(),
                    ));
                }

                let artifact = Artifact::new(canonical_id.as_str(), name, text.as_bytes().to_vec());
                let id = artifact.id.as_str().to_string();
                emitted
                    .lock()
                    .map_err(|e| LuaError::RuntimeError(format!("Failed to lock artifacts: {}", e)))?
                    .push(artifact);
                Ok(id)
            })?,
        )?;

        lua.globals().set(self.id(), artifact_table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_collects_artifacts() {
        let lua = Lua::new();
        let emitted = EmittedArtifacts::default();
        ArtifactModule::new("docs/a.md", emitted.clone())
            .register(&lua)
            .unwrap();

        let ids: (String, String) = lua
            .load(
                r#"
            local first = artifact.emit("summary", "short")
            local second = artifact.emit("upper", string.upper("short"))
            return first, second
        "#,
            )
            .eval()
            .unwrap();

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].id.as_str(), ids.0);
        assert_eq!(emitted[0].content_item_canonical_id, "docs/a.md");
        assert_eq!(emitted[1].name, "upper");
        assert_eq!(emitted[1].text(), Some("SHORT"));
    }

    #[test]
    fn test_emit_is_content_addressed() {
        let lua = Lua::new();
        ArtifactModule::new("a", EmittedArtifacts::default())
            .register(&lua)
            .unwrap();

        let same: bool = lua
            .load(r#"return artifact.emit("x", "same") == artifact.emit("x", "same")"#)
            .eval()
            .unwrap();
        assert!(same);

        assert!(lua.load(r#"artifact.emit("", "text")"#).exec().is_err());
    }
}
