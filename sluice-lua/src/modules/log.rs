//! Logging module for stage scripts
//!
//! `log.debug/info/warning/error(msg)` write to a [`LogSink`]. Stage scripts
//! run with a [`TracingLogSink`], which forwards into `tracing` tagged with
//! the stage and work item; tests plug in their own sinks.

use crate::module::LuaModule;
use mlua::prelude::*;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 4] = [Self::Debug, Self::Info, Self::Warning, Self::Error];

    /// Name of the Lua function for this level
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

/// Destination for script log lines
pub trait LogSink: Send + Sync {
    fn write(&mut self, level: LogLevel, message: &str);
}

/// Forwards script log lines into `tracing`
pub struct TracingLogSink {
    stage: String,
    work_item_id: Uuid,
}

impl TracingLogSink {
    pub fn new(stage: impl Into<String>, work_item_id: Uuid) -> Self {
        Self {
            stage: stage.into(),
            work_item_id,
        }
    }
}

impl LogSink for TracingLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        let stage = self.stage.as_str();
        let work_item = self.work_item_id;
        match level {
            LogLevel::Debug => tracing::debug!(stage, %work_item, "{}", message),
            LogLevel::Info => tracing::info!(stage, %work_item, "{}", message),
            LogLevel::Warning => tracing::warn!(stage, %work_item, "{}", message),
            LogLevel::Error => tracing::error!(stage, %work_item, "{}", message),
        }
    }
}

pub struct LogModule<S: LogSink> {
    sink: Arc<Mutex<S>>,
}

impl<S: LogSink> LogModule<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Shares an existing sink, so the caller can inspect it afterwards
    pub fn shared(sink: Arc<Mutex<S>>) -> Self {
        Self { sink }
    }
}

impl<S: LogSink + 'static> LuaModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        for level in LogLevel::ALL {
            let sink = Arc::clone(&self.sink);
            log_table.set(
                level.function_name(),
                lua.create_function(move |_, msg: String| {
                    sink.lock()
                        .map_err(|e| LuaError::RuntimeError(format!("Failed to lock sink: {}", e)))?
                        .write(level, &msg);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestLogSink {
        messages: Vec<(LogLevel, String)>,
    }

    impl LogSink for TestLogSink {
        fn write(&mut self, level: LogLevel, message: &str) {
            self.messages.push((level, message.to_string()));
        }
    }

    #[test]
    fn test_log_module_writes_every_level() {
        let lua = Lua::new();
        let sink = Arc::new(Mutex::new(TestLogSink::default()));
        LogModule::shared(sink.clone()).register(&lua).unwrap();

        lua.load(
            r#"
            log.debug("d")
            log.info("i")
            log.warning("w")
            log.error("e")
        "#,
        )
        .exec()
        .unwrap();

        let messages = &sink.lock().unwrap().messages;
        assert_eq!(
            messages.as_slice(),
            &[
                (LogLevel::Debug, "d".to_string()),
                (LogLevel::Info, "i".to_string()),
                (LogLevel::Warning, "w".to_string()),
                (LogLevel::Error, "e".to_string()),
            ]
        );
    }

    #[test]
    fn test_log_requires_string() {
        let lua = Lua::new();
        LogModule::new(TestLogSink::default()).register(&lua).unwrap();

        assert!(lua.load(r#"log.info({})"#).exec().is_err());
    }

    #[test]
    fn test_tracing_sink_accepts_all_levels() {
        let mut sink = TracingLogSink::new("extract", Uuid::new_v4());
        for level in LogLevel::ALL {
            sink.write(level, "message");
        }
        assert_eq!(LogLevel::Warning.to_string(), "warning");
    }
}
