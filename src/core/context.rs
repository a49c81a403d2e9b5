//! Purpose: Build isolated script contexts bound to one key and one source file.
//! Exports: `ModuleContext`, `ModuleInfo`, `ContextHandle`, `ContextBuilder`.
//! Role: Leaf component under the pool; resolves sources and drives the engine once.
//! Invariants: Bindings are derived only from the key and the resolved path.
//! Invariants: A handle holds no reference back to the pool that stores it.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::core::console::{Console, LogSink};
use crate::core::engine::{EngineError, ScriptEngine, ScriptInstance};
use crate::core::error::{Error, ErrorKind};
use crate::core::source::SourceFile;

/// Module-local environment handed to the engine.
#[derive(Clone, Debug)]
pub struct ModuleContext {
    pub key: i64,
    pub file: PathBuf,
    pub directory: PathBuf,
    pub console: Console,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleInfo {
    pub key: i64,
    pub file: PathBuf,
    pub directory: PathBuf,
}

pub struct ContextHandle {
    module: ModuleContext,
    instance: Box<dyn ScriptInstance>,
}

impl ContextHandle {
    pub fn key(&self) -> i64 {
        self.module.key
    }

    pub fn file(&self) -> &Path {
        &self.module.file
    }

    pub fn directory(&self) -> &Path {
        &self.module.directory
    }

    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            key: self.module.key,
            file: self.module.file.clone(),
            directory: self.module.directory.clone(),
        }
    }

    pub fn call(&mut self, function: &str, param: Value) -> Result<Value, Error> {
        self.instance
            .call(function, param)
            .map_err(|err| engine_error(ErrorKind::Execution, &self.module, err))
    }

    /// Consumes the handle. The engine's release error is returned for
    /// reporting only; the handle is gone either way.
    pub fn release(self) -> Result<(), Error> {
        let ContextHandle { module, instance } = self;
        instance
            .release()
            .map_err(|err| engine_error(ErrorKind::Internal, &module, err))
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ContextBuilder {
    engine: Arc<dyn ScriptEngine>,
    sink: Arc<dyn LogSink>,
    base_dir: Option<PathBuf>,
}

impl ContextBuilder {
    pub fn new(engine: Arc<dyn ScriptEngine>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            engine,
            sink,
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, base_dir: Option<PathBuf>) -> Self {
        self.base_dir = base_dir;
        self
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn build(&self, key: i64, path: &str) -> Result<ContextHandle, Error> {
        let source =
            SourceFile::resolve(path, self.base_dir.as_deref()).map_err(|err| err.with_key(key))?;
        let module = ModuleContext {
            key,
            file: source.path.clone(),
            directory: source.directory.clone(),
            console: Console::new(key, &source.path, Arc::clone(&self.sink)),
        };
        let instance = self
            .engine
            .instantiate(&module, &source)
            .map_err(|err| engine_error(ErrorKind::Load, &module, err))?;
        Ok(ContextHandle { module, instance })
    }
}

fn engine_error(kind: ErrorKind, module: &ModuleContext, err: EngineError) -> Error {
    let mut out = Error::new(kind)
        .with_message(err.to_string())
        .with_key(module.key)
        .with_path(&module.file);
    if let Some(line) = err.line {
        out = out.with_line(line);
    }
    if let Some(column) = err.column {
        out = out.with_column(column);
    }
    out.with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{ContextBuilder, ModuleContext};
    use crate::core::console::{LogLevel, MemorySink};
    use crate::core::engine::{EngineError, EnginePhase, ScriptEngine, ScriptInstance};
    use crate::core::error::ErrorKind;
    use crate::core::source::SourceFile;
    use serde_json::{Value, json};
    use std::fs;
    use std::sync::Arc;

    struct EchoEngine;

    struct EchoInstance {
        module: ModuleContext,
    }

    impl ScriptEngine for EchoEngine {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn instantiate(
            &self,
            module: &ModuleContext,
            source: &SourceFile,
        ) -> Result<Box<dyn ScriptInstance>, EngineError> {
            if source.text.contains("syntax error") {
                return Err(EngineError::new(EnginePhase::Compile, "bad token").at(Some(2), Some(5)));
            }
            module.console.emit(LogLevel::Log, source.text.trim());
            Ok(Box::new(EchoInstance {
                module: module.clone(),
            }))
        }
    }

    impl ScriptInstance for EchoInstance {
        fn call(&mut self, function: &str, param: Value) -> Result<Value, EngineError> {
            Ok(json!({
                "function": function,
                "param": param,
                "dir": self.module.directory.to_string_lossy(),
            }))
        }

        fn release(self: Box<Self>) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn build_binds_identity_and_console() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("hello.rhai");
        fs::write(&script, "hello\n").expect("write");
        let sink = MemorySink::new();
        let builder = ContextBuilder::new(Arc::new(EchoEngine), Arc::new(sink.clone()));

        let mut handle = builder.build(4, script.to_str().unwrap()).expect("build");
        let canonical = fs::canonicalize(&script).expect("canonical");
        assert_eq!(handle.key(), 4);
        assert_eq!(handle.file(), canonical.as_path());
        assert_eq!(handle.directory(), canonical.parent().unwrap());

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, 4);
        assert_eq!(records[0].message, "hello");

        let out = handle.call("work", json!(1)).expect("call");
        assert_eq!(out["function"], "work");
        handle.release().expect("release");
    }

    #[test]
    fn engine_failure_becomes_load_error_with_location() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("broken.rhai");
        fs::write(&script, "syntax error").expect("write");
        let builder = ContextBuilder::new(Arc::new(EchoEngine), Arc::new(MemorySink::new()));

        let err = builder.build(1, script.to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(err.key(), Some(1));
        assert_eq!(err.line(), Some(2));
        assert_eq!(err.column(), Some(5));
        assert_eq!(err.path(), Some(fs::canonicalize(&script).unwrap().as_path()));
    }

    #[test]
    fn same_path_different_keys_are_distinct() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("shared.rhai");
        fs::write(&script, "shared").expect("write");
        let builder = ContextBuilder::new(Arc::new(EchoEngine), Arc::new(MemorySink::new()));

        let first = builder.build(1, script.to_str().unwrap()).expect("first");
        let second = builder.build(2, script.to_str().unwrap()).expect("second");
        assert_eq!(first.file(), second.file());
        assert_ne!(first.key(), second.key());
        first.release().expect("release first");
        assert_eq!(second.info().key, 2);
    }
}
