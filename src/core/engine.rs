//! Purpose: Define the seam between the pool and the script execution engine.
//! Exports: `ScriptEngine`, `ScriptInstance`, `EngineError`, `EnginePhase`.
//! Role: The pool only ever talks to engines through these traits.
//! Invariants: An instance is owned by exactly one context and never shared.
//! Invariants: `release` consumes the instance; nothing may call into it afterwards.
use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

use crate::core::context::ModuleContext;
use crate::core::source::SourceFile;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnginePhase {
    Compile,
    Run,
    Call,
    Release,
}

impl EnginePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EnginePhase::Compile => "compile",
            EnginePhase::Run => "run",
            EnginePhase::Call => "call",
            EnginePhase::Release => "release",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineError {
    pub phase: EnginePhase,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl EngineError {
    pub fn new(phase: EnginePhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase.as_str(), self.message)
    }
}

impl StdError for EngineError {}

/// Compiles a module's source inside the environment described by
/// `ModuleContext` and runs its top level once.
pub trait ScriptEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn instantiate(
        &self,
        module: &ModuleContext,
        source: &SourceFile,
    ) -> Result<Box<dyn ScriptInstance>, EngineError>;
}

/// A module that has been run once and stays resident in its slot.
pub trait ScriptInstance: Send {
    /// Calls a function defined by the module with one JSON parameter.
    fn call(&mut self, function: &str, param: Value) -> Result<Value, EngineError>;

    fn release(self: Box<Self>) -> Result<(), EngineError>;
}
