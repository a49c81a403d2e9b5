//! Purpose: Define the public Rust API boundary for the script pool.
//! Exports: Pool, context, console and error types plus the argument boundary.
//! Role: Surface used by the C ABI, language bindings, and embedding Rust hosts.
//! Invariants: Bindings go through `boundary::dispatch` or the typed `ScriptPool` methods only.

pub mod boundary;

pub use crate::config::{EngineLimits, PoolConfig};
pub use crate::core::console::{
    Console, DeferredSink, LogLevel, LogRecord, LogSink, MemorySink, TracingSink, record_json,
};
pub use crate::core::context::{ContextBuilder, ContextHandle, ModuleContext, ModuleInfo};
pub use crate::core::engine::{EngineError, EnginePhase, ScriptEngine, ScriptInstance};
pub use crate::core::error::{Error, ErrorKind, to_status_code};
pub use crate::core::pool::ScriptPool;
pub use crate::core::rhai_engine::RhaiEngine;
pub use crate::core::source::SourceFile;
pub use boundary::{InvokeArgs, LoadFileArgs, Operation, RemoveFileArgs, dispatch};
