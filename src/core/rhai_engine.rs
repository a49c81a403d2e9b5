//! Purpose: Default execution engine backed by Rhai.
//! Exports: `RhaiEngine`.
//! Role: Builds one `rhai::Engine` per context so hooks and resolvers never leak across slots.
//! Invariants: `console::*`, `script::*`, `__dirname`, `__filename`, `__key` are bound per context.
//! Invariants: The module's top level runs exactly once; host calls never re-run it.
//! Notes: `exports` is bound as `this` for host calls; it is the only state that survives between them.
use rhai::module_resolvers::{DummyModuleResolver, FileModuleResolver};
use rhai::{AST, CallFnOptions, Dynamic, Engine, EvalAltResult, Module, ParseError, Position, Scope};
use serde_json::Value;

use crate::config::{EngineLimits, PoolConfig};
use crate::core::console::{Console, LogLevel};
use crate::core::context::ModuleContext;
use crate::core::engine::{EngineError, EnginePhase, ScriptEngine, ScriptInstance};
use crate::core::source::SourceFile;

const EXPORTS: &str = "exports";
const UNLOAD_HOOK: &str = "unload";
const CONSOLE_LEVELS: [LogLevel; 4] = [LogLevel::Log, LogLevel::Info, LogLevel::Warn, LogLevel::Error];

#[derive(Clone, Debug)]
pub struct RhaiEngine {
    limits: EngineLimits,
    allow_imports: bool,
}

impl RhaiEngine {
    pub fn new() -> Self {
        Self {
            limits: EngineLimits::default(),
            allow_imports: true,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            limits: config.limits,
            allow_imports: config.allow_imports,
        }
    }

    fn engine_for(&self, module: &ModuleContext) -> Engine {
        let mut engine = Engine::new();
        apply_limits(&mut engine, &self.limits);

        let console = module.console.clone();
        engine.on_print(move |text| console.emit(LogLevel::Log, text));
        let console = module.console.clone();
        engine.on_debug(move |text, _source, _pos| console.emit(LogLevel::Debug, text));

        engine.register_static_module("console", console_module(&module.console).into());
        engine.register_static_module("script", script_module(module).into());

        if self.allow_imports {
            engine.set_module_resolver(FileModuleResolver::new_with_path(module.directory.clone()));
        } else {
            engine.set_module_resolver(DummyModuleResolver::new());
        }
        engine
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for RhaiEngine {
    fn name(&self) -> &'static str {
        "rhai"
    }

    fn instantiate(
        &self,
        module: &ModuleContext,
        source: &SourceFile,
    ) -> Result<Box<dyn ScriptInstance>, EngineError> {
        let engine = self.engine_for(module);
        let file = module.file.to_string_lossy().to_string();

        let mut scope = Scope::new();
        scope.push_constant("__dirname", module.directory.to_string_lossy().to_string());
        scope.push_constant("__filename", file.clone());
        scope.push_constant("__key", module.key);
        scope.push(EXPORTS, rhai::Map::new());

        let mut ast = engine
            .compile_with_scope(&scope, &source.text)
            .map_err(|err| parse_error(&err))?;
        ast.set_source(file);

        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| eval_error(EnginePhase::Run, &err))?;

        let exports = scope
            .get_value::<Dynamic>(EXPORTS)
            .unwrap_or_else(|| Dynamic::from_map(rhai::Map::new()));

        Ok(Box::new(RhaiInstance {
            engine,
            ast,
            scope,
            exports,
        }))
    }
}

struct RhaiInstance {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    exports: Dynamic,
}

impl RhaiInstance {
    fn has_unload_hook(&self) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == UNLOAD_HOOK && f.params.is_empty())
    }
}

impl ScriptInstance for RhaiInstance {
    fn call(&mut self, function: &str, param: Value) -> Result<Value, EngineError> {
        let arg = rhai::serde::to_dynamic(&param).map_err(|err| {
            EngineError::new(EnginePhase::Call, format!("parameter conversion: {err}"))
        })?;
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut self.exports);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.ast, function, (arg,))
            .map_err(|err| eval_error(EnginePhase::Call, &err))?;
        rhai::serde::from_dynamic::<Value>(&result).map_err(|err| {
            EngineError::new(EnginePhase::Call, format!("result conversion: {err}"))
        })
    }

    fn release(mut self: Box<Self>) -> Result<(), EngineError> {
        if !self.has_unload_hook() {
            return Ok(());
        }
        let this = &mut *self;
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut this.exports);
        this.engine
            .call_fn_with_options::<Dynamic>(options, &mut this.scope, &this.ast, UNLOAD_HOOK, ())
            .map(|_| ())
            .map_err(|err| eval_error(EnginePhase::Release, &err))
    }
}

fn console_module(console: &Console) -> Module {
    let mut module = Module::new();
    for level in CONSOLE_LEVELS {
        let name = level.as_str();
        let out = console.clone();
        module.set_native_fn(name, move |a: Dynamic| -> Result<(), Box<EvalAltResult>> {
            out.emit(level, render(&[a]));
            Ok(())
        });
        let out = console.clone();
        module.set_native_fn(
            name,
            move |a: Dynamic, b: Dynamic| -> Result<(), Box<EvalAltResult>> {
                out.emit(level, render(&[a, b]));
                Ok(())
            },
        );
        let out = console.clone();
        module.set_native_fn(
            name,
            move |a: Dynamic, b: Dynamic, c: Dynamic| -> Result<(), Box<EvalAltResult>> {
                out.emit(level, render(&[a, b, c]));
                Ok(())
            },
        );
    }
    module
}

fn script_module(context: &ModuleContext) -> Module {
    let mut module = Module::new();
    let directory = context.directory.to_string_lossy().to_string();
    module.set_native_fn("dirname", move || -> Result<String, Box<EvalAltResult>> {
        Ok(directory.clone())
    });
    let file = context.file.to_string_lossy().to_string();
    module.set_native_fn("filename", move || -> Result<String, Box<EvalAltResult>> {
        Ok(file.clone())
    });
    let key = context.key;
    module.set_native_fn("key", move || -> Result<i64, Box<EvalAltResult>> { Ok(key) });
    module
}

fn render(values: &[Dynamic]) -> String {
    values
        .iter()
        .map(|value| {
            if value.is_string() {
                value.clone().into_string().unwrap_or_default()
            } else {
                value.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn apply_limits(engine: &mut Engine, limits: &EngineLimits) {
    if limits.max_operations > 0 {
        engine.set_max_operations(limits.max_operations);
    }
    if limits.max_call_levels > 0 {
        engine.set_max_call_levels(limits.max_call_levels);
    }
    if limits.max_expr_depth > 0 {
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    }
    if limits.max_string_size > 0 {
        engine.set_max_string_size(limits.max_string_size);
    }
    if limits.max_array_size > 0 {
        engine.set_max_array_size(limits.max_array_size);
    }
    if limits.max_map_size > 0 {
        engine.set_max_map_size(limits.max_map_size);
    }
}

fn location(pos: Position) -> (Option<u32>, Option<u32>) {
    (
        pos.line().map(|line| line as u32),
        pos.position().map(|column| column as u32),
    )
}

fn parse_error(err: &ParseError) -> EngineError {
    let (line, column) = location(err.position());
    EngineError::new(EnginePhase::Compile, err.to_string()).at(line, column)
}

fn eval_error(phase: EnginePhase, err: &EvalAltResult) -> EngineError {
    let (line, column) = location(err.position());
    EngineError::new(phase, err.to_string()).at(line, column)
}
