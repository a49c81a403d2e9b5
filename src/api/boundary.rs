//! Purpose: Validate dynamically typed host arguments before they reach the pool.
//! Exports: `Operation`, `LoadFileArgs`, `RemoveFileArgs`, `InvokeArgs`, `dispatch`.
//! Role: The single foreign-call boundary shared by the C ABI and language bindings.
//! Invariants: Arguments are inspected by tag; nothing is coerced (no "1" -> 1, no 1.0 -> 1).
//! Invariants: Every `Argument` error is raised before any pool mutation.
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::pool::ScriptPool;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    LoadFile,
    RemoveFile,
    Invoke,
}

impl Operation {
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "loadFile" => Ok(Operation::LoadFile),
            "removeFile" => Ok(Operation::RemoveFile),
            "invoke" => Ok(Operation::Invoke),
            other => Err(Error::new(ErrorKind::Argument)
                .with_message(format!("unknown operation `{other}`"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::LoadFile => "loadFile",
            Operation::RemoveFile => "removeFile",
            Operation::Invoke => "invoke",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadFileArgs {
    pub key: i64,
    pub path: String,
}

impl LoadFileArgs {
    pub fn parse(args: &[Value]) -> Result<Self, Error> {
        let op = Operation::LoadFile;
        expect_arity(op, args, 2, 2)?;
        Ok(Self {
            key: expect_key(op, &args[0])?,
            path: expect_string(op, "path", &args[1])?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoveFileArgs {
    pub key: i64,
}

impl RemoveFileArgs {
    pub fn parse(args: &[Value]) -> Result<Self, Error> {
        let op = Operation::RemoveFile;
        expect_arity(op, args, 1, 1)?;
        Ok(Self {
            key: expect_key(op, &args[0])?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InvokeArgs {
    pub key: i64,
    pub function: String,
    pub param: Value,
}

impl InvokeArgs {
    pub fn parse(args: &[Value]) -> Result<Self, Error> {
        let op = Operation::Invoke;
        expect_arity(op, args, 2, 3)?;
        let key = expect_key(op, &args[0])?;
        let function = expect_string(op, "function", &args[1])?;
        if function.is_empty() {
            return Err(argument_error(op, "function name must not be empty"));
        }
        Ok(Self {
            key,
            function,
            param: args.get(2).cloned().unwrap_or(Value::Null),
        })
    }
}

/// Validates `args` for `op` and runs it. `loadFile` and `removeFile`
/// return `null`; `invoke` returns the function's result.
pub fn dispatch(pool: &ScriptPool, op: &str, args: &[Value]) -> Result<Value, Error> {
    match Operation::parse(op)? {
        Operation::LoadFile => {
            let args = LoadFileArgs::parse(args)?;
            pool.load_file(args.key, &args.path)?;
            Ok(Value::Null)
        }
        Operation::RemoveFile => {
            let args = RemoveFileArgs::parse(args)?;
            pool.remove_file(args.key);
            Ok(Value::Null)
        }
        Operation::Invoke => {
            let args = InvokeArgs::parse(args)?;
            pool.invoke(args.key, &args.function, args.param)
        }
    }
}

/// Parses a JSON array of arguments, as sent by foreign callers.
pub fn parse_args(bytes: &[u8]) -> Result<Vec<Value>, Error> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| {
        Error::new(ErrorKind::Argument)
            .with_message("arguments are not valid JSON")
            .with_source(err)
    })?;
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Error::new(ErrorKind::Argument).with_message(format!(
            "arguments must be a JSON array, got {}",
            describe(&other)
        ))),
    }
}

pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expect_arity(op: Operation, args: &[Value], min: usize, max: usize) -> Result<(), Error> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("{min} argument{}", if min == 1 { "" } else { "s" })
    } else {
        format!("{min} to {max} arguments")
    };
    Err(argument_error(
        op,
        &format!("expected {expected}, got {}", args.len()),
    ))
}

fn expect_key(op: Operation, value: &Value) -> Result<i64, Error> {
    match value {
        Value::Number(n) if !n.is_f64() => n
            .as_i64()
            .ok_or_else(|| argument_error(op, "key is out of range")),
        other => Err(argument_error(
            op,
            &format!("key must be an integer, got {}", describe(other)),
        )),
    }
}

fn expect_string(op: Operation, name: &str, value: &Value) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(argument_error(
            op,
            &format!("{name} must be a string, got {}", describe(other)),
        )),
    }
}

fn argument_error(op: Operation, detail: &str) -> Error {
    Error::new(ErrorKind::Argument).with_message(format!("{}: {detail}", op.name()))
}
