/*
Purpose: Provide a Node N-API binding over the libscriptpool C ABI.
Key Exports: loadFile, removeFile, invoke (module-level functions).
Role: Node host surface; one pool per addon instance, released with the environment.
Invariants: Calls into C ABI only; JSON bytes in/out; argument checks stay in the library.
Invariants: Errors carry the library kind label as their message prefix.
Notes: Functions take raw JS arguments so arity and type checks see exactly what the caller passed.
Notes: Arguments are converted by type tag; only invoke's parameter is walked, under depth and size caps.
*/

#[macro_use]
extern crate napi_derive;

use libc::{c_char, c_int, c_void};
use napi::{CallContext, Env, Error, JsObject, JsString, JsUnknown, Result, Status, ValueType};
use serde_json::Value;
use std::ffi::{CStr, CString};
use std::ptr;

const MAX_DEPTH: usize = 64;
const MAX_NODES: usize = 100_000;

#[repr(C)]
struct spool_pool {
    _private: [u8; 0],
}

#[repr(C)]
struct spool_buf {
    data: *mut u8,
    len: usize,
}

#[repr(C)]
struct spool_error {
    kind: i32,
    message: *mut c_char,
    path: *mut c_char,
    key: i64,
    line: u32,
    column: u32,
    has_key: u8,
    has_line: u8,
    has_column: u8,
}

type spool_log_fn = Option<unsafe extern "C" fn(*const u8, usize, *mut c_void)>;

unsafe extern "C" {
    fn spool_init_logging() -> c_int;
    fn spool_pool_new(
        config_json: *const u8,
        config_len: usize,
        log_fn: spool_log_fn,
        user_data: *mut c_void,
        out_pool: *mut *mut spool_pool,
        out_err: *mut *mut spool_error,
    ) -> c_int;
    fn spool_pool_free(pool: *mut spool_pool);
    fn spool_call_json(
        pool: *mut spool_pool,
        op: *const c_char,
        args_json: *const u8,
        args_len: usize,
        out_result: *mut spool_buf,
        out_err: *mut *mut spool_error,
    ) -> c_int;
    fn spool_buf_free(buf: *mut spool_buf);
    fn spool_error_free(err: *mut spool_error);
}

struct PoolHandle {
    ptr: *mut spool_pool,
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { spool_pool_free(self.ptr) };
            self.ptr = ptr::null_mut();
        }
    }
}

#[module_exports]
fn init(mut exports: JsObject, mut env: Env) -> Result<()> {
    // Script console output goes through tracing; this addon is the host
    // that opts in to a stderr subscriber.
    unsafe { spool_init_logging() };
    let mut out = ptr::null_mut();
    let mut err = ptr::null_mut();
    // Null config: the library reads SCRIPTPOOL_* from the environment.
    let rc = unsafe { spool_pool_new(ptr::null(), 0, None, ptr::null_mut(), &mut out, &mut err) };
    if rc != 0 {
        return Err(take_error(err));
    }
    env.set_instance_data(PoolHandle { ptr: out }, 0, |ctx| drop(ctx.value))?;

    exports.create_named_method("loadFile", load_file)?;
    exports.create_named_method("removeFile", remove_file)?;
    exports.create_named_method("invoke", invoke)?;
    Ok(())
}

#[js_function(4)]
fn load_file(ctx: CallContext) -> Result<JsUnknown> {
    call(&ctx, "loadFile")
}

#[js_function(4)]
fn remove_file(ctx: CallContext) -> Result<JsUnknown> {
    call(&ctx, "removeFile")
}

#[js_function(4)]
fn invoke(ctx: CallContext) -> Result<JsUnknown> {
    call(&ctx, "invoke")
}

fn call(ctx: &CallContext, op: &str) -> Result<JsUnknown> {
    let env = ctx.env;
    let pool = env
        .get_instance_data::<PoolHandle>()?
        .ok_or_else(|| Error::new(Status::GenericFailure, "scriptpool: pool is not initialized"))?;

    // Arguments past the declared arity are not readable, but still count.
    let readable = ctx.length.min(4);
    let mut args = Vec::with_capacity(ctx.length);
    for index in 0..readable {
        let arg = ctx.get::<JsUnknown>(index)?;
        args.push(argument_value(op, index, arg)?);
    }
    args.resize(ctx.length, Value::Null);

    let args_json = serde_json::to_vec(&args)
        .map_err(|err| Error::new(Status::InvalidArg, format!("ArgumentError: {err}")))?;
    let op = CString::new(op).map_err(|_| Error::new(Status::InvalidArg, "op contains NUL"))?;

    let mut out = spool_buf {
        data: ptr::null_mut(),
        len: 0,
    };
    let mut err = ptr::null_mut();
    let rc = unsafe {
        spool_call_json(
            pool.ptr,
            op.as_ptr(),
            args_json.as_ptr(),
            args_json.len(),
            &mut out,
            &mut err,
        )
    };
    if rc != 0 {
        return Err(take_error(err));
    }
    let result = copy_and_free_buf(out);
    let value: Value = if result.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&result)
            .map_err(|err| Error::new(Status::GenericFailure, format!("InternalError: {err}")))?
    };
    if value.is_null() {
        return env.get_undefined().map(|undefined| undefined.into_unknown());
    }
    env.to_js_value(&value)
}

/// Converts one positional argument. Only `invoke`'s parameter is walked;
/// every other position must be a scalar, so a composite there is passed on
/// as an empty value of the same tag and rejected by the library's checks.
fn argument_value(op: &str, index: usize, value: JsUnknown) -> Result<Value> {
    if op == "invoke" && index == 2 {
        let mut budget = MAX_NODES;
        return tagged_value(op, index, value, 0, &mut budget);
    }
    match value.get_type()? {
        ValueType::Object if value.is_array()? => Ok(Value::Array(Vec::new())),
        ValueType::Object => Ok(Value::Object(serde_json::Map::new())),
        kind => scalar_value(op, index, value, kind),
    }
}

/// Walks a composite value by type tag. Nesting is capped at `MAX_DEPTH` and
/// the total number of visited values at `MAX_NODES`, so self-referencing
/// input is rejected instead of recursing without bound.
fn tagged_value(
    op: &str,
    index: usize,
    value: JsUnknown,
    depth: usize,
    budget: &mut usize,
) -> Result<Value> {
    if *budget == 0 {
        return Err(argument_error(
            op,
            format!("argument {index} holds more than {MAX_NODES} values"),
        ));
    }
    *budget -= 1;

    let kind = value.get_type()?;
    if kind != ValueType::Object {
        return scalar_value(op, index, value, kind);
    }
    if depth >= MAX_DEPTH {
        return Err(argument_error(
            op,
            format!("argument {index} nests deeper than {MAX_DEPTH} levels"),
        ));
    }
    let object = unsafe { value.cast::<JsObject>() };
    if object.is_array()? {
        let len = object.get_array_length()?;
        let mut items = Vec::new();
        for position in 0..len {
            let item = object.get_element::<JsUnknown>(position)?;
            items.push(tagged_value(op, index, item, depth + 1, budget)?);
        }
        return Ok(Value::Array(items));
    }
    let names = object.get_property_names()?;
    let len = names.get_array_length()?;
    let mut map = serde_json::Map::new();
    for position in 0..len {
        let name = names
            .get_element::<JsString>(position)?
            .into_utf8()?
            .into_owned()?;
        let item = object.get_named_property::<JsUnknown>(&name)?;
        map.insert(name, tagged_value(op, index, item, depth + 1, budget)?);
    }
    Ok(Value::Object(map))
}

fn scalar_value(op: &str, index: usize, value: JsUnknown, kind: ValueType) -> Result<Value> {
    match kind {
        ValueType::Undefined | ValueType::Null => Ok(Value::Null),
        ValueType::Boolean => Ok(Value::Bool(value.coerce_to_bool()?.get_value()?)),
        ValueType::Number => Ok(number_value(value.coerce_to_number()?.get_double()?)),
        ValueType::String => Ok(Value::String(
            value.coerce_to_string()?.into_utf8()?.into_owned()?,
        )),
        other => Err(argument_error(
            op,
            format!("argument {index} has unsupported type {other:?}"),
        )),
    }
}

fn number_value(number: f64) -> Value {
    if number.is_finite()
        && number.fract() == 0.0
        && number >= i64::MIN as f64
        && number < i64::MAX as f64
    {
        Value::from(number as i64)
    } else {
        serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn argument_error(op: &str, message: String) -> Error {
    Error::new(Status::InvalidArg, format!("ArgumentError: {op}: {message}"))
}

fn copy_and_free_buf(mut buf: spool_buf) -> Vec<u8> {
    let data = if buf.data.is_null() || buf.len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(buf.data, buf.len) }.to_vec()
    };
    unsafe { spool_buf_free(&mut buf) };
    data
}

fn take_error(err: *mut spool_error) -> Error {
    if err.is_null() {
        return Error::new(Status::GenericFailure, "InternalError: unknown scriptpool error");
    }
    let owned = unsafe { &*err };
    let kind = owned.kind;
    let mut message = unsafe { cstring_to_string(owned.message) };
    if message.is_empty() {
        message = error_kind_label(kind).to_string();
    }
    unsafe { spool_error_free(err) };
    let status = match kind {
        2 => Status::InvalidArg,
        _ => Status::GenericFailure,
    };
    Error::new(status, message)
}

fn error_kind_label(kind: i32) -> &'static str {
    match kind {
        2 => "ArgumentError",
        3 => "LoadError",
        4 => "NotFoundError",
        5 => "ExecutionError",
        _ => "InternalError",
    }
}

unsafe fn cstring_to_string(ptr: *mut c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string()
}
