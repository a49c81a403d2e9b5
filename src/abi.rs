//! Purpose: C ABI bridge for bindings (libscriptpool).
//! Exports: C-callable pool lifecycle, load/remove/call functions, logging opt-in, buffer/error helpers.
//! Role: Stable ABI surface for non-Rust hosts; the Node addon links against it.
//! Invariants: Opaque pool handles; explicit free functions; JSON bytes for dynamic data.
//! Invariants: No entry point unwinds into the host; panics surface as `Internal` errors.
//! Invariants: Error kinds map 1:1 with core error kinds (`to_status_code`).
#![allow(non_camel_case_types)]

use std::ffi::{CStr, CString, c_void};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use crate::api::boundary;
use crate::config::PoolConfig;
use crate::core::console::{LogRecord, LogSink, TracingSink, record_json};
use crate::core::error::{Error, ErrorKind, to_status_code};
use crate::core::pool::ScriptPool;
use crate::logging::init_tracing;

pub struct spool_pool {
    pool: ScriptPool,
}

#[repr(C)]
pub struct spool_buf {
    pub data: *mut u8,
    pub len: usize,
}

#[repr(C)]
pub struct spool_error {
    pub kind: i32,
    pub message: *mut c_char,
    pub path: *mut c_char,
    pub key: i64,
    pub line: u32,
    pub column: u32,
    pub has_key: u8,
    pub has_line: u8,
    pub has_column: u8,
}

/// Receives one console record as UTF-8 JSON. The bytes are only valid for
/// the duration of the call. May be invoked from any thread that drives the pool.
/// Records are delivered after the pool's lock is released, so the callback
/// may call any `spool_*` function on the same pool.
pub type spool_log_fn =
    Option<unsafe extern "C" fn(record_json: *const u8, len: usize, user_data: *mut c_void)>;

#[unsafe(no_mangle)]
pub extern "C" fn spool_pool_new(
    config_json: *const u8,
    config_len: usize,
    log_fn: spool_log_fn,
    user_data: *mut c_void,
    out_pool: *mut *mut spool_pool,
    out_err: *mut *mut spool_error,
) -> i32 {
    guard(out_err, || {
        if out_pool.is_null() {
            return Err(Error::new(ErrorKind::Argument).with_message("out_pool is null"));
        }
        let config = if config_json.is_null() || config_len == 0 {
            PoolConfig::from_env()?
        } else {
            let bytes = unsafe { std::slice::from_raw_parts(config_json, config_len) };
            PoolConfig::from_json_slice(bytes)?
        };
        let sink: Arc<dyn LogSink> = match log_fn {
            Some(callback) => Arc::new(CallbackSink {
                callback,
                user_data: UserData(user_data),
            }),
            None => Arc::new(TracingSink),
        };
        let handle = Box::new(spool_pool {
            pool: ScriptPool::with_sink(config, sink),
        });
        unsafe {
            *out_pool = Box::into_raw(handle);
        }
        Ok(())
    })
}

/// Installs a stderr `tracing` subscriber filtered by `SCRIPTPOOL_LOG`.
/// Returns 1 when installed, 0 when the process already has a subscriber.
/// Hosts that route logs themselves skip this.
#[unsafe(no_mangle)]
pub extern "C" fn spool_init_logging() -> i32 {
    panic::catch_unwind(init_tracing)
        .map(i32::from)
        .unwrap_or(0)
}

/// Releases every context still loaded, then the pool itself.
#[unsafe(no_mangle)]
pub extern "C" fn spool_pool_free(pool: *mut spool_pool) {
    if pool.is_null() {
        return;
    }
    let _ = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        drop(Box::from_raw(pool));
    }));
}

#[unsafe(no_mangle)]
pub extern "C" fn spool_load_file(
    pool: *mut spool_pool,
    key: i64,
    path: *const c_char,
    out_err: *mut *mut spool_error,
) -> i32 {
    guard(out_err, || {
        let pool = borrow_pool(pool)?;
        let path = parse_c_str(path, "path")?;
        pool.pool.load_file(key, path)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn spool_remove_file(
    pool: *mut spool_pool,
    key: i64,
    out_err: *mut *mut spool_error,
) -> i32 {
    guard(out_err, || {
        let pool = borrow_pool(pool)?;
        pool.pool.remove_file(key);
        Ok(())
    })
}

/// Runs `op` with a JSON array of arguments. On success `out_result` (if not
/// null) receives the JSON result, which the caller frees with `spool_buf_free`.
#[unsafe(no_mangle)]
pub extern "C" fn spool_call_json(
    pool: *mut spool_pool,
    op: *const c_char,
    args_json: *const u8,
    args_len: usize,
    out_result: *mut spool_buf,
    out_err: *mut *mut spool_error,
) -> i32 {
    guard(out_err, || {
        let pool = borrow_pool(pool)?;
        let op = parse_c_str(op, "op")?;
        if args_json.is_null() {
            return Err(Error::new(ErrorKind::Argument).with_message("args_json is null"));
        }
        let bytes = unsafe { std::slice::from_raw_parts(args_json, args_len) };
        let args = boundary::parse_args(bytes)?;
        let result = boundary::dispatch(&pool.pool, op, &args)?;
        write_json_buf(out_result, &result)
    })
}

/// Number of loaded contexts, or -1 for a null pool.
#[unsafe(no_mangle)]
pub extern "C" fn spool_pool_len(pool: *mut spool_pool) -> i64 {
    match borrow_pool(pool) {
        Ok(pool) => pool.pool.len() as i64,
        Err(_) => -1,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn spool_buf_free(buf: *mut spool_buf) {
    if buf.is_null() {
        return;
    }
    unsafe {
        let buf = &mut *buf;
        if !buf.data.is_null() && buf.len != 0 {
            drop(Vec::from_raw_parts(buf.data, buf.len, buf.len));
        }
        buf.data = ptr::null_mut();
        buf.len = 0;
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn spool_error_free(err: *mut spool_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        if !err.message.is_null() {
            drop(CString::from_raw(err.message));
        }
        if !err.path.is_null() {
            drop(CString::from_raw(err.path));
        }
    }
}

#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// The host promises its callback and user data are usable from any thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

struct CallbackSink {
    callback: unsafe extern "C" fn(*const u8, usize, *mut c_void),
    user_data: UserData,
}

impl LogSink for CallbackSink {
    fn log(&self, record: &LogRecord) {
        let Ok(bytes) = serde_json::to_vec(&record_json(record)) else {
            return;
        };
        unsafe { (self.callback)(bytes.as_ptr(), bytes.len(), self.user_data.0) };
    }
}

fn guard(out_err: *mut *mut spool_error, op: impl FnOnce() -> Result<(), Error>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => fail(out_err, err),
        Err(_) => fail(
            out_err,
            Error::new(ErrorKind::Internal).with_message("panic inside scriptpool"),
        ),
    }
}

fn borrow_pool<'a>(pool: *mut spool_pool) -> Result<&'a spool_pool, Error> {
    if pool.is_null() {
        return Err(Error::new(ErrorKind::Argument).with_message("pool is null"));
    }
    unsafe { Ok(&*pool) }
}

fn parse_c_str<'a>(input: *const c_char, name: &str) -> Result<&'a str, Error> {
    if input.is_null() {
        return Err(Error::new(ErrorKind::Argument).with_message(format!("{name} is null")));
    }
    unsafe { CStr::from_ptr(input) }
        .to_str()
        .map_err(|_| Error::new(ErrorKind::Argument).with_message(format!("{name} is not valid UTF-8")))
}

fn write_json_buf(out: *mut spool_buf, value: &serde_json::Value) -> Result<(), Error> {
    if out.is_null() {
        return Ok(());
    }
    let json_bytes = serde_json::to_vec(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to serialize result")
            .with_source(err)
    })?;
    unsafe {
        let buf = &mut *out;
        let mut data = json_bytes.into_boxed_slice();
        buf.len = data.len();
        buf.data = data.as_mut_ptr();
        std::mem::forget(data);
    }
    Ok(())
}

fn fail(out_err: *mut *mut spool_error, err: Error) -> i32 {
    if out_err.is_null() {
        return -1;
    }
    let error = Box::new(spool_error {
        kind: to_status_code(err.kind()),
        message: to_c_string(&err.to_string()),
        path: err
            .path()
            .map(|path| to_c_string(path.to_string_lossy().as_ref()))
            .unwrap_or(ptr::null_mut()),
        key: err.key().unwrap_or(0),
        line: err.line().unwrap_or(0),
        column: err.column().unwrap_or(0),
        has_key: u8::from(err.key().is_some()),
        has_line: u8::from(err.line().is_some()),
        has_column: u8::from(err.column().is_some()),
    });
    unsafe {
        *out_err = Box::into_raw(error);
    }
    -1
}

fn to_c_string(input: &str) -> *mut c_char {
    let cleaned: String = input.chars().filter(|c| *c != '\0').collect();
    CString::new(cleaned)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}
