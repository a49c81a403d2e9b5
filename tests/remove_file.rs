//! Purpose: Boundary-level coverage for `loadFile` / `removeFile` argument strictness.
//! Exports: Integration tests only.
//! Role: Exercise `boundary::dispatch` the way a dynamically typed host calls it.
//! Invariants: Rejected calls never change which keys are loaded.
use std::sync::Arc;

use scriptpool::api::{ErrorKind, MemorySink, PoolConfig, ScriptPool, dispatch};
use serde_json::{Value, json};

fn hello_world() -> String {
    format!(
        "{}/tests/resources/helloWorld.rhai",
        env!("CARGO_MANIFEST_DIR")
    )
}

fn pool() -> ScriptPool {
    ScriptPool::with_sink(PoolConfig::default(), Arc::new(MemorySink::new()))
}

fn call(pool: &ScriptPool, op: &str, args: Value) -> Result<Value, scriptpool::api::Error> {
    let args = args.as_array().cloned().expect("args array");
    dispatch(pool, op, &args)
}

#[test]
fn remove_of_loaded_key_succeeds() {
    let pool = pool();
    call(&pool, "loadFile", json!([1, hello_world()])).expect("load");
    assert_eq!(call(&pool, "removeFile", json!([1])).expect("remove"), Value::Null);
    assert!(pool.is_empty());
}

#[test]
fn remove_of_already_removed_key_succeeds() {
    let pool = pool();
    call(&pool, "loadFile", json!([1, hello_world()])).expect("load");
    call(&pool, "removeFile", json!([1])).expect("first remove");
    call(&pool, "removeFile", json!([1])).expect("second remove");
    call(&pool, "removeFile", json!([99])).expect("never loaded");
}

#[test]
fn remove_rejects_invalid_arguments() {
    let pool = pool();
    call(&pool, "loadFile", json!([1, hello_world()])).expect("load");

    let rejected = [
        json!([]),
        json!([1, "extraParameter"]),
        json!([["invalid type"]]),
        json!([[1]]),
        json!(["1"]),
        json!([1.5]),
        json!([null]),
    ];
    for args in rejected {
        let err = call(&pool, "removeFile", args.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument, "args {args}");
        assert!(pool.contains(1), "args {args} must not unload key 1");
    }

    call(&pool, "removeFile", json!([1])).expect("remove");
    assert!(pool.is_empty());
}

#[test]
fn load_rejects_invalid_arguments_without_mutation() {
    let pool = pool();
    let path = hello_world();
    let rejected = [
        json!([]),
        json!([1]),
        json!([1, path, "extra"]),
        json!(["1", path]),
        json!([1.0, path]),
        json!([[1], path]),
        json!([1, 1]),
        json!([1, [path]]),
        json!([1, {"path": path}]),
    ];
    for args in &rejected {
        let err = call(&pool, "loadFile", args.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument, "args {args}");
    }
    assert!(pool.is_empty());

    call(&pool, "loadFile", json!([2, path])).expect("load");
    for args in &rejected {
        assert!(call(&pool, "loadFile", args.clone()).is_err());
    }
    assert_eq!(pool.keys(), vec![2]);
}

#[test]
fn load_of_unreadable_file_is_load_error() {
    let pool = pool();
    let err = call(&pool, "loadFile", json!([1, "/definitely/not/here.rhai"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(pool.is_empty());
}

#[test]
fn invoke_goes_through_the_same_boundary() {
    let pool = pool();
    let counter = format!("{}/tests/resources/counter.rhai", env!("CARGO_MANIFEST_DIR"));
    call(&pool, "loadFile", json!([5, counter])).expect("load");
    assert_eq!(
        call(&pool, "invoke", json!([5, "increment", 2])).expect("invoke"),
        json!(2)
    );
    assert_eq!(
        call(&pool, "invoke", json!(["5", "increment", 2])).unwrap_err().kind(),
        ErrorKind::Argument
    );
    assert_eq!(
        call(&pool, "invoke", json!([6, "increment", 2])).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        call(&pool, "queueWork", json!([5])).unwrap_err().kind(),
        ErrorKind::Argument
    );
}
