//! Purpose: Host-embeddable pool of isolated script contexts keyed by integers.
//! Exports: `api` (pool, contexts, boundary), `abi` (C ABI), `config`, `logging`.
//! Role: Library backing the C ABI and the Node addon; embeddable directly from Rust.
//! Invariants: `api` is the stable Rust surface; `core` internals may change.
//! Invariants: Pool state lives in an owned `ScriptPool`, never in a global.
pub mod abi;
pub mod api;
pub mod config;
pub mod core;
pub mod logging;
