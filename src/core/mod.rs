// Core modules implementing contexts, engines, the pool, and error modeling.
pub mod console;
pub mod context;
pub mod engine;
pub mod error;
pub mod pool;
pub mod rhai_engine;
pub mod source;
