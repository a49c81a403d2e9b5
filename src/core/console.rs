//! Purpose: Route script console output to a host-provided log sink.
//! Exports: `LogLevel`, `LogRecord`, `LogSink`, `Console`, `TracingSink`, `MemorySink`, `DeferredSink`, `record_json`.
//! Role: The logging capability bound into every script context.
//! Invariants: Every record names the key and file of the context that emitted it.
//! Invariants: Record JSON schema is additive-only; hosts may parse it.
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, TryLockError};

use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub key: i64,
    pub file: String,
    pub level: LogLevel,
    pub message: String,
    pub time: String,
}

pub fn record_json(record: &LogRecord) -> Value {
    let mut obj = Map::new();
    obj.insert("key".to_string(), json!(record.key));
    obj.insert("file".to_string(), json!(record.file));
    obj.insert("level".to_string(), json!(record.level.as_str()));
    obj.insert("message".to_string(), json!(record.message));
    obj.insert("time".to_string(), json!(record.time));
    Value::Object(obj)
}

/// Host side of the console. Implementations must tolerate calls from any
/// thread that drives the pool. A pool only calls its sink after releasing
/// its slot lock, so `log` may call back into the same pool.
pub trait LogSink: Send + Sync {
    fn log(&self, record: &LogRecord);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: &LogRecord) {
        let key = record.key;
        let file = record.file.as_str();
        let message = record.message.as_str();
        match record.level {
            LogLevel::Error => {
                tracing::error!(target: "scriptpool::console", key, file, "{message}")
            }
            LogLevel::Warn => tracing::warn!(target: "scriptpool::console", key, file, "{message}"),
            LogLevel::Debug => {
                tracing::debug!(target: "scriptpool::console", key, file, "{message}")
            }
            LogLevel::Log | LogLevel::Info => {
                tracing::info!(target: "scriptpool::console", key, file, "{message}")
            }
        }
    }
}

/// Keeps every record in memory, for hosts that drain console output
/// themselves.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn messages(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .map(|record| record.message)
            .collect()
    }

    pub fn take(&self) -> Vec<LogRecord> {
        let mut guard = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    }
}

impl LogSink for MemorySink {
    fn log(&self, record: &LogRecord) {
        let mut guard = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push(record.clone());
    }
}

/// Queues records and hands them to `target` only on `flush`.
///
/// The pool logs through this while its slot lock is held and flushes after
/// unlocking, so a target that calls back into the pool never waits on
/// itself. Records reach the target in the order they were queued.
pub struct DeferredSink {
    target: Arc<dyn LogSink>,
    queue: Mutex<VecDeque<LogRecord>>,
    delivering: Mutex<()>,
}

impl DeferredSink {
    pub fn new(target: Arc<dyn LogSink>) -> Self {
        Self {
            target,
            queue: Mutex::new(VecDeque::new()),
            delivering: Mutex::new(()),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Delivers every queued record. A flush that finds another flush in
    /// progress (including one further up the same thread's stack, when the
    /// target re-enters the pool) returns at once; the active flush drains
    /// whatever was queued meanwhile.
    pub fn flush(&self) {
        loop {
            let delivering = match self.delivering.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(record) = self.pop() {
                self.target.log(&record);
            }
            drop(delivering);
            if self.pending() == 0 {
                return;
            }
        }
    }

    fn pop(&self) -> Option<LogRecord> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

impl LogSink for DeferredSink {
    fn log(&self, record: &LogRecord) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(record.clone());
    }
}

impl fmt::Debug for DeferredSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSink")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// The console bound into one context. Cloning shares the sink, not the
/// identity: every clone still reports the same key and file.
#[derive(Clone)]
pub struct Console {
    key: i64,
    file: Arc<str>,
    sink: Arc<dyn LogSink>,
}

impl Console {
    pub fn new(key: i64, file: &Path, sink: Arc<dyn LogSink>) -> Self {
        Self {
            key,
            file: Arc::from(file.to_string_lossy().as_ref()),
            sink,
        }
    }

    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let record = LogRecord {
            key: self.key,
            file: self.file.to_string(),
            level,
            message: message.into(),
            time: now_rfc3339(),
        };
        self.sink.log(&record);
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("key", &self.key)
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
