// Pool manager: key-to-context bookkeeping with atomic replace and idempotent removal.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::config::PoolConfig;
use crate::core::console::{DeferredSink, LogSink, TracingSink};
use crate::core::context::{ContextBuilder, ContextHandle, ModuleInfo};
use crate::core::engine::ScriptEngine;
use crate::core::error::{Error, ErrorKind};
use crate::core::rhai_engine::RhaiEngine;

/// Owns every loaded context. Dropping the pool releases all of them.
///
/// All operations take one lock over the whole slot map, so a load that is
/// still running its script blocks every other caller until it finishes.
/// Console output produced under the lock is queued and handed to the sink
/// once the lock is released.
pub struct ScriptPool {
    builder: ContextBuilder,
    console: Arc<DeferredSink>,
    slots: Mutex<HashMap<i64, ContextHandle>>,
}

impl ScriptPool {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: PoolConfig, sink: Arc<dyn LogSink>) -> Self {
        let engine = Arc::new(RhaiEngine::from_config(&config));
        Self::with_engine(config, engine, sink)
    }

    pub fn with_engine(
        config: PoolConfig,
        engine: Arc<dyn ScriptEngine>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let console = Arc::new(DeferredSink::new(sink));
        let builder = ContextBuilder::new(engine, Arc::clone(&console) as Arc<dyn LogSink>)
            .with_base_dir(config.resolved_base_dir());
        Self {
            builder,
            console,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a fresh context for `path` and installs it under `key`.
    ///
    /// The new context is fully built before the slot changes, so a failed
    /// load leaves whatever was there before (or nothing) in place.
    pub fn load_file(&self, key: i64, path: &str) -> Result<(), Error> {
        let result = self.install(key, path);
        self.console.flush();
        result
    }

    fn install(&self, key: i64, path: &str) -> Result<(), Error> {
        let mut slots = self.lock();
        let handle = match self.builder.build(key, path) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(
                    key,
                    path,
                    engine = self.builder.engine_name(),
                    error = %err,
                    "load failed; slot unchanged"
                );
                return Err(err);
            }
        };
        let file = handle.file().display().to_string();
        let previous = slots.insert(key, handle);
        drop(slots);

        match previous {
            Some(previous) => {
                tracing::debug!(key, file = %file, "context replaced");
                release(previous, "replaced");
            }
            None => tracing::debug!(key, file = %file, "context loaded"),
        }
        Ok(())
    }

    /// Returns whether a context was present. Missing keys are not an error.
    pub fn remove_file(&self, key: i64) -> bool {
        let removed = self.lock().remove(&key);
        match removed {
            Some(handle) => {
                release(handle, "removed");
                self.console.flush();
                true
            }
            None => {
                tracing::trace!(key, "remove of empty slot");
                false
            }
        }
    }

    pub fn invoke(&self, key: i64, function: &str, param: Value) -> Result<Value, Error> {
        let result = self.call(key, function, param);
        self.console.flush();
        result
    }

    fn call(&self, key: i64, function: &str, param: Value) -> Result<Value, Error> {
        let mut slots = self.lock();
        let handle = slots.get_mut(&key).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("no context loaded for key")
                .with_key(key)
        })?;
        handle.call(function, param).inspect_err(|err| {
            tracing::debug!(key, function, error = %err, "invoke failed");
        })
    }

    pub fn contains(&self, key: i64) -> bool {
        self.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = self.lock().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn module_info(&self, key: i64) -> Option<ModuleInfo> {
        self.lock().get(&key).map(ContextHandle::info)
    }

    /// Releases every context. Returns how many were loaded.
    pub fn clear(&self) -> usize {
        let drained: Vec<ContextHandle> = self.lock().drain().map(|(_, handle)| handle).collect();
        let count = drained.len();
        for handle in drained {
            release(handle, "cleared");
        }
        self.console.flush();
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, ContextHandle>> {
        // Slots are only ever swapped whole, so a poisoned map is still consistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ScriptPool {
    fn drop(&mut self) {
        let count = self.clear();
        if count > 0 {
            tracing::debug!(count, "pool dropped with live contexts");
        }
    }
}

impl std::fmt::Debug for ScriptPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptPool")
            .field("engine", &self.builder.engine_name())
            .field("keys", &self.keys())
            .finish()
    }
}

fn release(handle: ContextHandle, reason: &'static str) {
    let key = handle.key();
    match handle.release() {
        Ok(()) => tracing::debug!(key, reason, "context released"),
        Err(err) => tracing::error!(key, reason, error = %err, "context release failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptPool;
    use crate::config::PoolConfig;
    use crate::core::console::{LogLevel, LogRecord, LogSink, MemorySink};
    use crate::core::context::ModuleContext;
    use crate::core::engine::{EngineError, EnginePhase, ScriptEngine, ScriptInstance};
    use crate::core::error::ErrorKind;
    use crate::core::source::SourceFile;
    use serde_json::{Value, json};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex, OnceLock, Weak};
    use std::time::Duration;

    /// Treats the source text as a command: `fail` fails the run, `sticky`
    /// fails on release, anything else is logged and kept as the state.
    #[derive(Default)]
    struct FakeEngine {
        live: Arc<AtomicUsize>,
    }

    struct FakeInstance {
        text: String,
        counter: i64,
        live: Arc<AtomicUsize>,
    }

    impl ScriptEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn instantiate(
            &self,
            module: &ModuleContext,
            source: &SourceFile,
        ) -> Result<Box<dyn ScriptInstance>, EngineError> {
            let text = source.text.trim().to_string();
            if text == "fail" {
                return Err(EngineError::new(EnginePhase::Run, "script threw").at(Some(1), None));
            }
            module.console.emit(LogLevel::Log, text.clone());
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeInstance {
                text,
                counter: 0,
                live: Arc::clone(&self.live),
            }))
        }
    }

    impl ScriptInstance for FakeInstance {
        fn call(&mut self, function: &str, _param: Value) -> Result<Value, EngineError> {
            match function {
                "bump" => {
                    self.counter += 1;
                    Ok(json!(self.counter))
                }
                "text" => Ok(json!(self.text)),
                other => Err(EngineError::new(EnginePhase::Call, format!("no function {other}"))),
            }
        }

        fn release(self: Box<Self>) -> Result<(), EngineError> {
            self.live.fetch_sub(1, Ordering::SeqCst);
            if self.text == "sticky" {
                return Err(EngineError::new(EnginePhase::Release, "refused to unload"));
            }
            Ok(())
        }
    }

    fn pool_with(dir: &Path) -> (ScriptPool, Arc<AtomicUsize>, MemorySink) {
        let engine = FakeEngine::default();
        let live = Arc::clone(&engine.live);
        let sink = MemorySink::new();
        let pool = ScriptPool::with_engine(
            PoolConfig::default().with_base_dir(dir),
            Arc::new(engine),
            Arc::new(sink.clone()),
        );
        (pool, live, sink)
    }

    fn script(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).expect("write script");
        path
    }

    #[test]
    fn remove_of_missing_key_is_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, _, _) = pool_with(temp.path());
        for _ in 0..3 {
            assert!(!pool.remove_file(42));
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn reload_replaces_and_releases_previous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, live, _) = pool_with(temp.path());
        let first = script(temp.path(), "first.txt", "first");
        let second = script(temp.path(), "second.txt", "second");

        pool.load_file(1, first.to_str().unwrap()).expect("first load");
        pool.load_file(1, second.to_str().unwrap()).expect("second load");

        assert_eq!(pool.len(), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(pool.invoke(1, "text", Value::Null).expect("text"), json!("second"));
        let info = pool.module_info(1).expect("info");
        assert_eq!(info.file, fs::canonicalize(&second).unwrap());
    }

    #[test]
    fn failed_reload_keeps_previous_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, live, _) = pool_with(temp.path());
        let good = script(temp.path(), "good.txt", "good");
        let bad = script(temp.path(), "bad.txt", "fail");

        pool.load_file(3, good.to_str().unwrap()).expect("good load");
        pool.invoke(3, "bump", Value::Null).expect("bump");

        let err = pool.load_file(3, bad.to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(err.line(), Some(1));

        let err = pool
            .load_file(3, temp.path().join("missing.txt").to_str().unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);

        assert_eq!(pool.invoke(3, "bump", Value::Null).expect("bump"), json!(2));
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_first_load_creates_no_slot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, live, _) = pool_with(temp.path());
        let bad = script(temp.path(), "bad.txt", "fail");
        assert!(pool.load_file(9, bad.to_str().unwrap()).is_err());
        assert!(!pool.contains(9));
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn release_failure_still_clears_slot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, live, _) = pool_with(temp.path());
        let sticky = script(temp.path(), "sticky.txt", "sticky");
        pool.load_file(5, sticky.to_str().unwrap()).expect("load");
        assert!(pool.remove_file(5));
        assert!(!pool.contains(5));
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn relative_paths_use_base_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, _, sink) = pool_with(temp.path());
        script(temp.path(), "rel.txt", "relative");
        pool.load_file(2, "./rel.txt").expect("load");
        assert_eq!(sink.messages(), vec!["relative".to_string()]);
    }

    #[test]
    fn invoke_on_missing_key_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, _, _) = pool_with(temp.path());
        let err = pool.invoke(11, "bump", Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.key(), Some(11));
    }

    #[test]
    fn invoke_failure_keeps_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, _, _) = pool_with(temp.path());
        let path = script(temp.path(), "a.txt", "a");
        pool.load_file(1, path.to_str().unwrap()).expect("load");
        let err = pool.invoke(1, "nope", Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(pool.contains(1));
    }

    #[test]
    fn drop_releases_everything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, live, _) = pool_with(temp.path());
        let path = script(temp.path(), "a.txt", "a");
        for key in 0..4 {
            pool.load_file(key, path.to_str().unwrap()).expect("load");
        }
        assert_eq!(pool.keys(), vec![0, 1, 2, 3]);
        assert_eq!(live.load(Ordering::SeqCst), 4);
        drop(pool);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_load_and_remove_keep_one_context_per_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pool, live, _) = pool_with(temp.path());
        let path = script(temp.path(), "a.txt", "a");
        let path = path.to_str().unwrap();

        std::thread::scope(|scope| {
            for worker in 0..8i64 {
                let pool = &pool;
                scope.spawn(move || {
                    for round in 0..50i64 {
                        let key = (worker + round) % 4;
                        pool.load_file(key, path).expect("load");
                        if round % 3 == 0 {
                            pool.remove_file(key);
                        }
                    }
                });
            }
        });

        assert_eq!(live.load(Ordering::SeqCst), pool.len());
        assert!(pool.len() <= 4);
    }

    /// Calls back into the pool it logs for, the way a host console
    /// callback that inspects or unloads slots would.
    #[derive(Default)]
    struct ReentrantSink {
        pool: OnceLock<Weak<ScriptPool>>,
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl LogSink for ReentrantSink {
        fn log(&self, record: &LogRecord) {
            let Some(pool) = self.pool.get().and_then(Weak::upgrade) else {
                return;
            };
            pool.remove_file(99);
            let len = pool.len();
            self.seen.lock().unwrap().push((record.message.clone(), len));
        }
    }

    #[test]
    fn sink_may_reenter_the_pool() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(temp.path(), "a.txt", "hello");
        let path = path.to_str().unwrap().to_string();
        let sink = Arc::new(ReentrantSink::default());
        let pool = Arc::new(ScriptPool::with_engine(
            PoolConfig::default(),
            Arc::new(FakeEngine::default()),
            sink.clone(),
        ));
        sink.pool.set(Arc::downgrade(&pool)).unwrap();

        let (done, finished) = mpsc::channel();
        let worker = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let loaded = pool.load_file(1, &path).map_err(|err| err.to_string());
                let bumped = pool.invoke(1, "bump", Value::Null).map_err(|err| err.to_string());
                done.send((loaded, bumped)).unwrap();
            })
        };

        let (loaded, bumped) = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("pool call blocked on its own console sink");
        worker.join().unwrap();
        loaded.expect("load");
        assert_eq!(bumped.expect("bump"), json!(1));
        assert_eq!(*sink.seen.lock().unwrap(), vec![("hello".to_string(), 1)]);
    }
}
