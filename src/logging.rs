//! Purpose: Install the process-wide tracing subscriber for embedding hosts.
//! Exports: `init_tracing`, `LOG_ENV`.
//! Role: Opt-in only; the library never installs a subscriber on its own.
//! Invariants: Never replaces a subscriber the host already installed.
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SCRIPTPOOL_LOG";

/// Returns whether this call installed the subscriber.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}
