//! Purpose: Pool configuration shared by the Rust API, the C ABI, and bindings.
//! Exports: `PoolConfig`, `EngineLimits`.
//! Role: One typed config; JSON for foreign callers, env vars for zero-config hosts.
//! Invariants: Every field has a default; unknown JSON fields are rejected.
//! Invariants: A zero limit means "unlimited".
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::error::{Error, ErrorKind};

pub const ENV_BASE_DIR: &str = "SCRIPTPOOL_BASE_DIR";
pub const ENV_MAX_OPERATIONS: &str = "SCRIPTPOOL_MAX_OPERATIONS";
pub const ENV_MAX_CALL_LEVELS: &str = "SCRIPTPOOL_MAX_CALL_LEVELS";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub base_dir: Option<PathBuf>,
    pub limits: EngineLimits,
    pub allow_imports: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            limits: EngineLimits::default(),
            allow_imports: true,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_imports(mut self, allow: bool) -> Self {
        self.allow_imports = allow;
        self
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_BASE_DIR).filter(|dir| !dir.is_empty()) {
            config.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_MAX_OPERATIONS) {
            config.limits.max_operations = parse_number(ENV_MAX_OPERATIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CALL_LEVELS) {
            config.limits.max_call_levels = parse_number(ENV_MAX_CALL_LEVELS, &raw)?;
        }
        Ok(config)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|err| {
            Error::new(ErrorKind::Argument)
                .with_message(format!("invalid pool config: {err}"))
                .with_source(err)
        })
    }

    /// Base directory for `./`-relative script paths.
    pub fn resolved_base_dir(&self) -> Option<PathBuf> {
        self.base_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, Error> {
    raw.trim().parse::<T>().map_err(|_| {
        Error::new(ErrorKind::Argument).with_message(format!("{name} must be a non-negative integer"))
    })
}
