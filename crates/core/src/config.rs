use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `INTERLOCK_PROFILE`. When set (e.g. `SOAK`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("INTERLOCK_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            locks: LockConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
        }
    }

    /// Parse a TOML document with optional `[locks]` and `[scheduler]` tables.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.locks.cancel_poll_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "locks.cancel_poll_ms".into(),
                value: "0".into(),
            });
        }
        if self.scheduler.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "scheduler.thread_name_prefix".into(),
                value: String::new(),
            });
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  locks:       cancel_poll_ms={}, resolution_history={}",
            self.locks.cancel_poll_ms,
            self.locks.resolution_history
        );
        tracing::info!(
            "  scheduler:   worker_threads={} (resolved {}), prefix={}",
            self.scheduler.worker_threads,
            self.scheduler.resolved_worker_threads(),
            self.scheduler.thread_name_prefix
        );
    }

    /// JSON view for diagnostics output.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "locks": {
                "cancel_poll_ms": self.locks.cancel_poll_ms,
                "resolution_history": self.locks.resolution_history,
            },
            "scheduler": {
                "worker_threads": self.scheduler.resolved_worker_threads(),
                "thread_name_prefix": self.scheduler.thread_name_prefix,
            },
        })
    }
}

// ── Locks ─────────────────────────────────────────────────────

/// Lock manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How often a cancellable wait re-checks its token, in milliseconds.
    #[serde(default = "default_cancel_poll_ms")]
    pub cancel_poll_ms: u64,
    /// Number of recent deadlock resolutions kept in the metrics ring.
    #[serde(default = "default_resolution_history")]
    pub resolution_history: usize,
}

fn default_cancel_poll_ms() -> u64 { 50 }
fn default_resolution_history() -> usize { 64 }

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            cancel_poll_ms: default_cancel_poll_ms(),
            resolution_history: default_resolution_history(),
        }
    }
}

impl LockConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            cancel_poll_ms: profiled_env_u64(p, "LOCK_CANCEL_POLL_MS", default_cancel_poll_ms())
                .max(1),
            resolution_history: profiled_env_usize(
                p,
                "LOCK_RESOLUTION_HISTORY",
                default_resolution_history(),
            ),
        }
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Name prefix for worker threads.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_worker_threads() -> usize { 0 }
fn default_thread_name_prefix() -> String { "interlock-worker".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_threads: profiled_env_usize(p, "SCHEDULER_WORKER_THREADS", default_worker_threads()),
            thread_name_prefix: profiled_env_or(
                p,
                "SCHEDULER_THREAD_PREFIX",
                &default_thread_name_prefix(),
            ),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}
