use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

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

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub session: SessionConfig,
    pub import: ImportConfig,
    pub sql: SqlConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TABULA_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TABULA_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            session: SessionConfig::from_env_profiled(p),
            import: ImportConfig::from_env_profiled(p),
            sql: SqlConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  session:  join_timeout={:?}, preview_rows={}",
            self.session.join_timeout(),
            self.session.preview_rows
        );
        tracing::info!(
            "  import:   logs_dir={}, sink={}, cancel_on_error={}",
            self.import.logs_dir.display(),
            self.import.sink_path.display(),
            self.import.cancel_on_error
        );
        tracing::info!("  sql:      max_connections={}", self.sql.max_connections);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            session: SessionConfig::default(),
            import: ImportConfig::default(),
            sql: SqlConfig::default(),
        }
    }
}

// ── Session ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound on how long `close()` waits for the worker to stop.
    pub join_timeout_ms: u64,
    /// Rows read by option-change previews.
    pub preview_rows: usize,
}

impl SessionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            join_timeout_ms: profiled_env_u64(p, "SESSION_JOIN_TIMEOUT_MS", 5000),
            preview_rows: profiled_env_u64(p, "PREVIEW_ROWS", 100) as usize,
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 5000,
            preview_rows: 100,
        }
    }
}

// ── Import ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub logs_dir: PathBuf,
    pub sink_path: PathBuf,
    pub cancel_on_error: bool,
}

impl ImportConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            logs_dir: PathBuf::from(profiled_env_or(p, "IMPORT_LOGS_DIR", "logs")),
            sink_path: PathBuf::from(profiled_env_or(p, "IMPORT_SINK_PATH", "data/import.jsonl")),
            cancel_on_error: profiled_env_bool(p, "IMPORT_CANCEL_ON_ERROR", false),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            sink_path: PathBuf::from("data/import.jsonl"),
            cancel_on_error: false,
        }
    }
}

// ── SQL sources ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    pub max_connections: u32,
}

impl SqlConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_connections: profiled_env_u32(p, "SQL_MAX_CONNECTIONS", 2),
        }
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self { max_connections: 2 }
    }
}
