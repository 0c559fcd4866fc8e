// Process configuration shared by the API, the worker and the CLI

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_RESULT_TTL_SECS: u64 = 2 * 60 * 60;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;
pub const DEFAULT_QUEUE_POLL_SECS: u64 = 5;
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    /// Root directory holding exercise templates
    pub exercises_root: PathBuf,
    pub language_config_path: PathBuf,
    pub exercise_catalog_path: PathBuf,
    /// Parent directory for per-task workspaces
    pub workspace_root: PathBuf,
    pub result_ttl: Duration,
    pub worker_concurrency: usize,
    pub queue_poll: Duration,
    pub port: u16,
    pub json_logs: bool,
}

impl Config {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> EngineResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let result_ttl_secs = parse_or(&lookup, "RESULT_TTL_SECS", DEFAULT_RESULT_TTL_SECS)?;
        let worker_concurrency =
            parse_or(&lookup, "WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?;
        if worker_concurrency == 0 {
            return Err(EngineError::Config(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        let queue_poll_secs = parse_or(&lookup, "QUEUE_POLL_SECS", DEFAULT_QUEUE_POLL_SECS)?;

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            exercises_root: lookup("EXERCISES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("exercises")),
            language_config_path: lookup("LANGUAGE_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/languages.json")),
            exercise_catalog_path: lookup("EXERCISE_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/exercises.json")),
            workspace_root: lookup("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            result_ttl: Duration::from_secs(result_ttl_secs),
            worker_concurrency,
            queue_poll: Duration::from_secs(queue_poll_secs),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            json_logs: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> EngineResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EngineError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}
