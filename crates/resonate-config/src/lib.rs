//! Layered configuration for the resonance-matching core.
//!
//! Load order, lowest to highest priority: built-in defaults, `.env` file,
//! process environment variables.

use resonate_errors::CoreError;
use serde::{Deserialize, Serialize};

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_nonempty(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_nonempty(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_nonempty(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env_nonempty(key).unwrap_or_else(|| default.to_string())
}

/// Embedded-store paths. Every adapter owns one `sled` tree-set rooted at
/// its own directory so the stores can be wiped independently in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePaths {
    pub profile_store_path: String,
    pub vector_store_path: String,
    pub cache_path: String,
    pub scheduler_path: String,
}

/// Embedding/completion provider settings. The default implementation
/// (`resonate-llm`'s offline provider) ignores most of these, but a
/// real HTTP-backed provider reads them the same way the teacher's
/// orchestrator reads `OPENROUTER_API_KEY` from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub completion_provider: String,
    pub completion_model: String,
    pub completion_temperature: f64,
    pub completion_max_tokens: u32,
    pub api_key: Option<String>,
    pub rate_limit_max_calls: u32,
    pub rate_limit_window_secs: u64,
}

/// Cron expressions for the two scheduled jobs the core registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub daily_rebuild_cron: String,
    pub chm_sweep_cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub stores: StorePaths,
    pub llm: LlmSettings,
    pub scheduler: SchedulerSettings,
    pub cache_default_ttl_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    /// Load `.env` (if present) then environment variables, falling back to
    /// defaults suitable for local development.
    pub fn load() -> Result<Self, CoreError> {
        dotenvy::dotenv().ok();
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self, CoreError> {
        let data_dir = env_string("RESONATE_DATA_DIR", "./data");

        Ok(AppConfig {
            stores: StorePaths {
                profile_store_path: env_string(
                    "RESONATE_STORE_PATH",
                    &format!("{data_dir}/store"),
                ),
                vector_store_path: env_string(
                    "RESONATE_VECTOR_STORE_PATH",
                    &format!("{data_dir}/vectors"),
                ),
                cache_path: env_string("RESONATE_CACHE_PATH", &format!("{data_dir}/cache")),
                scheduler_path: env_string(
                    "RESONATE_SCHEDULER_PATH",
                    &format!("{data_dir}/scheduler"),
                ),
            },
            llm: LlmSettings {
                embedding_provider: env_string("RESONATE_EMBEDDING_PROVIDER", "offline"),
                embedding_model: env_string("RESONATE_EMBEDDING_MODEL", "text-embedding-3-small"),
                embedding_dimensions: env_u64("RESONATE_EMBEDDING_DIMENSIONS", 1536) as usize,
                completion_provider: env_string("RESONATE_COMPLETION_PROVIDER", "offline"),
                completion_model: env_string("RESONATE_COMPLETION_MODEL", "gpt-4o-mini"),
                completion_temperature: env_f64("RESONATE_COMPLETION_TEMPERATURE", 0.7),
                completion_max_tokens: env_u32("RESONATE_COMPLETION_MAX_TOKENS", 500),
                api_key: env_nonempty("RESONATE_LLM_API_KEY"),
                rate_limit_max_calls: env_u32("RESONATE_LLM_RATE_LIMIT_MAX_CALLS", 3000),
                rate_limit_window_secs: env_u64("RESONATE_LLM_RATE_LIMIT_WINDOW_SECS", 60),
            },
            scheduler: SchedulerSettings {
                daily_rebuild_cron: env_string("RESONATE_DAILY_REBUILD_CRON", "0 0 3 * * *"),
                chm_sweep_cron: env_string("RESONATE_CHM_SWEEP_CRON", "0 0 */4 * * *"),
            },
            cache_default_ttl_secs: env_u64("RESONATE_CACHE_DEFAULT_TTL_SECS", 3600),
            log_level: env_string("RESONATE_LOG_LEVEL", "info"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_env() {
        let cfg = AppConfig::load_from_env().unwrap();
        assert_eq!(cfg.llm.embedding_dimensions, 1536);
        assert_eq!(cfg.llm.rate_limit_max_calls, 3000);
        assert_eq!(cfg.scheduler.daily_rebuild_cron, "0 0 3 * * *");
    }

    #[test]
    fn env_override_takes_priority_over_default() {
        std::env::set_var("RESONATE_CACHE_DEFAULT_TTL_SECS", "120");
        let cfg = AppConfig::load_from_env().unwrap();
        assert_eq!(cfg.cache_default_ttl_secs, 120);
        std::env::remove_var("RESONATE_CACHE_DEFAULT_TTL_SECS");
    }
}
