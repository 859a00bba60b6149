use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
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

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Scheduler config ──────────────────────────────────────────

/// Scheduler configuration, parsed from TOML or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Lanes created in the wait pool when the scheduler starts.
    #[serde(default = "default_wait_lanes")]
    pub initial_wait_lanes: usize,
    /// Lanes created in the buffer pool up front. 0 = grow on demand.
    #[serde(default = "default_buffer_lanes")]
    pub initial_buffer_lanes: usize,
    /// Thread name prefix for background lanes.
    #[serde(default = "default_lane_prefix")]
    pub lane_name_prefix: String,
    /// Thread name of the serial effect queue.
    #[serde(default = "default_effect_queue_name")]
    pub effect_queue_name: String,
}

fn default_wait_lanes() -> usize { 5 }
fn default_buffer_lanes() -> usize { 0 }
fn default_lane_prefix() -> String { "stage".to_string() }
fn default_effect_queue_name() -> String { "stage-effects".to_string() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_wait_lanes: default_wait_lanes(),
            initial_buffer_lanes: default_buffer_lanes(),
            lane_name_prefix: default_lane_prefix(),
            effect_queue_name: default_effect_queue_name(),
        }
    }
}

impl SchedulerConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// Profile is read from `STAGE_PROFILE`. When set (e.g. `TEST`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_opt("STAGE_PROFILE").unwrap_or_default().to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            initial_wait_lanes: profiled_env_usize(p, "STAGE_WAIT_LANES", default_wait_lanes()),
            initial_buffer_lanes: profiled_env_usize(p, "STAGE_BUFFER_LANES", default_buffer_lanes()),
            lane_name_prefix: profiled_env_or(p, "STAGE_LANE_PREFIX", &default_lane_prefix()),
            effect_queue_name: profiled_env_or(p, "STAGE_EFFECT_QUEUE", &default_effect_queue_name()),
        }
    }

    /// Parse config from a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config:");
        tracing::info!("  wait pool:    initial_lanes={}", self.initial_wait_lanes);
        tracing::info!("  buffer pool:  initial_lanes={}", self.initial_buffer_lanes);
        tracing::info!("  lanes:        name_prefix={}", self.lane_name_prefix);
        tracing::info!("  effects:      queue={}", self.effect_queue_name);
    }

    /// Config as JSON, for status output.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "wait_pool": { "initial_lanes": self.initial_wait_lanes },
            "buffer_pool": { "initial_lanes": self.initial_buffer_lanes },
            "lane_name_prefix": self.lane_name_prefix,
            "effect_queue": self.effect_queue_name,
        })
    }
}
