pub mod institutions;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::extract::Fallbacks;

pub use self::institutions::{EndpointConfig, HttpMethod, InstitutionConfig};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Per-institution entries; these replace built-in presets with the same id.
    #[serde(default)]
    pub institutions: HashMap<String, InstitutionConfig>,
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Parallel page requests for per-week endpoints.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Normalization configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_week")]
    pub max_week: u32,

    #[serde(default = "default_unknown_teacher")]
    pub unknown_teacher: String,

    #[serde(default = "default_unknown_room")]
    pub unknown_room: String,
}

impl PipelineConfig {
    pub fn fallbacks(&self) -> Fallbacks {
        Fallbacks {
            teacher: self.unknown_teacher.clone(),
            room: self.unknown_room.clone(),
        }
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "timetable-etl/0.1 (schedule import)".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/timetable.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_max_week() -> u32 {
    20
}
fn default_unknown_teacher() -> String {
    "未知教师".to_string()
}
fn default_unknown_room() -> String {
    "未知地点".to_string()
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_week: default_max_week(),
            unknown_teacher: default_unknown_teacher(),
            unknown_room: default_unknown_room(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("TIMETABLE").separator("__"))
            .build()
            .context("failed to read configuration sources")?;

        cfg.try_deserialize().context("invalid configuration")
    }

    pub fn institution(&self, id: &str) -> Option<InstitutionConfig> {
        institutions::resolve(id, &self.institutions)
    }

    pub fn institution_ids(&self) -> Vec<String> {
        institutions::known_ids(&self.institutions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.max_week, 20);
        assert_eq!(cfg.fetcher.concurrency, 4);
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/timetable.duckdb"));
        assert_eq!(cfg.pipeline.fallbacks().teacher, "未知教师");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[pipeline]\nmax_week = 18\n[fetcher]\nmax_retries = 5\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.pipeline.max_week, 18);
        assert_eq!(cfg.pipeline.unknown_room, "未知地点");
        assert_eq!(cfg.fetcher.max_retries, 5);
        assert_eq!(cfg.fetcher.request_delay_ms, 500);
        assert!(cfg.storage.run_migrations);
    }

    #[test]
    fn test_institution_lookup_falls_back_to_presets() {
        let cfg = AppConfig::default();
        assert!(cfg.institution("hnzy").is_some());
        assert!(cfg.institution("unknown").is_none());
        assert!(cfg.institution_ids().contains(&"ynufe".to_string()));
    }
}
