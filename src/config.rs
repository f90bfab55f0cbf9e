/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: classifieds.toml (in working directory)
/// 3. Environment variables: prefixed CLASSIFIEDS_ (e.g., CLASSIFIEDS_LOG_LEVEL=debug,
///    CLASSIFIEDS_ENGINE__PAGE_SIZE=25)

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::ClassifiedsError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// Database URL. `sqlite://` selects the SQLite store, anything else PostgreSQL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Weights, thresholds and page size shared by ranking and aggregation.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Tunables passed into both the ranking engine and the score aggregator.
///
/// Score weights must stay stable for the lifetime of stored advertisements:
/// popularity scores are running counters and are never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_comment_weight")]
    pub comment_weight: i64,

    #[serde(default = "default_like_weight")]
    pub like_weight: i64,

    #[serde(default = "default_save_weight")]
    pub save_weight: i64,

    /// Minimum per-field trigram similarity for an entity to match at all.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Items per page for every ranked or listed result.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "sqlite://classifieds.db".to_string()
}

fn default_comment_weight() -> i64 {
    1
}

fn default_like_weight() -> i64 {
    1
}

fn default_save_weight() -> i64 {
    1
}

// pg_trgm.similarity_threshold default
fn default_match_threshold() -> f64 {
    0.3
}

fn default_page_size() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            comment_weight: default_comment_weight(),
            like_weight: default_like_weight(),
            save_weight: default_save_weight(),
            match_threshold: default_match_threshold(),
            page_size: default_page_size(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ClassifiedsError> {
        if self.page_size == 0 {
            return Err(ClassifiedsError::Config(
                "engine.page_size must be at least 1".to_string(),
            ));
        }
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            return Err(ClassifiedsError::Config(format!(
                "engine.match_threshold must be a non-negative number, got {}",
                self.match_threshold
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            database_url: default_database_url(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: CLASSIFIEDS_LOG_LEVEL=debug overrides log_level in classifieds.toml
    pub fn load() -> Result<Config, ClassifiedsError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("classifieds.toml"))
            .merge(Env::prefixed("CLASSIFIEDS_").split("__"))
            .extract()
            .map_err(|e| ClassifiedsError::Config(format!("Failed to load config: {}", e)))?;

        config.engine.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.database_url, "sqlite://classifieds.db");
        assert_eq!(config.engine.comment_weight, 1);
        assert_eq!(config.engine.like_weight, 1);
        assert_eq!(config.engine.save_weight, 1);
        assert_eq!(config.engine.page_size, 10);
        assert!((config.engine.match_threshold - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_toml_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "classifieds.toml",
                r#"
                    log_level = "debug"

                    [engine]
                    page_size = 25
                    like_weight = 3
                "#,
            )?;
            jail.set_env("CLASSIFIEDS_ENGINE__LIKE_WEIGHT", "5");

            let config = Config::load().expect("config should load");
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.engine.page_size, 25);
            assert_eq!(config.engine.like_weight, 5);
            assert_eq!(config.engine.comment_weight, 1);
            Ok(())
        });
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let engine = EngineConfig {
            page_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(engine.validate(), Err(ClassifiedsError::Config(_))));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let engine = EngineConfig {
            match_threshold: -0.1,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());
    }
}
