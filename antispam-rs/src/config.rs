//! Configuration for antispam-rs
//!
//! Loaded once per process and handed to the engine by reference. Nothing in
//! the decision path reads ambient settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AntispamError, Result};
use crate::spam::types::GeoAction;

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Decision engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Aggregate score at or above which a submission is spam
    #[serde(default = "default_spam_threshold")]
    pub spam_threshold: f64,
    /// Hidden decoy field expected to stay empty
    #[serde(default = "default_honeypot_field")]
    pub honeypot_field: String,
    /// Classifier probability at or above which it recommends spam
    #[serde(default = "default_classifier_threshold")]
    pub classifier_threshold: f64,
    /// Score contribution of a fully confident classifier
    #[serde(default = "default_classifier_weight")]
    pub classifier_weight: f64,
    /// Case-sensitive wordlist and blacklist matching
    #[serde(default)]
    pub case_sensitive: bool,
    /// Spam confirmations from one address before it is blacklisted
    #[serde(default = "default_auto_blacklist_threshold")]
    pub auto_blacklist_threshold: u32,
    /// Action applied to unresolved addresses
    #[serde(default)]
    pub geo_default_action: GeoAction,
    /// Score added by a geo `flag` action
    #[serde(default = "default_geo_flag_score")]
    pub geo_flag_score: f64,
    /// Country code -> action
    #[serde(default)]
    pub geo_policy: BTreeMap<String, GeoAction>,
}

/// GeoIP database settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeoConfig {
    /// Path to a MaxMind GeoIP2/GeoLite2 Country database (`.mmdb`)
    pub database_path: Option<PathBuf>,
    /// Number of recent lookups kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_spam_threshold() -> f64 {
    5.0
}

fn default_honeypot_field() -> String {
    "honeypot".to_string()
}

fn default_classifier_threshold() -> f64 {
    0.9
}

fn default_classifier_weight() -> f64 {
    5.0
}

fn default_auto_blacklist_threshold() -> u32 {
    3
}

fn default_geo_flag_score() -> f64 {
    2.0
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_database_url() -> String {
    "sqlite://antispam.db?mode=rwc".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spam_threshold: default_spam_threshold(),
            honeypot_field: default_honeypot_field(),
            classifier_threshold: default_classifier_threshold(),
            classifier_weight: default_classifier_weight(),
            case_sensitive: false,
            auto_blacklist_threshold: default_auto_blacklist_threshold(),
            geo_default_action: GeoAction::default(),
            geo_flag_score: default_geo_flag_score(),
            geo_policy: BTreeMap::new(),
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AntispamError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| AntispamError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load an optional TOML file layered with `ANTISPAM__SECTION__KEY`
    /// environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("ANTISPAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.geo.cache_capacity == 0 {
            return Err(AntispamError::Config(
                "geo.cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Reject settings that would leave the verdict undefined
    pub fn validate(&self) -> Result<()> {
        if !self.spam_threshold.is_finite() {
            return Err(AntispamError::Config(format!(
                "spam_threshold must be a finite number, got {}",
                self.spam_threshold
            )));
        }
        if !(self.classifier_threshold > 0.0 && self.classifier_threshold <= 1.0) {
            return Err(AntispamError::Config(format!(
                "classifier_threshold must be in (0, 1], got {}",
                self.classifier_threshold
            )));
        }
        if !self.classifier_weight.is_finite() || self.classifier_weight < 0.0 {
            return Err(AntispamError::Config(format!(
                "classifier_weight must be a non-negative number, got {}",
                self.classifier_weight
            )));
        }
        if !self.geo_flag_score.is_finite() || self.geo_flag_score < 0.0 {
            return Err(AntispamError::Config(format!(
                "geo_flag_score must be a non-negative number, got {}",
                self.geo_flag_score
            )));
        }
        if self.honeypot_field.trim().is_empty() {
            return Err(AntispamError::Config(
                "honeypot_field must not be empty".to_string(),
            ));
        }
        if self.auto_blacklist_threshold == 0 {
            return Err(AntispamError::Config(
                "auto_blacklist_threshold must be at least 1".to_string(),
            ));
        }
        for code in self.geo_policy.keys() {
            normalize_country_code(code)?;
        }
        Ok(())
    }
}

/// Upper-case a two-letter ISO country code, rejecting anything else
pub fn normalize_country_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(AntispamError::Config(format!("unknown geo code mapping: {:?}", code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.spam_threshold, 5.0);
        assert_eq!(config.engine.honeypot_field, "honeypot");
        assert_eq!(config.engine.geo_default_action, GeoAction::Allow);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            spam_threshold = 7.5
            honeypot_field = "website"
            geo_default_action = "flag"

            [engine.geo_policy]
            RU = "deny"
            br = "flag"

            [geo]
            database_path = "/var/lib/antispam/GeoLite2-Country.mmdb"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.engine.spam_threshold, 7.5);
        assert_eq!(config.engine.honeypot_field, "website");
        assert_eq!(config.engine.geo_default_action, GeoAction::Flag);
        assert_eq!(config.engine.geo_policy.get("RU"), Some(&GeoAction::Deny));
        assert_eq!(config.geo.cache_capacity, 1024);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut engine = EngineConfig::default();
        engine.spam_threshold = f64::NAN;
        assert!(matches!(engine.validate(), Err(AntispamError::Config(_))));

        let mut engine = EngineConfig::default();
        engine.classifier_threshold = 1.5;
        assert!(engine.validate().is_err());

        let mut engine = EngineConfig::default();
        engine.auto_blacklist_threshold = 0;
        assert!(engine.validate().is_err());

        let mut engine = EngineConfig::default();
        engine.honeypot_field = "  ".to_string();
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_unknown_geo_code_rejected() {
        let mut engine = EngineConfig::default();
        engine.geo_policy.insert("Mars".to_string(), GeoAction::Deny);
        assert!(matches!(engine.validate(), Err(AntispamError::Config(_))));
    }

    #[test]
    fn test_normalize_country_code() {
        assert_eq!(normalize_country_code("it").unwrap(), "IT");
        assert!(normalize_country_code("I1").is_err());
        assert!(normalize_country_code("").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("antispam.toml");
        std::fs::write(&path, "[engine]\nspam_threshold = 3.0\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine.spam_threshold, 3.0);

        std::fs::write(&path, "[engine]\nclassifier_threshold = 0.0\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.engine.auto_blacklist_threshold, 3);
    }
}
