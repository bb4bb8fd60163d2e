//! Curation Configuration Management
//!
//! Handles configuration from environment variables and config files with
//! defaults that match interactive curation (manual merging, role-as-label
//! link comparison).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::layer::LinkCompareBehavior;

/// Main curation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CurationConfig {
    /// Diff settings
    pub diff: DiffConfig,

    /// Merge settings
    pub merge: MergeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl CurationConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var("CURATION_LINK_COMPARE") {
            self.diff.link_compare = Some(
                value
                    .parse()
                    .map_err(|_| invalid("CURATION_LINK_COMPARE", &value))?,
            );
        }

        if let Ok(value) = std::env::var("CURATION_MERGE_STRATEGY") {
            self.merge.strategy = value.parse()?;
        }
        if let Ok(value) = std::env::var("CURATION_ALLOW_STACKING") {
            self.merge.allow_stacking = parse_bool("CURATION_ALLOW_STACKING", &value)?;
        }
        if let Ok(value) = std::env::var("CURATION_USER_THRESHOLD") {
            self.merge.user_threshold = value
                .parse()
                .map_err(|_| invalid("CURATION_USER_THRESHOLD", &value))?;
        }
        if let Ok(value) = std::env::var("CURATION_CONFIDENCE_THRESHOLD") {
            self.merge.confidence_threshold = value
                .parse()
                .map_err(|_| invalid("CURATION_CONFIDENCE_THRESHOLD", &value))?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(value) = std::env::var("LOG_JSON") {
            self.logging.json_format = parse_bool("LOG_JSON", &value)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let confidence = self.merge.confidence_threshold;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(invalid(
                "merge.confidence_threshold",
                &confidence.to_string(),
            ));
        }
        if self.merge.user_threshold == 0 {
            return Err(invalid("merge.user_threshold", "0"));
        }
        Ok(())
    }
}

/// Diff configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Link comparison applied to every link feature; `None` keeps the
    /// behavior declared per feature in the layer schema
    pub link_compare: Option<LinkCompareBehavior>,
}

/// Merge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Strategy used by bulk merge
    pub strategy: MergeStrategyKind,

    /// Create stacked annotations instead of overwriting
    pub allow_stacking: bool,

    /// Minimum number of annotators voting for a value (threshold strategy)
    pub user_threshold: usize,

    /// Minimum vote share of the winning value (threshold strategy)
    pub confidence_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategyKind::Manual,
            allow_stacking: false,
            user_threshold: 1,
            confidence_threshold: 0.0,
        }
    }
}

/// Built-in merge strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategyKind {
    #[default]
    Manual,
    CompleteAgreement,
    MergeIncomplete,
    Threshold,
}

impl std::str::FromStr for MergeStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "manual" => Ok(Self::Manual),
            "complete_agreement" => Ok(Self::CompleteAgreement),
            "merge_incomplete" => Ok(Self::MergeIncomplete),
            "threshold" => Ok(Self::Threshold),
            _ => Err(invalid("CURATION_MERGE_STRATEGY", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
