//! Configuration System
//!
//! Engine defaults that host programs may override from a TOML file or the environment.
//! Precedence (lowest to highest): built-in defaults, file, `SKSTORE__*` variables.

use crate::error::StoreError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

mod merge;
mod sources;

pub use sources::ENV_PREFIX;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub lazy: LazyConfig,

    #[serde(default)]
    pub subscriptions: SubscriptionConfig,

    #[serde(default)]
    pub propagation: PropagationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults for lazy directories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LazyConfig {
    /// Fail cyclic reads with `CycleDetected` instead of reading an empty array
    #[serde(default = "default_true")]
    pub throw_on_cycle: bool,

    /// Default `collect` flag of lazy directories created through typed handles
    #[serde(default)]
    pub collect: bool,
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self {
            throw_on_cycle: true,
            collect: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Hand sinks a batch after every update, even when nothing in their directory changed
    #[serde(default)]
    pub deliver_empty: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Emit one trace event per recomputed key
    #[serde(default)]
    pub log_keys: bool,
}

fn default_true() -> bool {
    true
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl StoreConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "Invalid log level: {} (must be one of {})",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }
        for (module, level) in &self.logging.modules {
            if !LOG_LEVELS.contains(&level.as_str()) {
                errors.push(ValidationError::Logging(format!(
                    "Invalid level {} for module {}",
                    level, module
                )));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads [`StoreConfig`] from layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then `path` if given, then the environment. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<StoreConfig, StoreError> {
        let mut builder = merge::builder_with_defaults()?;
        if let Some(path) = path {
            builder = sources::add_file(builder, path)?;
        }
        builder = sources::add_environment(builder);

        let config: StoreConfig = builder.build()?.try_deserialize()?;
        if let Err(errors) = config.validate() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(StoreError::Config(messages.join("; ")));
        }
        debug!(file = ?path, "Loaded configuration");
        Ok(config)
    }

    /// Load from a file, with environment overrides still applied.
    pub fn load_from_file(path: &Path) -> Result<StoreConfig, StoreError> {
        Self::load(Some(path))
    }

    /// Write the defaults to `path` as TOML.
    pub fn write_default(path: &Path) -> Result<(), StoreError> {
        let rendered = toml::to_string_pretty(&StoreConfig::default())
            .map_err(|e| StoreError::Config(format!("Failed to render config: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Config(format!("Failed to create config directory: {}", e)))?;
        }
        std::fs::write(path, rendered)
            .map_err(|e| StoreError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }
}
