//! Engine configuration (crossmod.toml)
//!
//! Every field has a default, so an empty document is a valid configuration.
//!
//! ```toml
//! [resolver]
//! extensions = ["js", "mjs", "wasm"]
//! index_file = "index"
//!
//! [loader]
//! concurrency = 4
//!
//! [graph]
//! max_modules = 10000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while reading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub graph: GraphConfig,
}

/// Filesystem resolution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolverConfig {
    /// Extensions tried, in order, for specifiers without one
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// File name (without extension) tried inside directories
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

fn default_extensions() -> Vec<String> {
    vec!["js".to_string(), "mjs".to_string(), "wasm".to_string()]
}

fn default_index_file() -> String {
    "index".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            index_file: default_index_file(),
        }
    }
}

/// Loading settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderConfig {
    /// Worker threads used to load one frontier of the graph
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Graph construction limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphConfig {
    /// Largest number of modules one graph may contain
    #[serde(default = "default_max_modules")]
    pub max_modules: usize,
}

fn default_max_modules() -> usize {
    10_000
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_modules: default_max_modules(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loader.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "loader.concurrency must be at least 1".to_string(),
            ));
        }
        if self.graph.max_modules == 0 {
            return Err(ConfigError::Invalid(
                "graph.max_modules must be at least 1".to_string(),
            ));
        }
        if self.resolver.index_file.is_empty() {
            return Err(ConfigError::Invalid(
                "resolver.index_file cannot be empty".to_string(),
            ));
        }
        if let Some(ext) = self
            .resolver
            .extensions
            .iter()
            .find(|e| e.is_empty() || e.starts_with('.'))
        {
            return Err(ConfigError::Invalid(format!(
                "resolver.extensions entry '{}' must be a bare extension like \"js\"",
                ext
            )));
        }
        Ok(())
    }
}
