//! Configuration management with file persistence

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Templar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub expansion: ExpansionConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Default strict-mode setting when a request omits it
    pub strict_default: bool,
    /// Treat warnings as validation failures
    pub fail_on_warnings: bool,
    /// Soft latency budget per expansion; exceeding it logs a performance
    /// warning but never fails the call
    pub budget_ms: u64,
    /// Template used when no assignment matches a hierarchy chain
    pub default_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expansion: ExpansionConfig {
                strict_default: false,
                fail_on_warnings: false,
                budget_ms: 100,
                default_template: None,
            },
            cache: CacheConfig {
                enabled: true,
                ttl_secs: 1800,
            },
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("TEMPLAR_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("templar")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            // Return default config without creating file
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.expansion.budget_ms == 0 {
            return Err(anyhow!("expansion.budget_ms must be greater than 0"));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(anyhow!("cache.ttl_secs must be greater than 0 when caching is enabled"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "expansion.strict_default" => Ok(self.expansion.strict_default.to_string()),
            "expansion.fail_on_warnings" => Ok(self.expansion.fail_on_warnings.to_string()),
            "expansion.budget_ms" => Ok(self.expansion.budget_ms.to_string()),
            "expansion.default_template" => Ok(self
                .expansion
                .default_template
                .clone()
                .unwrap_or_else(|| "(not set)".to_string())),
            "cache.enabled" => Ok(self.cache.enabled.to_string()),
            "cache.ttl_secs" => Ok(self.cache.ttl_secs.to_string()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `templar config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "expansion.strict_default" => {
                self.expansion.strict_default = value.parse().context("Expected true or false")?;
            }
            "expansion.fail_on_warnings" => {
                self.expansion.fail_on_warnings =
                    value.parse().context("Expected true or false")?;
            }
            "expansion.budget_ms" => {
                self.expansion.budget_ms = value.parse().context("Expected an integer")?;
            }
            "expansion.default_template" => {
                self.expansion.default_template = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "cache.enabled" => {
                self.cache.enabled = value.parse().context("Expected true or false")?;
            }
            "cache.ttl_secs" => {
                self.cache.ttl_secs = value.parse().context("Expected an integer")?;
            }
            _ => return Err(anyhow!("Unknown configuration key: {}", key)),
        }
        self.validate()
    }

    /// List all configuration keys and values
    pub fn list(&self) -> Vec<(String, String)> {
        [
            "expansion.strict_default",
            "expansion.fail_on_warnings",
            "expansion.budget_ms",
            "expansion.default_template",
            "cache.enabled",
            "cache.ttl_secs",
        ]
        .iter()
        .map(|key| (key.to_string(), self.get(key).unwrap_or_default()))
        .collect()
    }
}
