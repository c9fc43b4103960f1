use crate::api::resilience::{LogLevel, ResilienceConfig, RetryConfig};
use crate::reconcile::DEFAULT_PAGE_SIZE;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables that override file settings
pub const ENV_PREFIX: &str = "RECONCILER_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    /// Per entity-set overrides, keyed by entity name (e.g. `contacts`)
    #[serde(default)]
    pub entities: HashMap<String, EntitySettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_update_deadline_ms")]
    pub update_deadline_ms: u64,
    #[serde(default = "default_verify_deadline_ms")]
    pub verify_deadline_ms: u64,
    #[serde(default = "default_delete_deadline_ms")]
    pub delete_deadline_ms: u64,
    #[serde(default = "default_read_deadline_ms")]
    pub read_deadline_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_min_attempts")]
    pub min_attempts: u32,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_true")]
    pub invalidate_on_update: bool,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

/// Overrides for one entity set; unset fields fall back to `Settings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntitySettings {
    pub page_size: Option<u32>,
    pub update_deadline_ms: Option<u64>,
    pub verify_deadline_ms: Option<u64>,
    pub delete_deadline_ms: Option<u64>,
    pub invalidate_on_update: Option<bool>,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_update_deadline_ms() -> u64 {
    30_000
}

fn default_verify_deadline_ms() -> u64 {
    30_000
}

fn default_delete_deadline_ms() -> u64 {
    60_000
}

fn default_read_deadline_ms() -> u64 {
    15_000
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_min_attempts() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            update_deadline_ms: default_update_deadline_ms(),
            verify_deadline_ms: default_verify_deadline_ms(),
            delete_deadline_ms: default_delete_deadline_ms(),
            read_deadline_ms: default_read_deadline_ms(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            min_attempts: default_min_attempts(),
            jitter: true,
            invalidate_on_update: true,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// `<config dir>/dynamics-reconciler/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("dynamics-reconciler").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from(&config_path)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", path);

        if !path.exists() {
            info!("Config file doesn't exist, using defaults");
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        debug!("Loaded config with {} entity overrides", config.entities.len());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        debug!("Saving config to: {:?}", path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let config_content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(path, config_content).with_context(|| format!("Failed to write config file: {:?}", path))?;

        info!("Config saved successfully");
        Ok(())
    }

    /// Default config file, then `.env`, then `RECONCILER_*` variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override global settings from `RECONCILER_*` variables found by `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = &mut self.settings;

        override_from(&lookup, "PAGE_SIZE", &mut settings.page_size)?;
        override_from(&lookup, "UPDATE_DEADLINE_MS", &mut settings.update_deadline_ms)?;
        override_from(&lookup, "VERIFY_DEADLINE_MS", &mut settings.verify_deadline_ms)?;
        override_from(&lookup, "DELETE_DEADLINE_MS", &mut settings.delete_deadline_ms)?;
        override_from(&lookup, "READ_DEADLINE_MS", &mut settings.read_deadline_ms)?;
        override_from(&lookup, "BACKOFF_MS", &mut settings.backoff_ms)?;
        override_from(&lookup, "MIN_ATTEMPTS", &mut settings.min_attempts)?;
        override_from(&lookup, "JITTER", &mut settings.jitter)?;
        override_from(&lookup, "INVALIDATE_ON_UPDATE", &mut settings.invalidate_on_update)?;

        if let Some(level) = lookup(&format!("{}LOG_LEVEL", ENV_PREFIX)) {
            settings.log_level = parse_log_level(&level)?;
        }

        self.validate()
    }

    /// Reject settings the engine would refuse at run time
    pub fn validate(&self) -> Result<()> {
        let global = &self.settings;
        if global.page_size == 0 {
            anyhow::bail!("page_size must be greater than zero");
        }

        let deadlines = [
            ("update_deadline_ms", global.update_deadline_ms),
            ("verify_deadline_ms", global.verify_deadline_ms),
            ("delete_deadline_ms", global.delete_deadline_ms),
            ("read_deadline_ms", global.read_deadline_ms),
        ];
        if let Some((name, _)) = deadlines.iter().find(|(_, value)| *value == 0) {
            anyhow::bail!("{} must be greater than zero", name);
        }

        if global.backoff_ms == 0 {
            anyhow::bail!("backoff_ms must be greater than zero");
        }
        if global.max_backoff_ms < global.backoff_ms {
            anyhow::bail!(
                "max_backoff_ms ({}) must be at least backoff_ms ({})",
                global.max_backoff_ms,
                global.backoff_ms
            );
        }
        if !global.backoff_multiplier.is_finite() || global.backoff_multiplier < 1.0 {
            anyhow::bail!("backoff_multiplier must be a finite number of at least 1.0");
        }

        for (entity, overrides) in &self.entities {
            if overrides.page_size == Some(0) {
                anyhow::bail!("page_size for '{}' must be greater than zero", entity);
            }
            let zero_deadline = [
                overrides.update_deadline_ms,
                overrides.verify_deadline_ms,
                overrides.delete_deadline_ms,
            ]
            .contains(&Some(0));
            if zero_deadline {
                anyhow::bail!("deadlines for '{}' must be greater than zero", entity);
            }
        }

        Ok(())
    }

    /// Resilience configuration for one entity set
    pub fn resilience_for(&self, entity: &str) -> ResilienceConfig {
        let global = &self.settings;
        let overrides = self.entities.get(entity).cloned().unwrap_or_default();

        ResilienceConfig::builder()
            .retry_config(RetryConfig {
                min_attempts: global.min_attempts,
                base_delay: Duration::from_millis(global.backoff_ms),
                max_delay: Duration::from_millis(global.max_backoff_ms),
                backoff_multiplier: global.backoff_multiplier,
                jitter: global.jitter,
            })
            .update_deadline(Duration::from_millis(
                overrides.update_deadline_ms.unwrap_or(global.update_deadline_ms),
            ))
            .verify_deadline(Duration::from_millis(
                overrides.verify_deadline_ms.unwrap_or(global.verify_deadline_ms),
            ))
            .delete_deadline(Duration::from_millis(
                overrides.delete_deadline_ms.unwrap_or(global.delete_deadline_ms),
            ))
            .read_deadline(Duration::from_millis(global.read_deadline_ms))
            .invalidate_on_update(overrides.invalidate_on_update.unwrap_or(global.invalidate_on_update))
            .log_level(global.log_level)
            .build()
    }

    pub fn page_size_for(&self, entity: &str) -> u32 {
        self.entities
            .get(entity)
            .and_then(|overrides| overrides.page_size)
            .unwrap_or(self.settings.page_size)
    }
}

fn override_from<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    if let Some(value) = lookup(&name) {
        *target = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, value))?;
        debug!("{} overrides config file", name);
    }
    Ok(())
}

fn parse_log_level(value: &str) -> Result<LogLevel> {
    match value.trim().to_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        "trace" => Ok(LogLevel::Trace),
        other => anyhow::bail!("Invalid log level: {:?}", other),
    }
}
