// =============================================================================
// CONFIGURATION - Load settings from glcheck.toml
// =============================================================================
//
// Settings for the `glcheck` tool: which shader files to check, which stages
// each file must provide, watch mode and log level. A missing file gives the
// defaults.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::StageKind;

pub const DEFAULT_PATH: &str = "glcheck.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub check: CheckConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

/// What to check
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Multi-stage files checked when no paths are given on the command line
    pub shaders: Vec<PathBuf>,
    /// Stage tokens every file must contain
    pub require_stages: Vec<String>,
    /// Also link the compiled stages into a program
    pub link: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            shaders: Vec::new(),
            require_stages: vec!["vertex".to_string(), "fragment".to_string()],
            link: true,
        }
    }
}

/// Re-check files when they change
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `glcheck.toml`, falling back to defaults
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_PATH).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", DEFAULT_PATH, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.required_stages()?;
        Ok(config)
    }

    /// Required stages as stage kinds
    pub fn required_stages(&self) -> Result<Vec<StageKind>> {
        self.check
            .require_stages
            .iter()
            .map(|token| {
                token
                    .parse::<StageKind>()
                    .with_context(|| format!("Invalid entry in check.require_stages: {:?}", token))
            })
            .collect()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    /// Log level filter; unknown names fall back to `Info`
    pub fn log_level(&self) -> LevelFilter {
        self.log.level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', defaulting to info", self.log.level);
            LevelFilter::Info
        })
    }
}
