//! Configuration management for Clarion.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use crate::types::CrawlBounds;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/clarion/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Persistence settings
    pub database: DatabaseConfig,
    /// Admission control and recovery settings
    pub queue: QueueConfig,
    /// Crawl defaults and per-page limits
    pub crawl: CrawlConfig,
    /// Headless browser settings
    pub browser: BrowserConfig,
    /// Recurring schedule settings
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Load configuration from the default path, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if not found.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `CLARION_CONFIG`: Read the config file from this path instead
    /// - `CLARION_MAX_CONCURRENT`: Override the concurrent crawl cap
    /// - `CLARION_HEADLESS`: Override browser headless mode (true/false)
    /// - `CLARION_DATABASE_PATH`: Override the SQLite database location
    /// - `CLARION_AXE_SCRIPT`: Override the axe-core script location
    pub fn load_with_env() -> ConfigResult<Self> {
        let path = match std::env::var("CLARION_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_path()?,
        };
        Self::load_with_env_from(path)
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_env_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CLARION_MAX_CONCURRENT") {
            if let Ok(max) = val.parse() {
                self.queue.max_concurrent = max;
                tracing::debug!("Override queue.max_concurrent from env: {}", max);
            }
        }

        if let Ok(val) = std::env::var("CLARION_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("CLARION_DATABASE_PATH") {
            tracing::debug!("Override database.path from env: {}", val);
            self.database.path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CLARION_AXE_SCRIPT") {
            tracing::debug!("Override browser.axe_script_path from env: {}", val);
            self.browser.axe_script_path = Some(PathBuf::from(val));
        }
    }

    /// Check values that would make the engine unusable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.max_concurrent".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.crawl.page_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "crawl.page_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        self.crawl
            .default_bounds()
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                field: "crawl".to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    /// Save configuration to the default path.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(Self::config_path()?)
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let config_dir = path.parent().ok_or_else(|| ConfigError::InvalidValue {
            field: "config_path".to_string(),
            reason: "no parent directory".to_string(),
        })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/clarion/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "clarion", "clarion").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/clarion`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "clarion", "clarion").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (`:memory:` for an in-memory store)
    pub path: PathBuf,
    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = AppConfig::data_dir()
            .map(|dir| dir.join("clarion.db"))
            .unwrap_or_else(|_| PathBuf::from("clarion.db"));
        Self {
            path,
            max_connections: 5,
        }
    }
}

/// Admission control and recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum crawls running at once
    pub max_concurrent: usize,
    /// A running job without progress for this long is considered stuck
    pub stale_after_minutes: u64,
    /// How often stuck-job recovery runs
    pub recovery_interval_secs: u64,
    /// Fallback dispatch evaluation interval
    pub dispatch_poll_secs: u64,
}

impl QueueConfig {
    /// Staleness threshold as a duration.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_minutes * 60)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            stale_after_minutes: 30,
            recovery_interval_secs: 60,
            dispatch_poll_secs: 5,
        }
    }
}

/// Crawl defaults and per-page limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Navigation plus audit timeout per page
    pub page_timeout_secs: u64,
    /// Depth limit used when a submission omits one
    pub default_depth_limit: u32,
    /// Page limit used when a submission omits one
    pub default_page_limit: u32,
    /// Crawl rate used when a submission omits one
    pub default_crawl_rate: u32,
}

impl CrawlConfig {
    /// Per-page timeout as a duration.
    #[must_use]
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    /// Bounds assembled from the defaults.
    #[must_use]
    pub fn default_bounds(&self) -> CrawlBounds {
        CrawlBounds {
            depth_limit: self.default_depth_limit,
            page_limit: self.default_page_limit,
            crawl_rate: self.default_crawl_rate,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: 30,
            default_depth_limit: 3,
            default_page_limit: 100,
            default_crawl_rate: 30,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Path to an axe-core build injected into every page
    pub axe_script_path: Option<PathBuf>,
    /// Chrome/Chromium binary, auto-detected when unset
    pub chrome_executable: Option<PathBuf>,
    /// User agent string
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1366,
            window_height: 768,
            axe_script_path: None,
            chrome_executable: None,
            user_agent: "Clarion/0.1.0 (+https://github.com/clarion-a11y/clarion)".to_string(),
        }
    }
}

/// Recurring schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the schedule driver runs at all
    pub enabled: bool,
    /// Interval between schedule ticks
    pub tick_interval_secs: u64,
}

impl SchedulerConfig {
    /// Tick interval as a duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 15 * 60,
        }
    }
}
