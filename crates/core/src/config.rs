//! Configuration management for zenodo-upload

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use dirs::home_dir;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Production API root
pub const ZENODO_BASE_URL: &str = "https://zenodo.org/api";

/// Sandbox API root, used for dry runs
pub const ZENODO_SANDBOX_URL: &str = "https://sandbox.zenodo.org/api";

/// Configuration directory name
const CONFIG_DIR: &str = "zenodo-upload";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub zenodo: ZenodoConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ZenodoConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_sandbox_url")]
    pub sandbox_url: String,
}

impl Default for ZenodoConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            sandbox_url: default_sandbox_url(),
        }
    }
}

/// Retry and backoff settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Build the backoff policy described by these settings
    pub fn policy(&self) -> Result<BackoffPolicy> {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
        .map(|policy| policy.with_jitter(self.jitter))
    }
}

/// Transfer settings
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Streaming chunk size in KiB (default: 1024)
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: usize,
    /// Per-request timeout in seconds (default: 3600)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_kb: default_chunk_size_kb(),
            timeout_secs: default_timeout(),
        }
    }
}

impl UploadConfig {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kb * 1024
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_base_url() -> String {
    ZENODO_BASE_URL.to_string()
}

fn default_sandbox_url() -> String {
    ZENODO_SANDBOX_URL.to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000 // 1 second
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

fn default_chunk_size_kb() -> usize {
    1024 // 1MiB
}

fn default_timeout() -> u64 {
    3600
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let home = home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR))
}

/// Get the configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load configuration from a specific file
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: ConfigFile = toml::from_str(&content)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load the user configuration, falling back to defaults when there is none
pub fn load_config() -> Result<ConfigFile> {
    let config_path = match get_config_path() {
        Ok(path) => path,
        Err(_) => return Ok(ConfigFile::default()),
    };

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
        return Ok(ConfigFile::default());
    }

    load_config_from(&config_path)
}

/// Validate configuration
pub fn validate_config(config: &ConfigFile) -> Result<()> {
    if config.zenodo.base_url.trim().is_empty() || config.zenodo.sandbox_url.trim().is_empty() {
        return Err(Error::InvalidInput("API base URLs cannot be empty".to_string()));
    }

    if config.retry.max_attempts == 0 {
        return Err(Error::InvalidInput("max_attempts must be at least 1".to_string()));
    }

    if config.retry.multiplier < 1.0 || !config.retry.multiplier.is_finite() {
        return Err(Error::InvalidInput(format!(
            "multiplier must be a finite number >= 1 (got {})",
            config.retry.multiplier
        )));
    }

    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return Err(Error::InvalidInput(
            "max_delay_ms cannot be lower than base_delay_ms".to_string(),
        ));
    }

    if config.upload.chunk_size_kb == 0 {
        return Err(Error::InvalidInput("chunk_size_kb must be at least 1".to_string()));
    }

    Ok(())
}

/// Where uploads go and with which credentials
#[derive(Clone)]
pub struct DepositTarget {
    pub base_url: String,
    pub deposit_id: String,
    pub access_token: String,
}

impl DepositTarget {
    pub fn new(
        base_url: impl Into<String>,
        deposit_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(Error::MissingToken);
        }

        let deposit_id = deposit_id.into();
        if deposit_id.trim().is_empty() {
            return Err(Error::InvalidInput("Deposit ID cannot be empty".to_string()));
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            deposit_id: deposit_id.trim().to_string(),
            access_token,
        })
    }

    /// URL of the deposition resource
    pub fn deposition_url(&self) -> String {
        format!("{}/deposit/depositions/{}", self.base_url, self.deposit_id)
    }
}

// Keeps the token out of logs and panics.
impl std::fmt::Debug for DepositTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepositTarget")
            .field("base_url", &self.base_url)
            .field("deposit_id", &self.deposit_id)
            .field("access_token", &"***")
            .finish()
    }
}

/// Everything the orchestrator needs besides the files themselves
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: DepositTarget,
    pub dry_run: bool,
    pub backoff: BackoffPolicy,
}

impl RunConfig {
    /// Build a run configuration, picking the sandbox endpoint for dry runs
    pub fn new(
        config: &ConfigFile,
        deposit_id: impl Into<String>,
        access_token: impl Into<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let base_url = if dry_run {
            &config.zenodo.sandbox_url
        } else {
            &config.zenodo.base_url
        };

        Ok(Self {
            target: DepositTarget::new(base_url.clone(), deposit_id, access_token)?,
            dry_run,
            backoff: config.retry.policy()?,
        })
    }
}
