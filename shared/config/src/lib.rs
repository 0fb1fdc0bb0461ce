//! Sniper Config - Configuration management for the pair sniper
//!
//! Provides layered configuration loading:
//! - Default values
//! - TOML configuration file
//! - `.env` file and environment variables
//!
//! Targets are validated here, before any watcher task starts.

pub mod target;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use target::{TargetConfig, TargetSpec};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    LoadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Missing required config: {0}")]
    MissingRequired(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    #[error("Invalid target '{name}': {reason}")]
    InvalidTarget { name: String, reason: String },

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Chain and router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    /// UniswapV2-style router used for swaps
    pub router_address: String,
    /// Pool swap fee in basis points (25 = PancakeSwap v2, 30 = Uniswap v2)
    pub fee_bps: u32,
    pub gas_limit: u64,
    pub request_timeout_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: "bsc".to_string(),
            chain_id: 56,
            rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            router_address: "0x10ED43C718714eb63d5aA57B78B54704E256024E".to_string(),
            fee_bps: 25,
            gas_limit: 350_000,
            request_timeout_ms: 10_000,
        }
    }
}

/// Pair watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
        }
    }
}

/// Trade executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// First-attempt multiplier over the network gas price
    pub start_gas_multiplier: f64,
    /// Added to the multiplier on every escalation
    pub gas_multiplier_step: f64,
    pub max_attempts: u32,
    pub confirmation_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    /// Router deadline, seconds after signing
    pub deadline_secs: u64,
    /// Absolute gas price ceiling
    pub max_gas_price_gwei: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            start_gas_multiplier: 1.2,
            gas_multiplier_step: 0.2,
            max_attempts: 5,
            confirmation_timeout_ms: 60_000,
            receipt_poll_interval_ms: 1_000,
            retry_backoff_ms: 1_000,
            deadline_secs: 300,
            max_gas_price_gwei: None,
        }
    }
}

/// Position ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("positions.db"),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    #[serde(skip_serializing)]
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub queue_capacity: usize,
    pub delivery_timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            telegram_chat_id: None,
            queue_capacity: 256,
            delivery_timeout_ms: 10_000,
        }
    }
}

impl NotifierConfig {
    /// Both token and chat id present
    pub fn telegram(&self) -> Option<(&str, &str)> {
        match (&self.telegram_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => {
                Some((token.as_str(), chat.as_str()))
            }
            _ => None,
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniperConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Signing key, provisioned through the environment only
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            chain: ChainConfig::default(),
            watcher: WatcherConfig::default(),
            executor: ExecutorConfig::default(),
            ledger: LedgerConfig::default(),
            notifier: NotifierConfig::default(),
            monitoring: MonitoringConfig::default(),
            private_key: None,
            targets: Vec::new(),
        }
    }
}

/// Convert a multiplier such as 1.2 into basis points (12000)
pub fn multiplier_bps(multiplier: f64) -> u32 {
    (multiplier * 10_000.0).round() as u32
}

impl SniperConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.as_ref().display(), e)))?;

        Self::from_toml(&content)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Load dotenv if available
        let _ = dotenv::dotenv();

        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("SNIPER_ENVIRONMENT") {
            self.environment = env;
        }

        if let Some(url) = lookup("RPC_URL") {
            self.chain.rpc_url = url;
        }

        if let Some(router) = lookup("ROUTER_ADDRESS") {
            self.chain.router_address = router;
        }

        if let Some(key) = lookup("PRIVATE_KEY") {
            self.private_key = Some(key);
        }

        if let Some(val) = lookup("GAS_MULTIPLIER") {
            self.executor.start_gas_multiplier = val
                .parse()
                .map_err(|_| ConfigError::EnvError(format!("GAS_MULTIPLIER '{}'", val)))?;
        }

        if let Some(val) = lookup("POLL_INTERVAL") {
            let secs: u64 = val
                .parse()
                .map_err(|_| ConfigError::EnvError(format!("POLL_INTERVAL '{}'", val)))?;
            self.watcher.poll_interval_ms = secs * 1_000;
        }

        if let Some(val) = lookup("SNIPER_MAX_ATTEMPTS") {
            self.executor.max_attempts = val
                .parse()
                .map_err(|_| ConfigError::EnvError(format!("SNIPER_MAX_ATTEMPTS '{}'", val)))?;
        }

        if let Some(path) = lookup("POSITIONS_FILE") {
            self.ledger.path = PathBuf::from(path);
        }

        if let Some(token) = lookup("TELEGRAM_TOKEN") {
            self.notifier.telegram_token = Some(token);
        }

        if let Some(chat) = lookup("TELEGRAM_CHAT_ID") {
            self.notifier.telegram_chat_id = Some(chat);
        }

        if let Some(level) = lookup("SNIPER_LOG_LEVEL") {
            self.monitoring.log_level = level;
        }

        Ok(())
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Validate everything except the private key, which only `run` needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::MissingRequired("chain.rpc_url".to_string()));
        }

        target::parse_address("chain.router_address", &self.chain.router_address)?;

        if self.chain.fee_bps >= 10_000 {
            return Err(ConfigError::InvalidValue("chain.fee_bps must be below 10000".to_string()));
        }

        if self.watcher.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("watcher.poll_interval_ms must be positive".to_string()));
        }

        let executor = &self.executor;
        if executor.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("executor.max_attempts must be positive".to_string()));
        }
        if executor.start_gas_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue("executor.start_gas_multiplier must be at least 1.0".to_string()));
        }
        if executor.gas_multiplier_step < 0.0 {
            return Err(ConfigError::InvalidValue("executor.gas_multiplier_step must not be negative".to_string()));
        }
        if executor.confirmation_timeout_ms == 0 || executor.receipt_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("executor confirmation timings must be positive".to_string()));
        }

        self.target_specs().map(|_| ())
    }

    /// Parse and validate every configured target
    pub fn target_specs(&self) -> Result<Vec<TargetSpec>, ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::MissingRequired("No targets configured".to_string()));
        }

        let specs = self
            .targets
            .iter()
            .map(TargetConfig::to_spec)
            .collect::<Result<Vec<_>, _>>()?;

        let start_bps = multiplier_bps(self.executor.start_gas_multiplier);
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.pair) {
                // The ledger keys on pair, so only one of these can ever trade
                tracing::warn!(
                    "Target '{}' shares pair {:?} with another target; at most one will execute",
                    spec.name,
                    spec.pair
                );
            }
            if start_bps > spec.max_gas_multiplier_bps {
                tracing::warn!(
                    "Target '{}': start gas multiplier {} exceeds its maximum, clamped to {}bps",
                    spec.name,
                    self.executor.start_gas_multiplier,
                    spec.max_gas_multiplier_bps
                );
            }
        }

        Ok(specs)
    }
}

/// Builder for SniperConfig
pub struct ConfigBuilder {
    config: SniperConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SniperConfig::default(),
        }
    }

    pub fn environment(mut self, env: &str) -> Self {
        self.config.environment = env.to_string();
        self
    }

    pub fn chain(mut self, chain: ChainConfig) -> Self {
        self.config.chain = chain;
        self
    }

    pub fn watcher(mut self, watcher: WatcherConfig) -> Self {
        self.config.watcher = watcher;
        self
    }

    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.config.executor = executor;
        self
    }

    pub fn private_key(mut self, key: &str) -> Self {
        self.config.private_key = Some(key.to_string());
        self
    }

    pub fn add_target(mut self, target: TargetConfig) -> Self {
        self.config.targets.push(target);
        self
    }

    pub fn build(self) -> SniperConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
