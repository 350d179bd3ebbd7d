//! Main configuration module for lightwire
//!
//! Every recognized option of the retrieval stack is defined here and read
//! from one `lightwire.toml` file.

use crate::error::{ConfigError, ConfigResult};
use lightwire_core::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Light protocol versions this node can speak.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[2];

/// Main configuration struct containing all lightwire settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connected server limits and trusted allowlist
    pub peers: PeersConfig,

    /// Candidate pool and dialing
    pub pool: PoolConfig,

    /// Per-request timeout and retries
    pub request: RequestConfig,

    /// Reputation score bounds and steps
    pub reputation: ReputationConfig,

    /// Confirmation registry reader
    pub cross: CrossConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use lightwire_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::load(Path::new("lightwire.toml"))?;
    /// ```
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)?;

        debug!("Configuration parsed successfully, validating...");
        config.validate()?;

        info!(
            light_peers = config.peers.light_peers,
            trusted = config.peers.trusted.len(),
            timeout_ms = config.request.timeout_ms,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.peers.validate()?;
        self.pool.validate()?;
        self.request.validate()?;
        self.reputation.validate()?;
        self.cross.validate()?;
        self.logging.validate()?;

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

// =============================================================================
// Peers Configuration
// =============================================================================

/// Connected server limits and the trusted allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Maximum number of concurrently connected light servers
    pub light_peers: usize,

    /// Trusted server identities (base58)
    pub trusted: Vec<String>,

    /// Minimum fraction of known servers that must be trusted before answers
    /// from untrusted servers are accepted. Unset disables the policy.
    pub min_trusted_fraction: Option<f64>,

    /// In-flight cap for a server that announced no capacity
    pub default_capacity: usize,

    /// Light protocol version used for discovery
    pub protocol_version: u32,
}

impl PeersConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.light_peers == 0 {
            return Err(ConfigError::ZeroCount {
                name: "light_peers",
            });
        }
        if self.default_capacity == 0 {
            return Err(ConfigError::ZeroCount {
                name: "default_capacity",
            });
        }
        if let Some(fraction) = self.min_trusted_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(ConfigError::InvalidFraction {
                    name: "min_trusted_fraction",
                    value: fraction,
                });
            }
        }
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&self.protocol_version) {
            return Err(ConfigError::UnsupportedProtocolVersion(
                self.protocol_version,
            ));
        }
        self.trusted_ids()?;
        Ok(())
    }

    /// Parse the trusted allowlist.
    pub fn trusted_ids(&self) -> ConfigResult<Vec<PeerId>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(self.trusted.len());
        for raw in &self.trusted {
            let id = PeerId::from_base58(raw)
                .map_err(|_| ConfigError::InvalidPeerId(raw.clone()))?;
            if !seen.insert(id.clone()) {
                return Err(ConfigError::DuplicatePeerId(raw.clone()));
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Whether the trusted-only (ultra-light) policy is active.
    pub fn is_ultra_light(&self) -> bool {
        !self.trusted.is_empty() && self.min_trusted_fraction.is_some()
    }
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            light_peers: 100,
            trusted: Vec::new(),
            min_trusted_fraction: None,
            default_capacity: 4,
            protocol_version: 2,
        }
    }
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Candidate pool, dial concurrency and backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of known candidates before the worst is evicted
    pub max_candidates: usize,

    /// Maximum number of dials in progress at once
    pub dial_concurrency: usize,

    /// Interval between dial/discovery rounds in milliseconds
    pub dial_interval_ms: u64,

    /// First retry delay after a failed dial in milliseconds
    pub backoff_base_ms: u64,

    /// Upper bound for the retry delay in milliseconds
    pub backoff_max_ms: u64,

    /// Consecutive dial failures after which a candidate is dropped
    pub max_dial_failures: u32,

    /// Persisted reputation table (JSON). Unset keeps scores in memory only.
    pub reputation_path: Option<PathBuf>,
}

impl PoolConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_candidates == 0 {
            return Err(ConfigError::ZeroCount {
                name: "max_candidates",
            });
        }
        if self.dial_concurrency == 0 {
            return Err(ConfigError::ZeroCount {
                name: "dial_concurrency",
            });
        }
        if self.max_dial_failures == 0 {
            return Err(ConfigError::ZeroCount {
                name: "max_dial_failures",
            });
        }
        if self.dial_interval_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "dial_interval_ms",
                value: 0,
            });
        }
        if self.backoff_base_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "backoff_base_ms",
                value: 0,
            });
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::InvalidBackoff {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        Ok(())
    }

    /// Dial round interval.
    pub fn dial_interval(&self) -> Duration {
        Duration::from_millis(self.dial_interval_ms)
    }

    /// Backoff after `failures` consecutive dial failures: base * 2^(failures-1), capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(32);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_candidates: 200,
            dial_concurrency: 4,
            dial_interval_ms: 1_000,
            backoff_base_ms: 2_000,
            backoff_max_ms: 300_000,
            max_dial_failures: 8,
            reputation_path: None,
        }
    }
}

// =============================================================================
// Request Configuration
// =============================================================================

/// Per-request timeout and retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Default deadline for one retrieval in milliseconds
    pub timeout_ms: u64,

    /// Maximum peers asked per retrieval. Unset uses the number of currently
    /// known eligible peers.
    pub max_retries: Option<usize>,
}

impl RequestConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "timeout_ms",
                value: 0,
            });
        }
        if self.max_retries == Some(0) {
            return Err(ConfigError::ZeroCount {
                name: "max_retries",
            });
        }
        Ok(())
    }

    /// Default retrieval timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: None,
        }
    }
}

// =============================================================================
// Reputation Configuration
// =============================================================================

/// Reputation score bounds and adjustment steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Score floor
    pub min: f64,
    /// Score ceiling
    pub max: f64,
    /// Neutral score given to unknown peers
    pub initial: f64,
    /// Added on a valid answer
    pub success_reward: f64,
    /// Subtracted when a peer does not answer in time
    pub timeout_penalty: f64,
    /// Subtracted when a peer's answer fails validation
    pub invalid_penalty: f64,
    /// Distance moved toward neutral on each maintenance tick
    pub decay_per_tick: f64,
}

impl ReputationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.min < self.initial && self.initial < self.max) {
            return Err(ConfigError::InvalidScoreBounds {
                min: self.min,
                initial: self.initial,
                max: self.max,
            });
        }
        for (name, value) in [
            ("success_reward", self.success_reward),
            ("timeout_penalty", self.timeout_penalty),
            ("invalid_penalty", self.invalid_penalty),
        ] {
            if value <= 0.0 || value.is_nan() {
                return Err(ConfigError::InvalidScoreStep { name, value });
            }
        }
        if self.decay_per_tick < 0.0 || self.decay_per_tick.is_nan() {
            return Err(ConfigError::InvalidScoreStep {
                name: "decay_per_tick",
                value: self.decay_per_tick,
            });
        }
        if self.invalid_penalty <= self.timeout_penalty {
            return Err(ConfigError::PenaltyOrder {
                timeout: self.timeout_penalty,
                invalid: self.invalid_penalty,
            });
        }
        Ok(())
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 100.0,
            initial: 50.0,
            success_reward: 1.0,
            timeout_penalty: 5.0,
            invalid_penalty: 20.0,
            decay_per_tick: 0.1,
        }
    }
}

// =============================================================================
// Cross Configuration
// =============================================================================

/// Confirmation registry reader limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossConfig {
    /// Largest contract-reported list length that will be paginated
    pub max_pagination_length: u64,
}

impl CrossConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_pagination_length == 0 {
            return Err(ConfigError::ZeroCount {
                name: "max_pagination_length",
            });
        }
        Ok(())
    }
}

impl Default for CrossConfig {
    fn default() -> Self {
        Self {
            max_pagination_length: 65_536,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }

    /// Whether JSON output is selected.
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
