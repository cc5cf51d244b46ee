//! Client configuration via `canopy.toml`
//!
//! All settings have defaults; a missing file or an empty document yields
//! [`ClientConfig::default()`]. See [`ClientConfig::default_toml`] for the
//! annotated format.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::time::Duration;
use thiserror::Error;

/// Config file name conventionally used by host applications
pub const CONFIG_FILE_NAME: &str = "canopy.toml";

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry behavior for the ID allocator's optimistic loop
///
/// Attempt `n` (counting from 1) that loses its race waits
/// `min(base_delay_ms * 2^(n-1), max_delay_ms)` before querying again. With
/// `jitter`, the wait is drawn uniformly from `[0, that bound]`.
///
/// # Example
/// ```
/// use canopy_engine::RetryConfig;
///
/// let config = RetryConfig::default()
///     .with_max_attempts(10)
///     .with_base_delay_ms(2)
///     .with_max_delay_ms(50);
/// assert!(config.allows_attempt(10));
/// assert!(!config.allows_attempt(11));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts including the first (0 = unbounded)
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,
    /// Randomize each delay in `[0, bound]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            base_delay_ms: 1,
            max_delay_ms: 250,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry forever without waiting
    pub fn unbounded() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Set maximum number of attempts (0 = unbounded)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between attempts
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// True if attempt number `attempt` (counting from 1) may run
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Upper bound of the wait after losing attempt `attempt`
    pub fn delay_bound(&self, attempt: u32) -> Duration {
        // Cap the shift to prevent overflow
        let shift = attempt.saturating_sub(1).min(63);
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Wait to apply after losing attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let bound = self.delay_bound(attempt);
        if !self.jitter || bound.is_zero() {
            return bound;
        }
        let micros = bound.as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(0..=micros))
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// What the allocator does when the highest child key is not an integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedKeyPolicy {
    /// Re-read the whole node and use the largest non-negative integer key
    #[default]
    Skip,
    /// Fail the allocation with `MalformedKey`
    Fail,
}

/// Client configuration loaded from `canopy.toml`
///
/// # Example
///
/// ```toml
/// request_timeout_ms = 5000
/// malformed_keys = "skip"
///
/// [retry]
/// max_attempts = 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-request deadline in milliseconds (0 = none)
    pub request_timeout_ms: u64,
    /// Handling of non-integer keys during allocation
    pub malformed_keys: MalformedKeyPolicy,
    /// Deadline for a whole allocation in milliseconds (0 = none)
    pub allocation_deadline_ms: u64,
    /// Allocator retry behavior
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Per-request deadline, if enabled
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// Whole-allocation deadline, if enabled
    pub fn allocation_deadline(&self) -> Option<Duration> {
        (self.allocation_deadline_ms > 0).then(|| Duration::from_millis(self.allocation_deadline_ms))
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn from_file(path: &FsPath) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// The default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Canopy client configuration
#
# Per-request deadline in milliseconds. Requests still pending after this long
# fail with a timeout error. 0 disables deadlines.
request_timeout_ms = 0

# What ID allocation does when the highest child key is not an integer:
#   "skip" = ignore non-integer keys and allocate after the largest integer key
#   "fail" = fail the allocation with a malformed-key error
malformed_keys = "skip"

# Deadline for one allocation across all of its retries, in milliseconds.
# 0 disables the deadline.
allocation_deadline_ms = 0

[retry]
# Attempts per allocation including the first. 0 retries forever.
max_attempts = 64
# Exponential backoff between attempts, doubling from base up to max.
base_delay_ms = 1
max_delay_ms = 250
# Randomize each wait between zero and its bound.
jitter = true
"#
    }
}
