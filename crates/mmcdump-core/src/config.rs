//! Run configuration.
//!
//! Every field has a default matching the stock hardware setup, so an empty
//! (or absent) TOML file is a valid configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifying string the bridge reports as its product description.
pub const DEFAULT_DEVICE_ID: &str = "USB FIFO";

/// Delay between failed acquire attempts.
pub const DEFAULT_ACQUIRE_BACKOFF_MS: u64 = 2000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device_id must not be empty")]
    EmptyDeviceId,
    #[error("{field} divisor {value} is invalid: must be even, between 2 and 65534")]
    InvalidDivisor { field: &'static str, value: u16 },
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("exponential backoff factor must be at least 1")]
    ZeroBackoffFactor,
    #[error("{field} must be at least 1")]
    ZeroPollLimit { field: &'static str },
}

/// Top-level configuration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumperConfig {
    /// Product string used to find the bridge.
    pub device_id: String,
    /// How the dump controller waits for the bridge.
    pub acquire: AcquirePolicy,
    /// Switch to the low-frequency clock after this many consecutive
    /// failures without progress. `None` never switches.
    pub escalate_low_freq_after: Option<u32>,
    /// Treat a failed standalone card initialization as fatal.
    pub strict_init: bool,
    /// Stop the dump before this cluster.
    pub end_cluster: Option<u32>,
    pub bridge: BridgeSettings,
    pub card: CardSettings,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            acquire: AcquirePolicy::default(),
            escalate_low_freq_after: None,
            strict_init: false,
            end_cluster: None,
            bridge: BridgeSettings::default(),
            card: CardSettings::default(),
        }
    }
}

impl DumperConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DumperConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }
        if self.acquire.max_attempts == Some(0) {
            return Err(ConfigError::ZeroAttempts);
        }
        if let BackoffCurve::Exponential { factor: 0, .. } = self.acquire.curve {
            return Err(ConfigError::ZeroBackoffFactor);
        }
        for (field, value) in [
            ("init", self.card.init_divisor),
            ("transfer", self.card.transfer_divisor),
            ("low_freq", self.card.low_freq_divisor),
        ] {
            if value < 2 || value % 2 != 0 {
                return Err(ConfigError::InvalidDivisor { field, value });
            }
        }
        if self.card.op_cond_attempts == 0 {
            return Err(ConfigError::ZeroPollLimit {
                field: "op_cond_attempts",
            });
        }
        if self.card.token_poll_limit == 0 {
            return Err(ConfigError::ZeroPollLimit {
                field: "token_poll_limit",
            });
        }
        Ok(())
    }
}

/// Shape of the delay between failed acquire attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffCurve {
    /// Always `backoff_ms`.
    Fixed,
    /// `backoff_ms * factor^(n-1)`, capped at `max_ms`.
    Exponential { factor: u32, max_ms: u64 },
}

/// Retry policy for acquiring the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquirePolicy {
    pub backoff_ms: u64,
    /// Give up after this many failed attempts. `None` waits forever.
    pub max_attempts: Option<u32>,
    pub curve: BackoffCurve,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_ACQUIRE_BACKOFF_MS,
            max_attempts: None,
            curve: BackoffCurve::Fixed,
        }
    }
}

impl AcquirePolicy {
    /// Delay after the `failures`-th consecutive failed attempt (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let ms = match self.curve {
            BackoffCurve::Fixed => self.backoff_ms,
            BackoffCurve::Exponential { factor, max_ms } => {
                let exp = failures.saturating_sub(1);
                let scale = u64::from(factor).saturating_pow(exp);
                self.backoff_ms.saturating_mul(scale).min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }

    /// Whether another attempt is allowed after `failures` failed ones.
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}

/// Bridge-side USB settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Bridge channel (0 = A).
    pub interface: u8,
    /// Latency timer in milliseconds.
    pub latency_ms: u8,
    /// Timeout for a single USB transfer.
    pub usb_timeout_ms: u64,
    /// Strap pulse that puts the target into dumpable mode.
    pub dumpable_strap: GpioStrap,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            interface: 0,
            latency_ms: 2,
            usb_timeout_ms: 5000,
            dumpable_strap: GpioStrap::default(),
        }
    }
}

impl BridgeSettings {
    pub fn usb_timeout(&self) -> Duration {
        Duration::from_millis(self.usb_timeout_ms)
    }
}

/// Levels driven on the high GPIO byte (ACBUS) for a fixed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioStrap {
    /// Pins driven during the pulse.
    pub mask: u8,
    /// Levels of the driven pins.
    pub level: u8,
    pub hold_ms: u64,
}

impl Default for GpioStrap {
    fn default() -> Self {
        Self {
            mask: 0x01,
            level: 0x00,
            hold_ms: 500,
        }
    }
}

/// Card clocking and polling limits. Divisors give a clock of
/// 60 MHz / divisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSettings {
    /// Identification clock (must stay at or below 400 kHz).
    pub init_divisor: u16,
    pub transfer_divisor: u16,
    /// Fallback clock for marginal links.
    pub low_freq_divisor: u16,
    pub op_cond_attempts: u32,
    /// Polls of 8 bytes each while waiting for a data token.
    pub token_poll_limit: u32,
}

impl Default for CardSettings {
    fn default() -> Self {
        Self {
            init_divisor: 150,
            transfer_divisor: 12,
            low_freq_divisor: 120,
            op_cond_attempts: 1000,
            token_poll_limit: 1000,
        }
    }
}
