//! Configuration management for Helmi
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable overrides.

use crate::consumption::Resolution;
use crate::error::{HelmiError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account credentials for the identity endpoint
    pub account: AccountConfig,

    /// Which customer and metering point to poll
    pub meter: MeterConfig,

    /// Upstream endpoints
    pub api: ApiConfig,

    /// Transport retry policy
    pub retry: RetryConfig,

    /// Poll schedule and totalizer settings
    pub polling: PollingConfig,

    /// State file location
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Reference zone used to interpret offset-less timestamps and to
    /// bucket points into calendar days
    pub timezone: String,
}

/// Account credentials. Never written back to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccountConfig {
    /// Login email
    pub email: String,

    /// Login password
    #[serde(skip_serializing)]
    pub password: String,
}

/// Metering point selection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MeterConfig {
    /// Provider customer id (e.g. `jes_123`)
    pub customer_id: String,

    /// Provider metering point id (e.g. `FI_JSE000_111`)
    pub metering_point_id: String,
}

/// Upstream endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Cognito identity endpoint
    pub identity_endpoint: String,

    /// Cognito app client id
    pub identity_client_id: String,

    /// Metering API base URL
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
}

/// Transport retry policy for 429/5xx and network failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per request, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt
    pub base_delay_ms: u64,
}

/// Poll schedule and totalizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Length of the re-fetched window in hours
    pub window_hours: u32,

    /// Minute of every hour at which a poll runs
    pub update_minute: u32,

    /// Hour of day after which yesterday is committed to the daily total
    pub cutoff_hour: u32,

    /// The hourly sensor turns unavailable when its latest point is older
    pub stale_hours: u32,

    /// Aggregation interval requested from the API
    pub resolution: Resolution,
}

/// State file location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Path of the JSON state document
    pub state_file: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,

    /// Number of rotated files to keep
    pub backup_count: u32,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = ["helmi.yaml", "/data/helmi.yaml", "/etc/helmi/config.yaml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Override credentials and meter selection from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("JSE_EMAIL") {
            self.account.email = v;
        }
        if let Some(v) = get("JSE_PASSWORD") {
            self.account.password = v;
        }
        if let Some(v) = get("JSE_CUSTOMER_ID") {
            self.meter.customer_id = v;
        }
        if let Some(v) = get("JSE_METERING_POINT_ID") {
            self.meter.metering_point_id = v;
        }
    }

    /// Resolve the configured reference zone
    pub fn reference_zone(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            HelmiError::validation("timezone", format!("unknown zone {}", self.timezone))
        })
    }

    /// Require credentials to be present
    pub fn require_credentials(&self) -> Result<()> {
        if self.account.email.trim().is_empty() {
            return Err(HelmiError::config(
                "Missing account email (set account.email or JSE_EMAIL)",
            ));
        }
        if self.account.password.is_empty() {
            return Err(HelmiError::config(
                "Missing account password (set account.password or JSE_PASSWORD)",
            ));
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(HelmiError::validation("api.base_url", "Cannot be empty"));
        }

        if self.api.identity_endpoint.trim().is_empty() {
            return Err(HelmiError::validation(
                "api.identity_endpoint",
                "Cannot be empty",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(HelmiError::validation(
                "retry.max_attempts",
                "Must be greater than 0",
            ));
        }

        if self.polling.update_minute > 59 {
            return Err(HelmiError::validation(
                "polling.update_minute",
                "Must be within 0..=59",
            ));
        }

        if self.polling.cutoff_hour > 23 {
            return Err(HelmiError::validation(
                "polling.cutoff_hour",
                "Must be within 0..=23",
            ));
        }

        // Every poll after the cutoff must still see all of yesterday
        let min_window = 24 + self.polling.cutoff_hour;
        if self.polling.window_hours < min_window {
            return Err(HelmiError::validation(
                "polling.window_hours",
                format!("Must be at least {min_window} (24 + polling.cutoff_hour)"),
            ));
        }

        if !(1..=24).contains(&self.polling.stale_hours) {
            return Err(HelmiError::validation(
                "polling.stale_hours",
                "Must be within 1..=24",
            ));
        }

        self.reference_zone()?;

        Ok(())
    }
}
