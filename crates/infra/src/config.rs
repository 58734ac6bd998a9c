//! Configuration loading and representation.
//!
//! Every setting has a default and an environment override. Loaders take a
//! lookup function so the same parsing runs against `std::env` in a host and
//! against a map in tests.

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kasir_observability::LogFormat;
use kasir_sales::{BusinessCalendar, CodeGenerator};

pub const ENV_CODE_PREFIX: &str = "KASIR_SALE_CODE_PREFIX";
pub const ENV_BUSINESS_UTC_OFFSET: &str = "KASIR_BUSINESS_UTC_OFFSET";
pub const ENV_MAX_ATTEMPTS: &str = "KASIR_SALE_MAX_ATTEMPTS";
pub const ENV_RETRY_BACKOFF_MS: &str = "KASIR_SALE_RETRY_BACKOFF_MS";
pub const ENV_TIMEOUT_MS: &str = "KASIR_SALE_TIMEOUT_MS";
pub const ENV_DATABASE_URL: &str = "KASIR_DATABASE_URL";
pub const ENV_DB_MAX_CONNECTIONS: &str = "KASIR_DB_MAX_CONNECTIONS";
pub const ENV_LOG_FORMAT: &str = "KASIR_LOG_FORMAT";

/// Configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// A fixed UTC offset written as `+HH:MM` / `-HH:MM` (also `+HHMM`, `+HH`, `Z`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UtcOffset(FixedOffset);

impl UtcOffset {
    /// Western Indonesia Time, the default business zone.
    pub fn wib() -> Self {
        Self(FixedOffset::east_opt(7 * 3600).unwrap_or_else(|| Utc.fix()))
    }

    pub fn as_fixed(&self) -> FixedOffset {
        self.0
    }
}

impl Default for UtcOffset {
    fn default() -> Self {
        Self::wib()
    }
}

impl From<FixedOffset> for UtcOffset {
    fn from(value: FixedOffset) -> Self {
        Self(value)
    }
}

impl fmt::Display for UtcOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.local_minus_utc();
        let sign = if secs < 0 { '-' } else { '+' };
        let secs = secs.unsigned_abs();
        write!(f, "{sign}{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed UTC offset {0:?}")]
pub struct ParseUtcOffsetError(String);

impl FromStr for UtcOffset {
    type Err = ParseUtcOffsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseUtcOffsetError(s.to_string());
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
            return Ok(Self(Utc.fix()));
        }

        let (sign, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => return Err(err()),
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let (hours, minutes) = match digits.len() {
            2 => (&digits[..2], "0"),
            4 => (&digits[..2], &digits[2..]),
            _ => return Err(err()),
        };
        let hours: i32 = hours.parse().map_err(|_| err())?;
        let minutes: i32 = minutes.parse().map_err(|_| err())?;
        if hours > 23 || minutes > 59 {
            return Err(err());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self)
            .ok_or_else(err)
    }
}

impl TryFrom<String> for UtcOffset {
    type Error = ParseUtcOffsetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UtcOffset> for String {
    fn from(value: UtcOffset) -> Self {
        value.to_string()
    }
}

/// Sale engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Leading segment of every sale code.
    pub code_prefix: String,
    /// Offset that defines the business day used for code sequencing.
    pub business_utc_offset: UtcOffset,
    /// Attempts per submission when the store reports a conflict.
    pub max_attempts: u32,
    /// Linear backoff unit between attempts.
    pub retry_backoff_ms: u64,
    /// Upper bound for a single attempt, in milliseconds.
    pub transaction_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code_prefix: "MP".to_string(),
            business_utc_offset: UtcOffset::default(),
            max_attempts: 5,
            retry_backoff_ms: 10,
            transaction_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            code_prefix: lookup(ENV_CODE_PREFIX)
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.code_prefix),
            business_utc_offset: parse_or(&lookup, ENV_BUSINESS_UTC_OFFSET, defaults.business_utc_offset)?,
            max_attempts: parse_or(&lookup, ENV_MAX_ATTEMPTS, defaults.max_attempts)?,
            retry_backoff_ms: parse_or(&lookup, ENV_RETRY_BACKOFF_MS, defaults.retry_backoff_ms)?,
            transaction_timeout_ms: parse_or(&lookup, ENV_TIMEOUT_MS, defaults.transaction_timeout_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(ENV_MAX_ATTEMPTS, "0", "must be at least 1"));
        }
        if self.transaction_timeout_ms == 0 {
            return Err(ConfigError::invalid(ENV_TIMEOUT_MS, "0", "must be at least 1"));
        }
        self.code_generator().map(|_| ())
    }

    pub fn calendar(&self) -> BusinessCalendar {
        BusinessCalendar::new(self.business_utc_offset.as_fixed())
    }

    pub fn code_generator(&self) -> Result<CodeGenerator, ConfigError> {
        CodeGenerator::new(&self.code_prefix, self.calendar())
            .map_err(|e| ConfigError::invalid(ENV_CODE_PREFIX, self.code_prefix.clone(), e))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

/// SQLite store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://kasir.db".to_string(),
            max_connections: 4,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            database_url: lookup(ENV_DATABASE_URL).unwrap_or(defaults.database_url),
            max_connections: parse_or(&lookup, ENV_DB_MAX_CONNECTIONS, defaults.max_connections)?,
        };
        if config.database_url.trim().is_empty() {
            return Err(ConfigError::invalid(ENV_DATABASE_URL, "", "must not be empty"));
        }
        if config.max_connections == 0 {
            return Err(ConfigError::invalid(ENV_DB_MAX_CONNECTIONS, "0", "must be at least 1"));
        }
        Ok(config)
    }

    /// Whether the URL names a private in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

/// Full process configuration for a host embedding the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KasirConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub log_format: LogFormat,
}

impl KasirConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            engine: EngineConfig::from_lookup(&lookup)?,
            store: StoreConfig::from_lookup(&lookup)?,
            log_format: parse_or(&lookup, ENV_LOG_FORMAT, LogFormat::default())?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid(key, raw.clone(), e)),
        None => Ok(default),
    }
}
