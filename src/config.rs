use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::constants::{files, DEFAULT_ASSET_EXTENSIONS, DEFAULT_LOGIN_URL, DEFAULT_TARGET_URL};
use crate::poller::PollSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// When the poll window opens, in portal local time (UTC+3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// A time of day on the current portal-local date.
    TimeToday(NaiveTime),
    /// A full portal-local date and time.
    DateTime(NaiveDateTime),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Portal
    pub login_url: String,
    pub target_url: String,

    // Schedule
    pub start_at: Option<StartAt>,
    pub start_delay: Option<Duration>,

    // Poll window
    pub poll_window: Duration,
    pub poll_interval: Duration,
    pub min_successes: u32,
    pub max_attempts: u32,
    pub max_storage_failures: u32,

    // Assets
    pub extract_assets: bool,
    pub asset_extensions: Vec<String>,

    // Browser
    pub page_timeout: Duration,
    pub login_grace: Duration,
    pub chrome_path: Option<String>,

    // Output
    pub output_dir: PathBuf,
    pub save_home_page: bool,

    // Shipping
    pub ship_artifacts: bool,
    pub archive_name: String,

    // Fallback files
    pub credentials_file: PathBuf,
    pub smtp_config_file: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Portal
            login_url: env_or_default("PORTAL_LOGIN_URL", DEFAULT_LOGIN_URL),
            target_url: env_or_default("PORTAL_TARGET_URL", DEFAULT_TARGET_URL),

            // Schedule
            start_at: optional_env("START_AT")
                .map(|v| parse_start_at(&v))
                .transpose()?,
            start_delay: optional_env("START_DELAY_SECS")
                .map(|_| parse_env_u64("START_DELAY_SECS", 0).map(Duration::from_secs))
                .transpose()?,

            // Poll window
            poll_window: Duration::from_secs(parse_env_u64("POLL_WINDOW_SECS", 60)?),
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 5)?),
            min_successes: parse_env_u32("POLL_MIN_SUCCESSES", 12)?,
            max_attempts: parse_env_u32("POLL_MAX_ATTEMPTS", 20)?,
            max_storage_failures: parse_env_u32("MAX_STORAGE_FAILURES", 3)?,

            // Assets
            extract_assets: parse_env_bool("EXTRACT_ASSETS", true)?,
            asset_extensions: optional_env("ASSET_EXTENSIONS").map_or_else(
                || {
                    DEFAULT_ASSET_EXTENSIONS
                        .iter()
                        .map(|e| (*e).to_string())
                        .collect()
                },
                |v| parse_extension_list(&v),
            ),

            // Browser
            page_timeout: Duration::from_secs(parse_env_u64("PAGE_TIMEOUT_SECS", 30)?),
            login_grace: Duration::from_millis(parse_env_u64("LOGIN_GRACE_MS", 2000)?),
            chrome_path: optional_env("CHROME_PATH"),

            // Output
            output_dir: PathBuf::from(env_or_default("OUTPUT_DIR", ".")),
            save_home_page: parse_env_bool("SAVE_HOME_PAGE", true)?,

            // Shipping
            ship_artifacts: parse_env_bool("SHIP_ARTIFACTS", false)?,
            archive_name: env_or_default("ARCHIVE_NAME", files::DEFAULT_ARCHIVE_NAME),

            // Fallback files
            credentials_file: PathBuf::from(env_or_default("CREDENTIALS_FILE", "credentials.json")),
            smtp_config_file: PathBuf::from(env_or_default("SMTP_CONFIG_FILE", "smtp.json")),
        })
    }

    /// A configuration with defaults and local paths, for tests.
    #[doc(hidden)]
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            login_url: "http://127.0.0.1/Account/Login.aspx".to_string(),
            target_url: "http://127.0.0.1/Applications.aspx".to_string(),
            start_at: None,
            start_delay: None,
            poll_window: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            min_successes: 5,
            max_attempts: 10,
            max_storage_failures: 3,
            extract_assets: false,
            asset_extensions: DEFAULT_ASSET_EXTENSIONS
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            page_timeout: Duration::from_secs(5),
            login_grace: Duration::ZERO,
            chrome_path: None,
            output_dir: PathBuf::from("."),
            save_home_page: false,
            ship_artifacts: false,
            archive_name: files::DEFAULT_ARCHIVE_NAME.to_string(),
            credentials_file: PathBuf::from("credentials.json"),
            smtp_config_file: PathBuf::from("smtp.json"),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("PORTAL_LOGIN_URL", &self.login_url),
            ("PORTAL_TARGET_URL", &self.target_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("'{value}' is not an absolute URL: {e}"),
                });
            }
        }
        if self.poll_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "POLL_WINDOW_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.min_successes == 0 {
            return Err(ConfigError::InvalidValue {
                name: "POLL_MIN_SUCCESSES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "POLL_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_storage_failures == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_STORAGE_FAILURES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.extract_assets && self.asset_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ASSET_EXTENSIONS".to_string(),
                message: "cannot be empty when EXTRACT_ASSETS is enabled".to_string(),
            });
        }
        if self.archive_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVE_NAME".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Poll loop parameters derived from this configuration.
    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            window: self.poll_window,
            interval: self.poll_interval,
            min_successes: self.min_successes,
            max_attempts: self.max_attempts,
            max_consecutive_storage_failures: self.max_storage_failures,
            extract_assets: self.extract_assets,
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

/// Parse `START_AT` as either a time of day or a full date and time.
fn parse_start_at(value: &str) -> Result<StartAt, ConfigError> {
    let value = value.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(StartAt::DateTime(dt));
        }
    }
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(value, fmt) {
            return Ok(StartAt::TimeToday(t));
        }
    }
    Err(ConfigError::InvalidValue {
        name: "START_AT".to_string(),
        message: format!("expected 'HH:MM[:SS]' or 'YYYY-MM-DD HH:MM[:SS]', got '{value}'"),
    })
}

/// Split a comma separated extension list, normalizing case and dropping leading dots.
fn parse_extension_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
