//! SMTP transport settings.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::shipper::ShipError;

pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;

/// Where and as whom to send artifacts.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub receiver: String,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("receiver", &self.receiver)
            .finish()
    }
}

/// `smtp.json` layout.
#[derive(Deserialize)]
struct SmtpFile {
    smtp_server: String,
    smtp_port: PortValue,
    smtp_username: String,
    smtp_password: String,
    receiver: String,
}

/// Ports appear both as numbers and as strings in hand-written files.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl SmtpConfig {
    /// Resolve from the process environment, falling back to `fallback_file`.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::MissingConfig`] when neither source is complete.
    pub fn resolve(fallback_file: &Path) -> Result<Self, ShipError> {
        Self::resolve_with(|name| std::env::var(name).ok(), fallback_file)
    }

    /// Resolve using `lookup` for environment variables.
    ///
    /// `SMTP_USERNAME` and `SMTP_PASSWORD` must both be set for the
    /// environment to win; server, port, and receiver then have defaults.
    ///
    /// # Errors
    ///
    /// See [`SmtpConfig::resolve`].
    pub fn resolve_with<F>(lookup: F, fallback_file: &Path) -> Result<Self, ShipError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let (Some(username), Some(password)) =
            (non_empty("SMTP_USERNAME"), non_empty("SMTP_PASSWORD"))
        {
            let port = match non_empty("SMTP_PORT") {
                Some(raw) => parse_port("SMTP_PORT", &raw)?,
                None => DEFAULT_SMTP_PORT,
            };
            let config = Self {
                server: non_empty("SMTP_SERVER").unwrap_or_else(|| DEFAULT_SMTP_SERVER.to_string()),
                port,
                receiver: non_empty("SMTP_RECEIVER").unwrap_or_else(|| username.clone()),
                username,
                password,
            };
            info!(server = %config.server, port = config.port, "SMTP settings loaded from environment variables");
            return Ok(config);
        }

        let config = Self::from_file(fallback_file)?;
        info!(path = %fallback_file.display(), server = %config.server, "SMTP settings loaded from file");
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ShipError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ShipError::MissingConfig {
                    path: path.to_path_buf(),
                }
            } else {
                ShipError::Io {
                    context: format!("failed to read {}", path.display()),
                    source: e,
                }
            }
        })?;
        let file: SmtpFile = serde_json::from_str(&raw).map_err(|e| ShipError::InvalidConfig {
            path: PathBuf::from(path),
            message: e.to_string(),
        })?;
        let port = match file.smtp_port {
            PortValue::Number(port) => port,
            PortValue::Text(raw) => parse_port("smtp_port", &raw)?,
        };
        Ok(Self {
            server: file.smtp_server,
            port,
            username: file.smtp_username,
            password: file.smtp_password,
            receiver: file.receiver,
        })
    }

    /// Port 465 speaks TLS from the first byte; anything else upgrades with STARTTLS.
    #[must_use]
    pub fn implicit_tls(&self) -> bool {
        self.port == DEFAULT_SMTP_PORT
    }
}

fn parse_port(name: &str, raw: &str) -> Result<u16, ShipError> {
    raw.trim().parse().map_err(|_| ShipError::InvalidPort {
        name: name.to_string(),
        value: raw.to_string(),
    })
}
