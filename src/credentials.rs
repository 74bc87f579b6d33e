//! Portal credential loading.
//!
//! Credentials come from `PIS_USERNAME` / `PIS_PASSWORD`, optionally
//! overridden by base64-encoded `PIS_USERNAME_B64` / `PIS_PASSWORD_B64`
//! for values the shell cannot carry verbatim, and otherwise from a JSON
//! file with `username` and `password` fields.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(
        "credentials not found: set PIS_USERNAME/PIS_PASSWORD or create {}",
        path.display()
    )]
    CredentialsMissing { path: PathBuf },
    #[error("{name} is not valid base64-encoded UTF-8: {message}")]
    InvalidBase64 { name: String, message: String },
    #[error("failed to read credentials file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credentials file {} is malformed: {source}", path.display())]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where a credential pair was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    Environment,
    File,
}

/// Portal login credentials. Immutable once loaded.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Load credentials from the process environment, falling back to `fallback_file`.
///
/// # Errors
///
/// Returns [`CredentialError::CredentialsMissing`] when neither source yields a
/// complete pair, or a decoding error when a present source is malformed.
pub fn load_credentials(fallback_file: &Path) -> Result<Credentials, CredentialError> {
    load_credentials_with(|name| std::env::var(name).ok(), fallback_file)
        .map(|(credentials, _)| credentials)
}

/// Load credentials using `lookup` for environment variables.
///
/// Environment values take precedence over the file whenever both the
/// username and the password resolve from the environment.
///
/// # Errors
///
/// See [`load_credentials`].
pub fn load_credentials_with<F>(
    lookup: F,
    fallback_file: &Path,
) -> Result<(Credentials, CredentialOrigin), CredentialError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

    let mut username = non_empty("PIS_USERNAME");
    let mut password = non_empty("PIS_PASSWORD");

    if let Some(encoded) = non_empty("PIS_USERNAME_B64") {
        username = Some(decode_b64("PIS_USERNAME_B64", &encoded)?);
    }
    if let Some(encoded) = non_empty("PIS_PASSWORD_B64") {
        password = Some(decode_b64("PIS_PASSWORD_B64", &encoded)?);
    }

    if let (Some(username), Some(password)) = (username, password) {
        info!("Credentials loaded from environment variables");
        return Ok((Credentials { username, password }, CredentialOrigin::Environment));
    }

    debug!(path = %fallback_file.display(), "Environment credentials incomplete, trying file");
    let credentials = read_credentials_file(fallback_file)?;
    info!(path = %fallback_file.display(), "Credentials loaded from file");
    Ok((credentials, CredentialOrigin::File))
}

fn read_credentials_file(path: &Path) -> Result<Credentials, CredentialError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CredentialError::CredentialsMissing {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(CredentialError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let credentials: Credentials =
        serde_json::from_str(&raw).map_err(|e| CredentialError::InvalidFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    if credentials.username.is_empty() || credentials.password.is_empty() {
        return Err(CredentialError::CredentialsMissing {
            path: path.to_path_buf(),
        });
    }
    Ok(credentials)
}

fn decode_b64(name: &str, encoded: &str) -> Result<String, CredentialError> {
    let invalid = |message: String| CredentialError::InvalidBase64 {
        name: name.to_string(),
        message,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| invalid(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
}
