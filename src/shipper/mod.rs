//! Optional delivery of captured snapshots by email.
//!
//! The shipper zips the given files (reusing an existing archive of the same
//! name), then sends the archive as a single attachment over authenticated
//! SMTP. Shipping is best-effort: it makes one attempt and reports failure
//! without affecting the outcome of the run.

pub mod archive;
pub mod smtp;

use std::path::{Path, PathBuf};

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{error, info};

pub use archive::{build_archive, run_archive_path, ArchiveStatus};
pub use smtp::SmtpConfig;

pub const MESSAGE_SUBJECT: &str = "PIS-GR Scraper Artifacts";
const TEST_SUBJECT: &str = "PIS-GR Scraper SMTP Test";

#[derive(Debug, Error)]
pub enum ShipError {
    #[error("no SMTP settings in the environment and {path} not found")]
    MissingConfig { path: PathBuf },

    #[error("invalid SMTP settings file {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("invalid SMTP port in {name}: {value:?}")]
    InvalidPort { name: String, value: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("invalid mailbox: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// What a successful shipment did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipReport {
    pub archive: PathBuf,
    pub archive_status: ArchiveStatus,
    pub receiver: String,
}

/// Zips and emails run artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactShipper {
    archive_path: PathBuf,
    smtp_config_file: PathBuf,
}

impl ArtifactShipper {
    #[must_use]
    pub fn new(archive_path: impl Into<PathBuf>, smtp_config_file: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            smtp_config_file: smtp_config_file.into(),
        }
    }

    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Ship `files`, logging any failure. Returns whether the run's artifacts
    /// are considered delivered.
    pub async fn ship(&self, files: &[PathBuf]) -> bool {
        if files.is_empty() {
            info!("No artifacts to ship");
            return true;
        }
        match self.try_ship(files).await {
            Ok(report) => {
                info!(
                    archive = %report.archive.display(),
                    receiver = %report.receiver,
                    "Artifacts shipped"
                );
                true
            }
            Err(e) => {
                error!("Shipping artifacts failed: {e}");
                false
            }
        }
    }

    /// Build the archive and send it in one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be built, SMTP settings are
    /// missing, or delivery fails.
    pub async fn try_ship(&self, files: &[PathBuf]) -> Result<ShipReport, ShipError> {
        let archive_status = build_archive(&self.archive_path, files).await?;
        let config = SmtpConfig::resolve(&self.smtp_config_file)?;

        let bytes = tokio::fs::read(&self.archive_path)
            .await
            .map_err(|source| ShipError::Io {
                context: format!("failed to read {}", self.archive_path.display()),
                source,
            })?;
        let attachment_name = self
            .archive_path
            .file_name()
            .map_or_else(|| "artifacts.zip".to_string(), |n| n.to_string_lossy().into_owned());

        let body = format!(
            "Attached are {} HTML file(s) captured by the scraper.",
            files.len()
        );
        let message = Message::builder()
            .from(config.username.parse::<Mailbox>()?)
            .to(config.receiver.parse::<Mailbox>()?)
            .subject(MESSAGE_SUBJECT)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(
                        Attachment::new(attachment_name).body(bytes, zip_content_type()),
                    ),
            )?;

        info!(
            server = %config.server,
            port = config.port,
            receiver = %config.receiver,
            "Sending artifacts"
        );
        transport(&config)?.send(message).await?;

        Ok(ShipReport {
            archive: self.archive_path.clone(),
            archive_status,
            receiver: config.receiver,
        })
    }

    /// Send a short plain-text message to verify SMTP settings.
    ///
    /// # Errors
    ///
    /// Returns an error if settings are missing or delivery fails.
    pub async fn send_test_message(&self) -> Result<String, ShipError> {
        let config = SmtpConfig::resolve(&self.smtp_config_file)?;
        let message = Message::builder()
            .from(config.username.parse::<Mailbox>()?)
            .to(config.receiver.parse::<Mailbox>()?)
            .subject(TEST_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(String::from("SMTP settings are working."))?;

        transport(&config)?.send(message).await?;
        info!(receiver = %config.receiver, "Test message sent");
        Ok(config.receiver)
    }
}

fn zip_content_type() -> ContentType {
    ContentType::parse("application/zip").unwrap_or(ContentType::TEXT_PLAIN)
}

fn transport(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, ShipError> {
    let builder = if config.implicit_tls() {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
    };
    Ok(builder
        .port(config.port)
        .credentials(SmtpCredentials::new(
            config.username.clone(),
            config.password.clone(),
        ))
        .build())
}
