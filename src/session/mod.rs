//! Browser session abstraction.
//!
//! The poll loop and the authenticator only talk to a [`SessionClient`], so
//! the production Chromium driver and scripted test sessions are
//! interchangeable.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod chromium;
pub mod http;

pub use chromium::{ChromiumConfig, ChromiumSession};
pub use http::{CookieFetcher, SessionCookie};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("no element matches selector {selector}")]
    ElementNotFound { selector: String },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("browser error: {0}")]
    Browser(String),
}

impl SessionError {
    /// Whether the error came from the network or a timeout rather than the page itself.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Navigation { .. } | Self::Request { .. }
        )
    }
}

/// What a selector query found on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSnapshot {
    /// Rendered text of the element, untrimmed.
    pub text: String,
}

/// Response of a GET issued with the session's cookies.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An authenticated browsing context, exclusively owned by the run.
#[async_trait]
pub trait SessionClient: Send {
    /// Navigate to `url` and wait for the load event.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Reload the current page.
    async fn reload(&mut self, timeout: Duration) -> Result<(), SessionError>;

    /// Replace the value of the input matched by `selector`.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SessionError>;

    async fn click(&mut self, selector: &str) -> Result<(), SessionError>;

    /// Wait until pending navigations settle and the document is complete.
    async fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), SessionError>;

    /// Full markup of the current page.
    async fn content(&mut self) -> Result<String, SessionError>;

    /// First element matching `selector`, if any.
    async fn query(&mut self, selector: &str) -> Result<Option<ElementSnapshot>, SessionError>;

    /// GET `url` carrying the session's cookies.
    async fn request_get(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchResponse, SessionError>;

    async fn current_url(&mut self) -> Result<Option<String>, SessionError>;

    /// Release the underlying browser. Further calls may fail.
    async fn shutdown(&mut self) {}
}
