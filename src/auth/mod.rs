//! Portal login.

pub mod markers;

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants::{files, selectors};
use crate::credentials::Credentials;
use crate::fs_utils::write_diagnostic;
use crate::session::{SessionClient, SessionError};

pub use markers::{detect_in_markup, is_logged_in, LoginMarker};

/// Drives a session through the login form and verifies the result.
#[derive(Debug, Clone)]
pub struct Authenticator {
    login_url: String,
    page_timeout: Duration,
    grace: Duration,
    diagnostics_dir: PathBuf,
}

impl Authenticator {
    /// Create an authenticator.
    ///
    /// `grace` is the extra settle time after the post-submit page goes idle,
    /// absorbing the portal's post-login redirects.
    #[must_use]
    pub fn new(
        login_url: impl Into<String>,
        page_timeout: Duration,
        grace: Duration,
        diagnostics_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            login_url: login_url.into(),
            page_timeout,
            grace,
            diagnostics_dir: diagnostics_dir.into(),
        }
    }

    /// Submit the login form and check for a logged-in marker.
    ///
    /// Returns `Ok(false)` for a rejected login, after saving the page to
    /// `login_failed_response.html`. On success the session stays on the
    /// post-login page.
    ///
    /// # Errors
    ///
    /// Returns an error only when the session itself fails.
    pub async fn authenticate<S>(
        &self,
        session: &mut S,
        credentials: &Credentials,
    ) -> Result<bool, SessionError>
    where
        S: SessionClient + ?Sized,
    {
        info!(url = %self.login_url, "Navigating to login page");
        session.goto(&self.login_url, self.page_timeout).await?;
        session.wait_for_idle(self.page_timeout).await?;

        debug!("Filling in login form");
        session
            .fill(selectors::USERNAME_INPUT, &credentials.username)
            .await?;
        session
            .fill(selectors::PASSWORD_INPUT, &credentials.password)
            .await?;
        session.click(selectors::LOGIN_BUTTON).await?;

        debug!("Waiting for login to complete");
        session.wait_for_idle(self.page_timeout).await?;
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }

        match self.login_marker(session).await? {
            Some(LoginMarker::WelcomeName(name)) => {
                info!(welcome = %name, "Login successful");
                Ok(true)
            }
            Some(LoginMarker::LogoutLink) => {
                info!("Login successful (logout link found)");
                Ok(true)
            }
            None => {
                warn!("Login failed: no logged-in marker on the post-login page");
                self.save_failed_login(session).await;
                Ok(false)
            }
        }
    }

    /// Check the current page for the welcome name, then the logout link.
    async fn login_marker<S>(&self, session: &mut S) -> Result<Option<LoginMarker>, SessionError>
    where
        S: SessionClient + ?Sized,
    {
        let welcome = session.query(selectors::WELCOME_NAME).await?;
        if let Some(marker) = markers::classify(welcome.as_ref().map(|e| e.text.as_str()), false) {
            return Ok(Some(marker));
        }
        let logout = session.query(selectors::LOGOUT_STATUS).await?;
        Ok(markers::classify(None, logout.is_some()))
    }

    async fn save_failed_login<S>(&self, session: &mut S)
    where
        S: SessionClient + ?Sized,
    {
        let markup = match session.content().await {
            Ok(markup) => markup,
            Err(e) => {
                warn!("Could not read failed login page: {e}");
                return;
            }
        };
        match write_diagnostic(&self.diagnostics_dir, files::LOGIN_FAILED, &markup).await {
            Ok(path) => info!(path = %path.display(), "Login response saved for inspection"),
            Err(e) => warn!("Failed to save login response: {e:#}"),
        }
    }
}
