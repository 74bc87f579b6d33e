//! Logged-in marker detection.
//!
//! A page belongs to an authenticated session when it shows either the
//! welcome-name span with non-empty text or the logout link. The same check
//! verifies a fresh login and detects a lost session mid-poll.

use scraper::{Html, Selector};

use crate::constants::selectors;

/// Which marker proved the session is authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMarker {
    /// Welcome span with the user's display name.
    WelcomeName(String),
    /// Logout link without a usable welcome name.
    LogoutLink,
}

/// Decide from query results, checking the welcome name first.
#[must_use]
pub fn classify(welcome_text: Option<&str>, logout_present: bool) -> Option<LoginMarker> {
    if let Some(name) = welcome_text.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(LoginMarker::WelcomeName(name.to_string()));
    }
    logout_present.then_some(LoginMarker::LogoutLink)
}

/// Find the logged-in marker in raw page markup.
#[must_use]
pub fn detect_in_markup(html: &str) -> Option<LoginMarker> {
    let document = Html::parse_document(html);
    let (Ok(welcome), Ok(logout)) = (
        Selector::parse(selectors::WELCOME_NAME),
        Selector::parse(selectors::LOGOUT_STATUS),
    ) else {
        return None;
    };

    let welcome_text = document
        .select(&welcome)
        .next()
        .map(|el| el.text().collect::<String>());
    let logout_present = document.select(&logout).next().is_some();

    classify(welcome_text.as_deref(), logout_present)
}

/// Whether the markup shows an authenticated session.
#[must_use]
pub fn is_logged_in(html: &str) -> bool {
    detect_in_markup(html).is_some()
}
