//! Shared constants used across the application.

/// User agent string used for page loads and asset requests.
///
/// A realistic desktop browser user agent, so the portal serves the same
/// markup it serves to interactive users.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Login form of the portal.
pub const DEFAULT_LOGIN_URL: &str = "https://myrequests.pis.gr/Account/Login.aspx";

/// Page that is snapshotted during the poll window.
pub const DEFAULT_TARGET_URL: &str = "https://myrequests.pis.gr/Applications.aspx";

/// Offset of the portal's local time from UTC, in seconds (UTC+3).
pub const PORTAL_UTC_OFFSET_SECS: i32 = 3 * 3600;

/// CSS selectors for the login form and the logged-in markers.
pub mod selectors {
    pub const USERNAME_INPUT: &str = r#"input[name="ctl00$MainContent$LoginUser$UserName"]"#;
    pub const PASSWORD_INPUT: &str = r#"input[name="ctl00$MainContent$LoginUser$Password"]"#;
    pub const LOGIN_BUTTON: &str = r#"input[name="ctl00$MainContent$LoginUser$LoginButton"]"#;
    /// Span holding the logged-in user's display name.
    pub const WELCOME_NAME: &str = "#HeadLoginView_HeadLoginName";
    /// Logout link, only rendered for authenticated sessions.
    pub const LOGOUT_STATUS: &str = "#HeadLoginView_HeadLoginStatus";
}

/// Output file names.
pub mod files {
    pub const SNAPSHOT_PREFIX: &str = "application_view_";
    pub const LOGIN_FAILED: &str = "login_failed_response.html";
    pub const HOME_PAGE: &str = "home_page.html";
    pub const ERROR_PAGE_PREFIX: &str = "error_page_";
    pub const ASSET_DIR_PREFIX: &str = "assets_";
    pub const DEFAULT_ARCHIVE_NAME: &str = "pis-gr-scraper-html.zip";
}

/// Extensions treated as downloadable assets unless overridden.
pub const DEFAULT_ASSET_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "gif", "doc", "docx", "xls", "xlsx", "zip",
];
