//! Scripted session and clock shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};

use portal_snapshot::auth::{detect_in_markup, LoginMarker};
use portal_snapshot::constants::selectors;
use portal_snapshot::schedule::{portal_offset, Clock};
use portal_snapshot::session::{ElementSnapshot, FetchResponse, SessionClient, SessionError};

pub const LOGIN_URL: &str = "https://portal.test/Account/Login.aspx";
pub const TARGET_URL: &str = "https://portal.test/Applications.aspx";

pub const LOGIN_PAGE: &str = r#"<html><body><form id="login">
    <input name="ctl00$MainContent$LoginUser$UserName">
    <input name="ctl00$MainContent$LoginUser$Password" type="password">
</form></body></html>"#;

pub const REJECTED_PAGE: &str =
    r#"<html><body><span class="failureNotification">Invalid login</span></body></html>"#;

pub const ERROR_PAGE: &str = "<html><body><h1>503 Service Unavailable</h1></body></html>";

/// Authenticated applications page, optionally with extra body markup.
pub fn logged_in_page(extra: &str) -> String {
    format!(
        r#"<html><body>
        <span id="HeadLoginView_HeadLoginName">Maria</span>
        <a id="HeadLoginView_HeadLoginStatus" href="/Logout.aspx">Log out</a>
        <table id="applications"><tr><td>Pending</td></tr></table>
        {extra}
        </body></html>"#
    )
}

/// What the next load of the target page does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Load {
    /// Loads normally.
    Ok,
    /// Times out, leaving an error page behind.
    Fail,
    /// Loads, but the server has dropped the session.
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Goto(String),
    Reload,
    Fill(String),
    Click,
    RequestGet(String),
}

/// In-memory stand-in for a browser session.
pub struct ScriptedSession {
    pub logged_in: bool,
    /// Whether submitting the login form succeeds.
    pub accept_login: bool,
    /// Consumed by target loads; an exhausted script loads normally.
    pub loads: VecDeque<Load>,
    /// Simulated duration of each target load.
    pub load_time: Duration,
    /// Extra markup included in the authenticated page.
    pub page_extra: String,
    pub assets: HashMap<String, FetchResponse>,
    pub events: Vec<Event>,
    page: String,
    url: Option<String>,
}

impl ScriptedSession {
    /// A session that still has to log in.
    pub fn new() -> Self {
        Self {
            logged_in: false,
            accept_login: true,
            loads: VecDeque::new(),
            load_time: Duration::ZERO,
            page_extra: String::new(),
            assets: HashMap::new(),
            events: Vec::new(),
            page: String::from("<html></html>"),
            url: None,
        }
    }

    /// A session already sitting on the authenticated home page.
    pub fn authenticated() -> Self {
        let mut session = Self::new();
        session.logged_in = true;
        session.page = logged_in_page("");
        session
    }

    pub fn with_loads(mut self, loads: &[Load]) -> Self {
        self.loads = loads.iter().copied().collect();
        self
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn count(&self, wanted: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| wanted(e)).count()
    }

    async fn load_target(&mut self) -> Result<(), SessionError> {
        if !self.load_time.is_zero() {
            tokio::time::sleep(self.load_time).await;
        }
        match self.loads.pop_front().unwrap_or(Load::Ok) {
            Load::Ok => {}
            Load::Fail => {
                self.page = ERROR_PAGE.to_string();
                return Err(SessionError::Timeout {
                    operation: "reload",
                    timeout: Duration::from_secs(30),
                });
            }
            Load::LoggedOut => self.logged_in = false,
        }
        self.page = if self.logged_in {
            logged_in_page(&self.page_extra)
        } else {
            LOGIN_PAGE.to_string()
        };
        Ok(())
    }
}

#[async_trait]
impl SessionClient for ScriptedSession {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<(), SessionError> {
        self.events.push(Event::Goto(url.to_string()));
        self.url = Some(url.to_string());
        if url == LOGIN_URL {
            self.page = LOGIN_PAGE.to_string();
            return Ok(());
        }
        self.load_target().await
    }

    async fn reload(&mut self, _timeout: Duration) -> Result<(), SessionError> {
        self.events.push(Event::Reload);
        self.load_target().await
    }

    async fn fill(&mut self, selector: &str, _value: &str) -> Result<(), SessionError> {
        self.events.push(Event::Fill(selector.to_string()));
        Ok(())
    }

    async fn click(&mut self, _selector: &str) -> Result<(), SessionError> {
        self.events.push(Event::Click);
        if self.accept_login {
            self.logged_in = true;
            self.page = logged_in_page("");
        } else {
            self.page = REJECTED_PAGE.to_string();
        }
        Ok(())
    }

    async fn wait_for_idle(&mut self, _timeout: Duration) -> Result<(), SessionError> {
        Ok(())
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        Ok(self.page.clone())
    }

    async fn query(&mut self, selector: &str) -> Result<Option<ElementSnapshot>, SessionError> {
        let found = match detect_in_markup(&self.page) {
            Some(LoginMarker::WelcomeName(name)) if selector == selectors::WELCOME_NAME => {
                Some(ElementSnapshot { text: name })
            }
            Some(_) if selector == selectors::LOGOUT_STATUS => Some(ElementSnapshot {
                text: "Log out".to_string(),
            }),
            _ => None,
        };
        Ok(found)
    }

    async fn request_get(
        &mut self,
        url: &str,
        _timeout: Duration,
    ) -> Result<FetchResponse, SessionError> {
        self.events.push(Event::RequestGet(url.to_string()));
        Ok(self.assets.get(url).cloned().unwrap_or(FetchResponse {
            status: 404,
            body: Vec::new(),
        }))
    }

    async fn current_url(&mut self) -> Result<Option<String>, SessionError> {
        Ok(self.url.clone())
    }
}

/// Portal-local clock driven by tokio's (pausable) time.
pub struct TokioClock {
    base: DateTime<FixedOffset>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(
            portal_offset()
                .with_ymd_and_hms(2025, 6, 2, 13, 59, 0)
                .single()
                .unwrap(),
        )
    }

    pub fn starting_at(base: DateTime<FixedOffset>) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.base + chrono::Duration::from_std(self.started.elapsed()).unwrap()
    }
}
