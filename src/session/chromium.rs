//! Headless Chromium session driven over the DevTools protocol.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::BROWSER_USER_AGENT;
use crate::session::http::{CookieFetcher, SessionCookie};
use crate::session::{ElementSnapshot, FetchResponse, SessionClient, SessionError};

/// Default viewport width in pixels.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

/// Default viewport height in pixels.
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1600;

/// Interval between `document.readyState` checks.
const READY_STATE_POLL: Duration = Duration::from_millis(100);

/// Quiet period after the document completes, to let late XHRs and redirects land.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

/// Browser launch configuration.
#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    /// Path to Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Timeout for individual DevTools requests.
    pub request_timeout: Duration,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A single headless browser tab used for the whole run.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    fetcher: CookieFetcher,
}

impl ChromiumSession {
    /// Launch a headless browser and open a blank tab.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser cannot be started.
    pub async fn launch(config: &ChromiumConfig) -> Result<Self, SessionError> {
        info!("Launching headless browser");

        let mut config_builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .request_timeout(config.request_timeout)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg(format!("--user-agent={BROWSER_USER_AGENT}"));

        if let Some(ref chrome_path) = config.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| SessionError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SessionError::Browser(format!("failed to launch browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(browser_error)?;
        let fetcher = CookieFetcher::new()?;

        info!("Headless browser ready");
        Ok(Self {
            browser,
            page,
            handler,
            fetcher,
        })
    }
}

#[async_trait]
impl SessionClient for ChromiumSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        debug!(url = %url, "Navigating");
        let page = &self.page;
        with_timeout("navigation", timeout, async {
            page.goto(url)
                .await
                .map(|_| ())
                .map_err(|e| SessionError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn reload(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let page = &self.page;
        with_timeout("reload", timeout, async {
            page.reload()
                .await
                .map(|_| ())
                .map_err(|e| SessionError::Navigation {
                    url: "<reload>".to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SessionError> {
        let script = fill_script(selector, value)?;
        let found: bool = self
            .page
            .evaluate(script)
            .await
            .map_err(browser_error)?
            .into_value()
            .map_err(|e| SessionError::Browser(format!("unexpected fill result: {e}")))?;
        if found {
            Ok(())
        } else {
            Err(SessionError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), SessionError> {
        let element =
            self.page
                .find_element(selector)
                .await
                .map_err(|_| SessionError::ElementNotFound {
                    selector: selector.to_string(),
                })?;
        element.click().await.map_err(browser_error)?;
        Ok(())
    }

    async fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let page = &self.page;
        with_timeout("wait for idle", timeout, async {
            page.wait_for_navigation().await.map_err(browser_error)?;
            loop {
                let state: String = page
                    .evaluate("document.readyState")
                    .await
                    .map_err(browser_error)?
                    .into_value()
                    .map_err(|e| SessionError::Browser(format!("unexpected readyState: {e}")))?;
                if state == "complete" {
                    break;
                }
                tokio::time::sleep(READY_STATE_POLL).await;
            }
            tokio::time::sleep(NETWORK_QUIET).await;
            Ok(())
        })
        .await
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        self.page.content().await.map_err(browser_error)
    }

    async fn query(&mut self, selector: &str) -> Result<Option<ElementSnapshot>, SessionError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(browser_error)?;
        let Some(element) = elements.into_iter().next() else {
            return Ok(None);
        };
        let text = element
            .inner_text()
            .await
            .map_err(browser_error)?
            .unwrap_or_default();
        Ok(Some(ElementSnapshot { text }))
    }

    async fn request_get(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchResponse, SessionError> {
        let cookies: Vec<SessionCookie> = self
            .page
            .get_cookies()
            .await
            .map_err(browser_error)?
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
            })
            .collect();
        self.fetcher.get(url, &cookies, timeout).await
    }

    async fn current_url(&mut self) -> Result<Option<String>, SessionError> {
        self.page.url().await.map_err(browser_error)
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {e}");
        } else {
            info!("Browser shutdown complete");
        }
        match self.browser.wait().await {
            Ok(status) => debug!(?status, "Browser process exited"),
            Err(e) => debug!("Failed to wait for browser process: {e}"),
        }
        self.handler.abort();
    }
}

fn browser_error(e: CdpError) -> SessionError {
    SessionError::Browser(e.to_string())
}

async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| SessionError::Timeout { operation, timeout })?
}

/// Script that sets an input's value and fires the events form handlers listen for.
///
/// Evaluates to `false` when nothing matches `selector`.
fn fill_script(selector: &str, value: &str) -> Result<String, SessionError> {
    let encode = |s: &str| {
        serde_json::to_string(s)
            .map_err(|e| SessionError::Browser(format!("failed to encode fill argument: {e}")))
    };
    let selector = encode(selector)?;
    let value = encode(value)?;
    Ok(format!(
        "(() => {{ \
            const el = document.querySelector({selector}); \
            if (!el) return false; \
            el.focus(); \
            el.value = {value}; \
            el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
            el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
            return true; \
        }})()"
    ))
}
