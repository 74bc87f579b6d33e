//! Plain HTTP fetches that reuse the browser's session cookies.

use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::constants::BROWSER_USER_AGENT;
use crate::session::{FetchResponse, SessionError};

/// A browser cookie with the attributes that decide where it may be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    /// Host-only when there is no leading dot, otherwise the domain and its subdomains.
    pub domain: String,
    pub path: String,
    pub secure: bool,
}

impl SessionCookie {
    /// Whether a browser would attach this cookie to a request for `url`.
    #[must_use]
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        let domain = self.domain.to_ascii_lowercase();
        let domain_ok = match domain.strip_prefix('.') {
            Some(parent) => host == parent || host.ends_with(&format!(".{parent}")),
            None => host == domain,
        };
        if !domain_ok || (self.secure && url.scheme() != "https") {
            return false;
        }
        path_matches(&self.path, url.path())
    }
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path.is_empty() || cookie_path == "/" || cookie_path == request_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

/// HTTP client for asset downloads outside the browser page.
#[derive(Debug, Clone)]
pub struct CookieFetcher {
    client: reqwest::Client,
}

impl CookieFetcher {
    /// Build a fetcher with the browser user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SessionError::Browser(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// GET `url`, attaching only the `cookies` that match it.
    ///
    /// Non-2xx statuses are returned as responses, not errors. Redirects
    /// are followed by hand so cookies are re-scoped for every hop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] or [`SessionError::Request`] on transport failure.
    pub async fn get(
        &self,
        url: &str,
        cookies: &[SessionCookie],
        timeout: Duration,
    ) -> Result<FetchResponse, SessionError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                SessionError::Timeout {
                    operation: "asset request",
                    timeout,
                }
            } else {
                SessionError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };
        let invalid = |message: String| SessionError::Request {
            url: url.to_string(),
            message,
        };

        let mut current = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        let mut hops = 0;
        let response = loop {
            let header = cookie_header_for(&current, cookies);
            let mut request = self.client.get(current.clone()).timeout(timeout);
            if !header.is_empty() {
                request = request.header(reqwest::header::COOKIE, header);
            }
            let response = request.send().await.map_err(map_err)?;

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .filter(|_| response.status().is_redirection())
                .map(str::to_owned);
            match location {
                Some(location) if hops < MAX_REDIRECTS => {
                    current = current
                        .join(&location)
                        .map_err(|e| invalid(format!("bad redirect target: {e}")))?;
                    hops += 1;
                }
                _ => break response,
            }
        };

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_err)?.to_vec();

        debug!(url = %current, status, size = body.len(), "Fetched with session cookies");
        Ok(FetchResponse { status, body })
    }
}

const MAX_REDIRECTS: u32 = 5;

/// `Cookie` header value for the cookies a browser would send to `url`.
#[must_use]
pub fn cookie_header_for(url: &Url, cookies: &[SessionCookie]) -> String {
    cookie_header(
        cookies
            .iter()
            .filter(|c| c.matches(url))
            .map(|c| (c.name.as_str(), c.value.as_str())),
    )
}

/// Render `(name, value)` pairs as a `Cookie` request header.
#[must_use]
pub fn cookie_header<'a, I>(cookies: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    cookies
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str, path: &str, secure: bool) -> SessionCookie {
        SessionCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
            secure,
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cookie_header_joins_pairs() {
        let header = cookie_header([("ASP.NET_SessionId", "abc"), (".ASPXAUTH", "def")]);
        assert_eq!(header, "ASP.NET_SessionId=abc; .ASPXAUTH=def");
    }

    #[test]
    fn test_cookie_header_empty() {
        assert_eq!(cookie_header(std::iter::empty()), "");
    }

    #[test]
    fn test_host_only_cookie_stays_on_its_host() {
        let auth = cookie(".ASPXAUTH", "myrequests.pis.gr", "/", true);
        assert!(auth.matches(&url("https://myrequests.pis.gr/Files/a.pdf")));
        assert!(!auth.matches(&url("https://cdn.example.com/a.pdf")));
        assert!(!auth.matches(&url("https://sub.myrequests.pis.gr/a.pdf")));
        assert!(!auth.matches(&url("https://evilmyrequests.pis.gr/a.pdf")));
    }

    #[test]
    fn test_domain_cookie_covers_subdomains() {
        let c = cookie("lang", ".pis.gr", "/", false);
        assert!(c.matches(&url("https://pis.gr/a.pdf")));
        assert!(c.matches(&url("https://myrequests.pis.gr/a.pdf")));
        assert!(!c.matches(&url("https://notpis.gr/a.pdf")));
    }

    #[test]
    fn test_secure_cookie_needs_https() {
        let c = cookie("s", "myrequests.pis.gr", "/", true);
        assert!(!c.matches(&url("http://myrequests.pis.gr/a.pdf")));
    }

    #[test]
    fn test_path_scoping() {
        let c = cookie("p", "myrequests.pis.gr", "/Files", false);
        assert!(c.matches(&url("http://myrequests.pis.gr/Files")));
        assert!(c.matches(&url("http://myrequests.pis.gr/Files/a.pdf")));
        assert!(!c.matches(&url("http://myrequests.pis.gr/FilesOther/a.pdf")));
        assert!(!c.matches(&url("http://myrequests.pis.gr/img/a.png")));
    }

    #[test]
    fn test_cookie_header_for_filters() {
        let cookies = vec![
            cookie(".ASPXAUTH", "myrequests.pis.gr", "/", false),
            cookie("tracker", "cdn.example.com", "/", false),
        ];
        assert_eq!(
            cookie_header_for(&url("http://cdn.example.com/x.png"), &cookies),
            "tracker=v"
        );
        assert_eq!(
            cookie_header_for(&url("http://myrequests.pis.gr/x.pdf"), &cookies),
            ".ASPXAUTH=v"
        );
    }
}
