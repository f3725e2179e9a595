//! Upstream HTTP fetching

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};

use crate::error::{Error, Result};

/// Accept header for page documents
pub const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Accept header for stylesheets
pub const CSS_ACCEPT: &str = "text/css,*/*;q=0.1";

/// Accept header for SVG images
pub const SVG_ACCEPT: &str = "image/svg+xml,text/xml,application/xml;q=0.9,*/*;q=0.1";

/// Default User-Agent, a mobile browser so sites serve their light layout
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

/// A successfully fetched resource
#[derive(Debug, Clone, Default)]
pub struct Resource {
    /// Final URL after redirects
    pub url: String,
    pub body: String,
    pub content_type: Option<String>,
    /// Declared Content-Length
    pub content_length: Option<u64>,
    /// `max-age` from Cache-Control
    pub max_age: Option<Duration>,
}

/// Time-bounded fetch of a text resource
///
/// Implementations must fail with [`Error::Timeout`] when `timeout` elapses
/// and with [`Error::Http`] on a non-2xx status.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration, accept: &str) -> Result<Resource>;
}

/// [`Fetcher`] backed by a shared reqwest client
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| Error::Fetch(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration, accept: &str) -> Result<Resource> {
        let request = async {
            let response = self.client.get(url).header(ACCEPT, accept).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::Http {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let headers = response.headers();
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let content_length = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let max_age = headers
                .get(CACHE_CONTROL)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_max_age);
            let final_url = response.url().to_string();

            let body = response.text().await?;
            Ok(Resource {
                url: final_url,
                body,
                content_type,
                content_length,
                max_age,
            })
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }
}

/// Extract `max-age` from a Cache-Control header value
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        value
            .trim()
            .trim_matches('"')
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_age() {
        assert_eq!(
            parse_max_age("public, max-age=600"),
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            parse_max_age("Max-Age=\"30\", immutable"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_max_age("no-store"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
        assert_eq!(parse_max_age("s-maxage=5"), None);
    }

    #[test]
    fn test_http_fetcher_creation() {
        assert!(HttpFetcher::new(DEFAULT_USER_AGENT).is_ok());
    }
}
