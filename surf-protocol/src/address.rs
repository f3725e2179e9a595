//! Tunnel addressing
//!
//! A tunnel address is a target URL plus a page offset. It travels as a DNS
//! query name:
//!
//! ```text
//! <base64(url) split into labels of at most 60 chars>.<page>.<suffix domain>
//! ```
//!
//! The base64 uses the standard alphabet with padding, so labels may contain
//! `+`, `/` and `=`. Callers building wire names must use raw labels rather than
//! hostname parsing.

use base64::prelude::*;

use crate::error::{Error, Result};

/// Suffix domain used when none is configured
pub const DEFAULT_SUFFIX_DOMAIN: &str = "dns.me";

/// Maximum characters per base64 label
pub const MAX_LABEL_CHARS: usize = 60;

/// Target served when the query carries an unusable URL
pub const FALLBACK_URL: &str = "https://news.ycombinator.com/";

/// The (url, page) pair a query represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelAddress {
    pub url: String,
    pub page: u32,
}

impl TunnelAddress {
    pub fn new(url: impl Into<String>, page: u32) -> Self {
        Self {
            url: url.into(),
            page,
        }
    }
}

/// Encodes and decodes tunnel addresses under one suffix domain
#[derive(Debug, Clone)]
pub struct AddressCodec {
    suffix: String,
    suffix_labels: Vec<String>,
}

impl Default for AddressCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX_DOMAIN)
    }
}

impl AddressCodec {
    pub fn new(suffix: &str) -> Self {
        let suffix = suffix.trim_matches('.').to_ascii_lowercase();
        let suffix_labels = suffix
            .split('.')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            suffix,
            suffix_labels,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Labels of the query name for `url` at `page`, without the root label
    pub fn encode_labels(&self, url: &str, page: u32) -> Vec<String> {
        let b64 = BASE64_STANDARD.encode(url.as_bytes());
        // base64 output is ASCII, byte chunks are char chunks
        let mut labels: Vec<String> = b64
            .as_bytes()
            .chunks(MAX_LABEL_CHARS)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        labels.push(page.to_string());
        labels.extend(self.suffix_labels.iter().cloned());
        labels
    }

    /// Query name for `url` at `page`
    pub fn encode(&self, url: &str, page: u32) -> String {
        self.encode_labels(url, page).join(".")
    }

    /// Parse a dotted query name
    pub fn decode(&self, qname: &str) -> Result<TunnelAddress> {
        let qname = qname.strip_suffix('.').unwrap_or(qname);
        let labels: Vec<&str> = qname.split('.').collect();
        self.decode_labels(&labels)
    }

    /// Parse a query name given as individual labels
    ///
    /// Structural problems (too few labels, wrong suffix) are errors. A
    /// payload that does not decode to an http(s) URL resolves to
    /// [`FALLBACK_URL`] instead.
    pub fn decode_labels<S: AsRef<str>>(&self, labels: &[S]) -> Result<TunnelAddress> {
        let n = self.suffix_labels.len();
        if labels.len() < n + 2 {
            return Err(Error::MalformedQuery(format!(
                "expected at least {} labels, got {}",
                n + 2,
                labels.len()
            )));
        }

        let (head, suffix) = labels.split_at(labels.len() - n);
        let suffix_matches = suffix
            .iter()
            .zip(&self.suffix_labels)
            .all(|(got, want)| got.as_ref().eq_ignore_ascii_case(want));
        if !suffix_matches {
            return Err(Error::MalformedQuery(format!(
                "query is not under {}",
                self.suffix
            )));
        }

        let (data, page) = head.split_at(head.len() - 1);
        let page = page[0].as_ref().parse::<u32>().unwrap_or(0);

        let url = decode_url(data).unwrap_or_else(|| {
            log::debug!("query carries no usable URL, serving fallback");
            FALLBACK_URL.to_string()
        });

        Ok(TunnelAddress { url, page })
    }
}

fn decode_url<S: AsRef<str>>(labels: &[S]) -> Option<String> {
    let mut b64: String = labels
        .iter()
        .flat_map(|l| l.as_ref().chars())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
        .collect();
    while b64.len() % 4 != 0 {
        b64.push('=');
    }

    let bytes = BASE64_STANDARD.decode(b64).ok()?;
    let url = String::from_utf8(bytes).ok()?;
    is_http_url(&url).then_some(url)
}

/// Whether `s` is an absolute http or https URL
pub fn is_http_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .unwrap_or(false)
}
