//! Page render pipeline
//!
//! Fetch, sanitize, compact, then gather styles and SVG images concurrently.
//! Only the page fetch is fatal; a stylesheet or image that fails is skipped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use surf_protocol::PagePayload;
use url::Url;

use crate::cache::{resource_key, KvStore};
use crate::compact::{self, Snapshot, StyleSource, SvgCandidate};
use crate::css::{minify_css, purge_css};
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Resource, CSS_ACCEPT, HTML_ACCEPT, SVG_ACCEPT};
use crate::sanitize::sanitize_html;
use crate::svg::{
    check_svg_resource, sanitize_svg, DEFAULT_MAX_INLINE_SVG_SIZE, DEFAULT_MAX_SVG_FETCH,
};

/// Limits and timeouts of one render
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Bound on the page fetch
    pub fetch_timeout: Duration,
    /// Bound on each stylesheet or image fetch
    pub resource_timeout: Duration,
    /// Cache lifetime of a stylesheet without `max-age`
    pub css_max_age: Duration,
    /// Cache lifetime of an image without `max-age`
    pub img_max_age: Duration,
    pub max_inline_svg_size: usize,
    pub max_svg_fetch: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(30_000),
            resource_timeout: Duration::from_millis(15_000),
            css_max_age: Duration::from_secs(600),
            img_max_age: Duration::from_secs(3600),
            max_inline_svg_size: DEFAULT_MAX_INLINE_SVG_SIZE,
            max_svg_fetch: DEFAULT_MAX_SVG_FETCH,
        }
    }
}

/// Something that turns a URL into compressed payload text
#[async_trait]
pub trait RenderPage: Send + Sync {
    async fn render_compressed(&self, url: &str) -> Result<String>;
}

/// Renders pages into [`PagePayload`]s
pub struct PageRenderer {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn KvStore>,
    options: RenderOptions,
}

impl PageRenderer {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<dyn KvStore>, options: RenderOptions) -> Self {
        Self {
            fetcher,
            store,
            options,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Fetch and compact `url`
    pub async fn render(&self, url: &str) -> Result<PagePayload> {
        let started = Instant::now();
        let page = self
            .fetcher
            .fetch(url, self.options.fetch_timeout, HTML_ACCEPT)
            .await?;

        let base = Url::parse(&page.url)
            .or_else(|_| Url::parse(url))
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;

        let parts = {
            let clean = sanitize_html(&page.body);
            compact::extract(&clean, &base, self.options.max_svg_fetch)
        };

        let (styles, imgs) = tokio::join!(
            self.load_styles(&parts.styles, &parts.snapshot),
            self.load_svgs(&parts.svgs)
        );

        log::info!(
            "rendered {} in {:?}: {} top-level nodes, {} bytes of css, {}/{} svg images",
            url,
            started.elapsed(),
            parts.dom.len(),
            styles.len(),
            imgs.len(),
            parts.svgs.len()
        );

        Ok(PagePayload {
            dom: parts.dom,
            styles,
            html_attrs: parts.html_attrs,
            body_attrs: parts.body_attrs,
            imgs,
        })
    }

    async fn load_styles(&self, sources: &[StyleSource], snapshot: &Snapshot) -> String {
        let texts = join_all(sources.iter().map(|source| async move {
            match source {
                StyleSource::Inline(css) => Some(css.clone()),
                StyleSource::External(url) => {
                    match self
                        .cached_text("css", url, CSS_ACCEPT, self.options.css_max_age, |_| Ok(()))
                        .await
                    {
                        Ok(css) => Some(css),
                        Err(e) => {
                            log::debug!("skipping stylesheet {}: {}", url, e);
                            None
                        }
                    }
                }
            }
        }))
        .await;

        let combined = texts.into_iter().flatten().collect::<Vec<_>>().join("\n");
        if combined.trim().is_empty() {
            return String::new();
        }
        minify_css(&purge_css(&combined, snapshot))
    }

    async fn load_svgs(&self, candidates: &[SvgCandidate]) -> BTreeMap<String, String> {
        let max = self.options.max_inline_svg_size;
        let results = join_all(candidates.iter().map(|candidate| async move {
            let svg = self
                .cached_text(
                    "svg",
                    &candidate.url,
                    SVG_ACCEPT,
                    self.options.img_max_age,
                    |res| check_svg_resource(res, max),
                )
                .await
                .and_then(|raw| sanitize_svg(&raw, max));

            match svg {
                Ok(svg) => Some((candidate.src.clone(), svg)),
                Err(e) => {
                    log::debug!("skipping image {}: {}", candidate.url, e);
                    None
                }
            }
        }))
        .await;

        results.into_iter().flatten().collect()
    }

    /// Body of a secondary resource, through the shared store
    ///
    /// `check` runs on fresh fetches before anything is cached.
    async fn cached_text<F>(
        &self,
        kind: &str,
        url: &str,
        accept: &str,
        default_max_age: Duration,
        check: F,
    ) -> Result<String>
    where
        F: Fn(&Resource) -> Result<()> + Send,
    {
        let key = resource_key(kind, url);
        if let Some(Some(text)) = self.store.get(&key).await.advisory("get", &key) {
            log::trace!("resource cache hit for {}", url);
            return Ok(text);
        }

        let resource = self
            .fetcher
            .fetch(url, self.options.resource_timeout, accept)
            .await?;
        check(&resource)?;

        let ttl = resource.max_age.unwrap_or(default_max_age);
        let _ = self
            .store
            .set(&key, &resource.body, ttl)
            .await
            .advisory("set", &key);
        Ok(resource.body)
    }
}

#[async_trait]
impl RenderPage for PageRenderer {
    async fn render_compressed(&self, url: &str) -> Result<String> {
        Ok(self.render(url).await?.compress()?)
    }
}
