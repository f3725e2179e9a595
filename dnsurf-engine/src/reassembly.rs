//! Client-side page reassembly
//!
//! The first fragment is fetched with retries and tells how many fragments
//! the page has. The rest are fetched once each through a bounded pool;
//! a fragment that fails leaves a gap instead of failing the page.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use surf_dns::TxtQuery;
use surf_protocol::{AddressCodec, Fragment, PagePayload};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::page_cache::PageCache;
use crate::view::decode_payload;

/// A single-fragment page is only cached when it carries more than this
/// many characters, so short notices are always fetched again.
const MIN_CACHEABLE_SINGLE: usize = 200;

/// Headers announcing more fragments than this are rejected
const MAX_TOTAL_FRAGMENTS: u32 = u16::MAX as u32;

/// Upper bound of the random retry jitter, in milliseconds
const RETRY_JITTER_MS: u64 = 80;

/// Progress callback, `(completed, total)` fragments
pub type Progress = dyn Fn(usize, usize) + Send + Sync;

/// Retry, timeout and concurrency settings of one fetch
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_fetch_attempts: u32,
    pub retry_base_delay: Duration,
    pub dns_timeout: Duration,
    /// Added to the first fragment timeout on every retry
    pub retry_timeout_step: Duration,
    pub fragment_timeout: Duration,
    pub parallel_requests: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_fetch_attempts: 3,
            retry_base_delay: Duration::from_millis(120),
            dns_timeout: Duration::from_millis(8000),
            retry_timeout_step: Duration::from_millis(2000),
            fragment_timeout: Duration::from_millis(8000),
            parallel_requests: 3,
        }
    }
}

/// Concatenated fragment text of one page, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub text: String,
    pub total: u32,
    /// 1-based indices that were filled with nothing
    pub missing: Vec<u32>,
}

/// Fetches pages through the tunnel and caches the decoded result
pub struct PageFetcher {
    transport: Arc<dyn TxtQuery>,
    codec: AddressCodec,
    cache: Mutex<PageCache>,
    options: FetchOptions,
}

impl PageFetcher {
    pub fn new(
        transport: Arc<dyn TxtQuery>,
        codec: AddressCodec,
        cache: PageCache,
        options: FetchOptions,
    ) -> Self {
        Self {
            transport,
            codec,
            cache: Mutex::new(cache),
            options,
        }
    }

    /// The page cache
    pub fn cache(&self) -> &Mutex<PageCache> {
        &self.cache
    }

    /// Decoded page at `url`, from the cache or the tunnel
    pub async fn fetch_page(&self, url: &str, progress: &(dyn Fn(usize, usize) + Send + Sync + '_)) -> Result<Arc<PagePayload>> {
        if let Some(page) = self.cache.lock().await.get(url) {
            log::info!("serving {} from page cache", url);
            return Ok(page);
        }

        let assembly = self.reassemble(url, progress).await?;
        let payload = Arc::new(decode_payload(&assembly.text)?);

        if assembly.total > 1 || assembly.text.trim().len() > MIN_CACHEABLE_SINGLE {
            self.cache.lock().await.set(url, payload.clone());
        } else {
            log::debug!("not caching short single-fragment page {}", url);
        }

        Ok(payload)
    }

    /// Fetch every fragment of `url` and concatenate them in order
    pub async fn reassemble(&self, url: &str, progress: &(dyn Fn(usize, usize) + Send + Sync + '_)) -> Result<Assembly> {
        let first = Fragment::parse(&self.fetch_first(url).await?);
        let total = first.total;

        if total <= 1 {
            progress(1, 1);
            return Ok(Assembly {
                text: first.text,
                total,
                missing: Vec::new(),
            });
        }

        if total > MAX_TOTAL_FRAGMENTS {
            return Err(Error::Decode(format!(
                "{} announces {} fragments",
                url, total
            )));
        }

        let slots = total as usize;
        let mut fragments: Vec<Option<String>> = vec![None; slots];
        let first_index = first.index;
        if (1..=total).contains(&first_index) {
            fragments[first_index as usize - 1] = Some(first.text);
        } else {
            log::warn!(
                "first fragment of {} has index {} outside 1..={}",
                url,
                first_index,
                total
            );
        }

        let completed = AtomicUsize::new(1);
        progress(1, slots);

        let results: Vec<(u32, Option<String>)> = stream::iter(
            (1..=total).filter(|index| *index != first_index),
        )
        .map(|index| {
            let completed = &completed;
            async move {
                let text = self.fetch_fragment(url, index).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                progress(done, slots);
                (index, text)
            }
        })
        .buffer_unordered(self.options.parallel_requests.max(1))
        .collect()
        .await;

        for (index, text) in results {
            if let Some(text) = text {
                fragments[index as usize - 1] = Some(text);
            }
        }

        let mut missing = Vec::new();
        let mut text = String::new();
        for (slot, fragment) in fragments.into_iter().enumerate() {
            match fragment {
                Some(part) => text.push_str(&part),
                None => {
                    log::warn!("filling missing fragment {}/{} of {}", slot + 1, total, url);
                    missing.push(slot as u32 + 1);
                }
            }
        }

        log::info!(
            "reassembled {} from {} fragments ({} missing)",
            url,
            total,
            missing.len()
        );

        Ok(Assembly {
            text,
            total,
            missing,
        })
    }

    /// First fragment, retried with a growing timeout and backoff
    async fn fetch_first(&self, url: &str) -> Result<String> {
        let qname = self.codec.encode(url, 0);
        let attempts = self.options.max_fetch_attempts.max(1);
        let mut attempt = 1;

        loop {
            let timeout = self.options.dns_timeout + self.options.retry_timeout_step * (attempt - 1);

            match self.transport.send_query(&qname, timeout).await {
                Ok(txt) => return Ok(txt),
                Err(e) => {
                    log::warn!(
                        "first fragment of {} failed (attempt {}/{}): {}",
                        url,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt >= attempts {
                        return Err(e.into());
                    }
                }
            }

            let jitter = Duration::from_millis(rand::random_range(0..RETRY_JITTER_MS));
            tokio::time::sleep(self.options.retry_base_delay * attempt + jitter).await;
            attempt += 1;
        }
    }

    /// Text of fragment `index` (1-based), or `None` if it failed
    async fn fetch_fragment(&self, url: &str, index: u32) -> Option<String> {
        let qname = self.codec.encode(url, index - 1);

        match self
            .transport
            .send_query(&qname, self.options.fragment_timeout)
            .await
        {
            Ok(txt) => {
                let fragment = Fragment::parse(&txt);
                if fragment.index == index {
                    Some(fragment.text)
                } else {
                    log::warn!(
                        "index mismatch for {}: got {}/{}, expected {}",
                        url,
                        fragment.index,
                        fragment.total,
                        index
                    );
                    None
                }
            }
            Err(e) => {
                log::warn!("fragment {} of {} failed: {}", index, url, e);
                None
            }
        }
    }
}
