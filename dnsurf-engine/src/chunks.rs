//! Server-side fragment cache
//!
//! A rendered page is compressed once, cut into TXT-sized slices and kept in
//! the shared store so the follow-up queries for its other fragments never
//! render it again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use surf_dns::{FragmentSource, SourceError};
use surf_protocol::{chunk_text, select_fragment, Fragment, TunnelAddress};
use surf_render::{sha256_hex, KvStore, RenderPage};

use crate::config::ServerConfig;
use crate::error::Result;

/// Prefix of fragment cache keys
pub const CHUNK_KEY_PREFIX: &str = "dnsurf:chunks:";

/// Cache key of the slices of `url`
pub fn chunk_key(url: &str) -> String {
    format!("{}{}", CHUNK_KEY_PREFIX, sha256_hex(url))
}

/// Fragmentation settings
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub part_limit: usize,
    pub cache_ttl: Duration,
}

impl From<&ServerConfig> for ChunkOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            part_limit: config.part_limit,
            cache_ttl: config.cache_ttl(),
        }
    }
}

/// Renders pages on demand and serves their fragments
pub struct ChunkStore {
    renderer: Arc<dyn RenderPage>,
    store: Arc<dyn KvStore>,
    options: ChunkOptions,
}

impl ChunkStore {
    pub fn new(renderer: Arc<dyn RenderPage>, store: Arc<dyn KvStore>, options: ChunkOptions) -> Self {
        Self {
            renderer,
            store,
            options,
        }
    }

    /// Slices of the compressed page at `url`, rendering it on a cache miss
    pub async fn get_chunks(&self, url: &str) -> Result<Vec<String>> {
        let key = chunk_key(url);

        if let Some(Some(cached)) = self.store.get(&key).await.advisory("get", &key) {
            match serde_json::from_str::<Vec<String>>(&cached) {
                Ok(chunks) => {
                    log::debug!("fragment cache hit for {} ({} chunks)", url, chunks.len());
                    return Ok(chunks);
                }
                Err(e) => log::warn!("discarding corrupt fragment cache entry {}: {}", key, e),
            }
        }

        let text = self.renderer.render_compressed(url).await?;
        let chunks = chunk_text(&text, self.options.chunk_size);
        log::info!(
            "cached {} as {} chunks ({} chars)",
            url,
            chunks.len(),
            text.len()
        );

        let encoded = serde_json::to_string(&chunks)?;
        let _ = self
            .store
            .set(&key, &encoded, self.options.cache_ttl)
            .await
            .advisory("set", &key);

        Ok(chunks)
    }
}

#[async_trait]
impl FragmentSource for ChunkStore {
    async fn fragment(
        &self,
        address: &TunnelAddress,
    ) -> std::result::Result<Fragment, SourceError> {
        let chunks = self.get_chunks(&address.url).await.map_err(|e| {
            if e.is_recoverable() {
                SourceError::Timeout(e.to_string())
            } else {
                SourceError::Upstream(e.to_string())
            }
        })?;

        select_fragment(&chunks, address.page, self.options.part_limit)
            .map_err(|e| SourceError::Upstream(e.to_string()))
    }
}
