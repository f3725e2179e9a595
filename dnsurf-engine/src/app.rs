//! Wiring of the server and client sides from a [`Config`]

use std::sync::Arc;

use surf_dns::{TunnelClient, TunnelServer};
use surf_protocol::AddressCodec;
use surf_render::{HttpFetcher, MemoryStore, PageRenderer};
use tokio::sync::broadcast;

use crate::chunks::{ChunkOptions, ChunkStore};
use crate::config::Config;
use crate::error::Result;
use crate::page_cache::PageCache;
use crate::reassembly::PageFetcher;

/// Tunnel server with a live renderer and an in-memory cache
pub fn build_server(config: &Config, shutdown_rx: broadcast::Receiver<()>) -> Result<TunnelServer> {
    let server = &config.server;

    let fetcher = Arc::new(HttpFetcher::new(&server.user_agent)?);
    let store = Arc::new(MemoryStore::new(server.cache_entries));
    let renderer = Arc::new(PageRenderer::new(fetcher, store.clone(), server.render_options()));
    let chunks = Arc::new(ChunkStore::new(renderer, store, ChunkOptions::from(server)));

    Ok(TunnelServer::new(
        server.listen_addr()?,
        AddressCodec::new(&config.common.suffix_domain),
        chunks,
        shutdown_rx,
    ))
}

/// Page fetcher talking to `dns_server`, or the configured server
pub fn build_client(config: &Config, dns_server: Option<&str>) -> PageFetcher {
    let client = &config.client;
    let server = dns_server.unwrap_or(&client.dns_server);

    PageFetcher::new(
        Arc::new(TunnelClient::new(server)),
        AddressCodec::new(&config.common.suffix_domain),
        PageCache::new(client.page_cache_size, client.page_cache_ttl()),
        client.fetch_options(),
    )
}
