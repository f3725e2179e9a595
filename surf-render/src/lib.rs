//! surf-render - turns live web pages into compact tunnel payloads
//!
//! The [`PageRenderer`] fetches a page, strips it down to the shared
//! vocabulary, compacts the body into a [`surf_protocol::CompactNode`] tree and
//! inlines what styling it can: a purged and minified stylesheet plus sanitized
//! SVG images. Secondary resources go through an advisory [`KvStore`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use surf_render::{HttpFetcher, MemoryStore, PageRenderer, RenderOptions, DEFAULT_USER_AGENT};
//!
//! # async fn example() -> surf_render::Result<()> {
//! let fetcher = Arc::new(HttpFetcher::new(DEFAULT_USER_AGENT)?);
//! let store = Arc::new(MemoryStore::default());
//! let renderer = PageRenderer::new(fetcher, store, RenderOptions::default());
//!
//! let payload = renderer.render("https://example.com/").await?;
//! println!("{} nodes", payload.dom.len());
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod compact;
pub mod css;
pub mod error;
mod fetch;
mod pipeline;
pub mod sanitize;
pub mod svg;

pub use cache::{
    resource_key, sha256_hex, CacheResult, KvStore, MemoryStore, StoreStats, DEFAULT_MAX_ENTRIES,
};
pub use error::{Error, Result};
pub use fetch::{
    parse_max_age, Fetcher, HttpFetcher, Resource, CSS_ACCEPT, DEFAULT_USER_AGENT, HTML_ACCEPT,
    SVG_ACCEPT,
};
pub use pipeline::{PageRenderer, RenderOptions, RenderPage};
pub use sanitize::{escape_attr, escape_text, sanitize_html};
