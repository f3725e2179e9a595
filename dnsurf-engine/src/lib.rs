//! dnsurf engine
//!
//! Ties the protocol, render and transport crates into the two halves of
//! the tunnel, for use by the CLI or any other front end.
//!
//! # Architecture
//!
//! ```text
//!   client                                       server
//! ┌──────────────────────┐   TXT over UDP   ┌──────────────────────────┐
//! │ PageFetcher          │ ───────────────▶ │ TunnelServer (surf-dns)  │
//! │  - first fragment    │                  │   └─ ChunkStore          │
//! │  - bounded pool      │ ◀─────────────── │       ├─ KvStore cache   │
//! │  - PageCache         │   <|i/n|> text   │       └─ PageRenderer    │
//! │ view::render_document│                  │          (surf-render)   │
//! └──────────────────────┘                  └──────────────────────────┘
//! ```

pub mod app;
pub mod chunks;
pub mod config;
pub mod error;
pub mod page_cache;
pub mod reassembly;
pub mod view;

pub use app::{build_client, build_server};
pub use chunks::{chunk_key, ChunkOptions, ChunkStore};
pub use config::{ClientConfig, CommonConfig, Config, ServerConfig};
pub use error::{Error, Result};
pub use page_cache::{normalize_url, PageCache, PageCacheStats};
pub use reassembly::{Assembly, FetchOptions, PageFetcher, Progress};
pub use view::{decode_payload, render_document, SANDBOX_POLICY};
