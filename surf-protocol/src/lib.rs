//! dnsurf wire protocol
//!
//! Everything both ends of the tunnel must agree on:
//!
//! - [`AddressCodec`] maps a URL and page offset to a DNS query name and back
//! - [`Tag`] and [`Attr`] form the shared vocabulary of the compact tree
//! - [`PagePayload`] is the compact page itself, shipped through [`codec`]
//! - [`Fragment`] frames one TXT-sized slice of a compressed page
//!
//! ```rust
//! use surf_protocol::{chunk_text, select_fragment, AddressCodec, Fragment, PagePayload};
//!
//! let codec = AddressCodec::default();
//! let qname = codec.encode("https://example.com/", 0);
//! assert_eq!(codec.decode(&qname).unwrap().page, 0);
//!
//! let text = PagePayload::notice("hello").compress().unwrap();
//! let chunks = chunk_text(&text, 240);
//! let wire = select_fragment(&chunks, 0, 300).unwrap().to_wire();
//! assert_eq!(Fragment::parse(&wire).text, chunks[0]);
//! ```

mod address;
pub mod codec;
mod error;
mod fragment;
mod payload;
mod vocab;

pub use address::{
    is_http_url, AddressCodec, TunnelAddress, DEFAULT_SUFFIX_DOMAIN, FALLBACK_URL,
    MAX_LABEL_CHARS,
};
pub use error::{Error, Result};
pub use fragment::{
    chunk_text, select_fragment, Fragment, DEFAULT_CHUNK_SIZE, DEFAULT_PART_LIMIT, TXT_MAX_BYTES,
};
pub use payload::{
    CompactNode, ElementNode, PagePayload, ERROR_NOTICE, PAGE_TOO_LARGE, TIMEOUT_NOTICE,
};
pub use vocab::{Attr, Tag, VOCABULARY_VERSION};

/// TTL of every tunnel answer, in seconds
pub const ANSWER_TTL_SECS: u32 = 30;
