//! surf-dns - DNS TXT transport for the dnsurf tunnel
//!
//! [`TunnelServer`] answers TXT queries for `<address>.<page>.<suffix>`
//! names with one page fragment each. [`TunnelClient`] is the matching
//! query side.

mod client;
mod error;
mod server;

pub use client::{TunnelClient, TxtQuery, DEFAULT_DNS_PORT};
pub use error::{Error, Result, SourceError};
pub use server::{build_response, FragmentSource, TunnelServer};
