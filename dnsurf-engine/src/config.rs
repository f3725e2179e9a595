//! Configuration types for the dnsurf engine

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surf_protocol::{
    Fragment, DEFAULT_CHUNK_SIZE, DEFAULT_PART_LIMIT, DEFAULT_SUFFIX_DOMAIN, TXT_MAX_BYTES,
};
use surf_render::RenderOptions;

use crate::error::{Error, Result};
use crate::reassembly::FetchOptions;

/// Main configuration structure
///
/// The configuration file uses TOML format. Every field has a default, so an
/// empty file (or no file at all) is a valid configuration. Environment
/// variables are applied on top with [`Config::apply_env`].
///
/// # Example Configuration
///
/// ```toml
/// [common]
/// suffix_domain = "dns.me"
///
/// [server]
/// listen = "0.0.0.0"
/// port = 53
/// cache_ttl = 300
///
/// [client]
/// dns_server = "tunnel.example.com"
/// parallel_requests = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Settings both ends must agree on
    #[serde(default)]
    pub common: CommonConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise start from defaults
    ///
    /// Environment overrides are applied in both cases.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            log::debug!("config file {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, then re-validate
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let common = &mut self.common;
        let server = &mut self.server;
        let client = &mut self.client;

        if let Some(domain) = lookup("APP_DNS_DOMAIN") {
            common.suffix_domain = domain;
        }
        override_parsed(&lookup, "PORT", &mut server.port)?;
        override_parsed(&lookup, "PAGE_PARTS_LIMIT", &mut server.part_limit)?;
        override_parsed(&lookup, "PAGE_CACHE_TTL", &mut server.cache_ttl)?;
        override_parsed(&lookup, "FETCH_TIMEOUT_MS", &mut server.fetch_timeout_ms)?;
        override_parsed(&lookup, "RESOURCE_TIMEOUT_MS", &mut server.resource_timeout_ms)?;
        override_parsed(&lookup, "CSS_MAX_AGE", &mut server.css_max_age)?;
        override_parsed(&lookup, "IMG_MAX_AGE", &mut server.img_max_age)?;
        override_parsed(&lookup, "MAX_INLINE_SVG_SIZE", &mut server.max_inline_svg_size)?;
        override_parsed(&lookup, "MAX_SVG_FETCH", &mut server.max_svg_fetch)?;
        if let Some(ua) = lookup("FETCH_UA") {
            server.user_agent = ua;
        }

        if let Some(dns_server) = lookup("APP_DNS_SERVER") {
            client.dns_server = dns_server;
        }
        override_parsed(&lookup, "MAX_FETCH_ATTEMPTS", &mut client.max_fetch_attempts)?;
        override_parsed(&lookup, "RETRY_BASE_DELAY_MS", &mut client.retry_base_delay_ms)?;
        override_parsed(&lookup, "DNS_TIMEOUT_MS", &mut client.dns_timeout_ms)?;
        override_parsed(&lookup, "PAGE_CACHE_SIZE", &mut client.page_cache_size)?;
        override_parsed(&lookup, "PAGE_CACHE_TTL_SECS", &mut client.page_cache_ttl)?;
        override_parsed(&lookup, "MAX_PARALLEL_DNS_REQUESTS", &mut client.parallel_requests)?;

        self.validate()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.server.validate()?;
        self.client.validate()
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# dnsurf configuration
#
# Every setting is optional. Environment variables listed next to a setting
# override the file.

[common]
# Domain the tunnel server is authoritative for (APP_DNS_DOMAIN)
suffix_domain = "dns.me"

# Log level: "error", "warn", "info", "debug", "trace"
log_level = "info"

[server]
# Address and port to answer DNS queries on (PORT)
listen = "0.0.0.0"
port = 53

# Characters of compressed payload per TXT answer
chunk_size = 240

# Pages that need more fragments than this are answered with a notice (PAGE_PARTS_LIMIT)
part_limit = 300

# Seconds a rendered page stays in the fragment cache (PAGE_CACHE_TTL)
cache_ttl = 300

# Maximum entries in the in-memory fragment and resource cache
cache_entries = 1000

# Page fetch timeout and stylesheet/image fetch timeout, in milliseconds
# (FETCH_TIMEOUT_MS, RESOURCE_TIMEOUT_MS)
fetch_timeout_ms = 30000
resource_timeout_ms = 15000

# Default cache lifetime of stylesheets and images without Cache-Control max-age
# (CSS_MAX_AGE, IMG_MAX_AGE)
css_max_age = 600
img_max_age = 3600

# SVG inlining limits (MAX_INLINE_SVG_SIZE, MAX_SVG_FETCH)
max_inline_svg_size = 32768
max_svg_fetch = 20

# User-Agent for upstream requests (FETCH_UA)
# user_agent = "Mozilla/5.0 ..."

[client]
# Tunnel server, "host" or "host:port" (APP_DNS_SERVER)
dns_server = "127.0.0.1"

# First fragment retries (MAX_FETCH_ATTEMPTS, RETRY_BASE_DELAY_MS, DNS_TIMEOUT_MS)
max_fetch_attempts = 3
retry_base_delay_ms = 120
dns_timeout_ms = 8000

# Extra timeout added per retry of the first fragment
retry_timeout_step_ms = 2000

# Timeout of each remaining fragment
fragment_timeout_ms = 8000

# Fragments in flight at once (MAX_PARALLEL_DNS_REQUESTS)
parallel_requests = 3

# Decoded page cache (PAGE_CACHE_SIZE, PAGE_CACHE_TTL_SECS)
page_cache_size = 50
page_cache_ttl = 300
"#
        .to_string()
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *field = raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}

/// Settings shared between server and client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    #[serde(default = "default_suffix_domain")]
    pub suffix_domain: String,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            suffix_domain: default_suffix_domain(),
            log_level: default_log_level(),
        }
    }
}

impl CommonConfig {
    pub fn validate(&self) -> Result<()> {
        let suffix = self.suffix_domain.trim_matches('.');
        if suffix.is_empty() {
            return Err(Error::Config("suffix_domain must not be empty".into()));
        }
        if suffix.split('.').any(|label| label.is_empty() || label.len() > 63) {
            return Err(Error::Config(format!(
                "suffix_domain {:?} is not a valid domain name",
                self.suffix_domain
            )));
        }
        Ok(())
    }
}

/// Tunnel server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_dns_port")]
    pub port: u16,

    /// Characters of compressed payload per fragment
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Fragment count above which a page is answered with a notice
    #[serde(default = "default_part_limit")]
    pub part_limit: usize,

    /// Fragment cache lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_resource_timeout_ms")]
    pub resource_timeout_ms: u64,

    /// Seconds
    #[serde(default = "default_css_max_age")]
    pub css_max_age: u64,

    /// Seconds
    #[serde(default = "default_img_max_age")]
    pub img_max_age: u64,

    /// Bytes
    #[serde(default = "default_max_inline_svg_size")]
    pub max_inline_svg_size: usize,

    #[serde(default = "default_max_svg_fetch")]
    pub max_svg_fetch: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_dns_port(),
            chunk_size: default_chunk_size(),
            part_limit: default_part_limit(),
            cache_ttl: default_cache_ttl(),
            cache_entries: default_cache_entries(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            resource_timeout_ms: default_resource_timeout_ms(),
            css_max_age: default_css_max_age(),
            img_max_age: default_img_max_age(),
            max_inline_svg_size: default_max_inline_svg_size(),
            max_svg_fetch: default_max_svg_fetch(),
            user_agent: default_user_agent(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.part_limit == 0 {
            return Err(Error::Config("part_limit must be at least 1".into()));
        }

        let widest = u32::try_from(self.part_limit).map_err(|_| {
            Error::Config(format!(
                "part_limit {} must be at most {}",
                self.part_limit,
                u32::MAX
            ))
        })?;

        // the widest header plus a full chunk must fit one TXT string
        let header = Fragment::new(widest, widest, "").header();
        let max_chunk = TXT_MAX_BYTES.saturating_sub(header.len());
        if self.chunk_size == 0 || self.chunk_size > max_chunk {
            return Err(Error::Config(format!(
                "chunk_size {} must be between 1 and {} for part_limit {}",
                self.chunk_size, max_chunk, self.part_limit
            )));
        }
        if self.cache_entries == 0 {
            return Err(Error::Config("cache_entries must be at least 1".into()));
        }
        if self.fetch_timeout_ms == 0 || self.resource_timeout_ms == 0 {
            return Err(Error::Config("fetch timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Socket address the tunnel server binds
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listen
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address {:?}: {}", self.listen, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    /// Render limits derived from this configuration
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            resource_timeout: Duration::from_millis(self.resource_timeout_ms),
            css_max_age: Duration::from_secs(self.css_max_age),
            img_max_age: Duration::from_secs(self.img_max_age),
            max_inline_svg_size: self.max_inline_svg_size,
            max_svg_fetch: self.max_svg_fetch,
        }
    }
}

/// Tunnel client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Tunnel server, `host` or `host:port`
    #[serde(default = "default_dns_server")]
    pub dns_server: String,

    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,

    #[serde(default = "default_retry_timeout_step_ms")]
    pub retry_timeout_step_ms: u64,

    #[serde(default = "default_fragment_timeout_ms")]
    pub fragment_timeout_ms: u64,

    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,

    #[serde(default = "default_page_cache_size")]
    pub page_cache_size: usize,

    /// Seconds
    #[serde(default = "default_page_cache_ttl")]
    pub page_cache_ttl: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dns_server: default_dns_server(),
            max_fetch_attempts: default_max_fetch_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            dns_timeout_ms: default_dns_timeout_ms(),
            retry_timeout_step_ms: default_retry_timeout_step_ms(),
            fragment_timeout_ms: default_fragment_timeout_ms(),
            parallel_requests: default_parallel_requests(),
            page_cache_size: default_page_cache_size(),
            page_cache_ttl: default_page_cache_ttl(),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Result<()> {
        if self.dns_server.trim().is_empty() {
            return Err(Error::Config("dns_server is required".into()));
        }
        if self.max_fetch_attempts == 0 {
            return Err(Error::Config("max_fetch_attempts must be at least 1".into()));
        }
        if self.parallel_requests == 0 {
            return Err(Error::Config("parallel_requests must be at least 1".into()));
        }
        if self.page_cache_size == 0 {
            return Err(Error::Config("page_cache_size must be at least 1".into()));
        }
        if self.dns_timeout_ms == 0 || self.fragment_timeout_ms == 0 {
            return Err(Error::Config("DNS timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Reassembly settings derived from this configuration
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_fetch_attempts: self.max_fetch_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            dns_timeout: Duration::from_millis(self.dns_timeout_ms),
            retry_timeout_step: Duration::from_millis(self.retry_timeout_step_ms),
            fragment_timeout: Duration::from_millis(self.fragment_timeout_ms),
            parallel_requests: self.parallel_requests,
        }
    }

    pub fn page_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.page_cache_ttl)
    }
}

fn default_suffix_domain() -> String {
    DEFAULT_SUFFIX_DOMAIN.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_dns_port() -> u16 {
    53
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_part_limit() -> usize {
    DEFAULT_PART_LIMIT
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_entries() -> usize {
    surf_render::DEFAULT_MAX_ENTRIES
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_resource_timeout_ms() -> u64 {
    15_000
}

fn default_css_max_age() -> u64 {
    600
}

fn default_img_max_age() -> u64 {
    3600
}

fn default_max_inline_svg_size() -> usize {
    surf_render::svg::DEFAULT_MAX_INLINE_SVG_SIZE
}

fn default_max_svg_fetch() -> usize {
    surf_render::svg::DEFAULT_MAX_SVG_FETCH
}

fn default_user_agent() -> String {
    surf_render::DEFAULT_USER_AGENT.to_string()
}

fn default_dns_server() -> String {
    "127.0.0.1".to_string()
}

fn default_max_fetch_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    120
}

fn default_dns_timeout_ms() -> u64 {
    8000
}

fn default_retry_timeout_step_ms() -> u64 {
    2000
}

fn default_fragment_timeout_ms() -> u64 {
    8000
}

fn default_parallel_requests() -> usize {
    3
}

fn default_page_cache_size() -> usize {
    50
}

fn default_page_cache_ttl() -> u64 {
    300
}
