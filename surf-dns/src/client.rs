//! Tunnel query client
//!
//! Sends one TXT question per call to the tunnel server and returns the
//! concatenated TXT strings of the answer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Default DNS port
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Maximum UDP DNS response size
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// Issues TXT queries for tunnel names
#[async_trait]
pub trait TxtQuery: Send + Sync {
    /// Query `qname` and return its TXT answer text, empty if there is none
    async fn send_query(&self, qname: &str, timeout: Duration) -> Result<String>;
}

/// UDP client for one tunnel server
pub struct TunnelClient {
    /// `host` or `host:port`
    server: String,

    /// Kept after the first answered query
    resolved: RwLock<Option<SocketAddr>>,
}

impl TunnelClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            resolved: RwLock::new(None),
        }
    }

    /// Client for an already known server address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            server: addr.to_string(),
            resolved: RwLock::new(Some(addr)),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    async fn server_addr(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.resolved.read().ok().and_then(|guard| *guard) {
            return Ok(addr);
        }

        let target = with_default_port(&self.server);
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| Error::Dns(format!("failed to resolve {}: {}", target, e)))?
            .next()
            .ok_or_else(|| Error::Dns(format!("no address for {}", target)))?;

        log::debug!("resolved tunnel server {} to {}", self.server, addr);
        Ok(addr)
    }

    fn remember(&self, addr: SocketAddr) {
        if let Ok(mut guard) = self.resolved.write() {
            if guard.is_none() {
                *guard = Some(addr);
            }
        }
    }
}

#[async_trait]
impl TxtQuery for TunnelClient {
    async fn send_query(&self, qname: &str, timeout: Duration) -> Result<String> {
        let addr = self.server_addr().await?;
        let id: u16 = rand::random();
        let query = build_query(id, qname)?;

        let bind_addr = if addr.is_ipv6() {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::Dns(format!("failed to bind UDP socket: {}", e)))?;

        socket
            .send_to(&query, addr)
            .await
            .map_err(|e| Error::Dns(format!("failed to send DNS query: {}", e)))?;

        let response = tokio::time::timeout(timeout, recv_response(&socket, addr, id))
            .await
            .map_err(|_| Error::Timeout(format!("{} after {:?}", qname, timeout)))??;

        self.remember(addr);
        Ok(txt_text(&response))
    }
}

/// Wait for the response carrying `id`, dropping stray datagrams
async fn recv_response(socket: &UdpSocket, server: SocketAddr, id: u16) -> Result<Message> {
    let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
    loop {
        let (len, src) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| Error::Dns(format!("failed to receive DNS response: {}", e)))?;

        if src != server {
            log::trace!("dropping datagram from unexpected peer {}", src);
            continue;
        }

        match Message::from_vec(&buf[..len]) {
            Ok(message) if message.id() == id && message.message_type() == MessageType::Response => {
                return Ok(message);
            }
            Ok(message) => log::trace!("dropping unrelated DNS message {}", message.id()),
            Err(e) => log::trace!("dropping unparsable DNS response: {}", e),
        }
    }
}

fn build_query(id: u16, qname: &str) -> Result<Vec<u8>> {
    let name = Name::from_labels(
        qname
            .trim_end_matches('.')
            .split('.')
            .filter(|label| !label.is_empty())
            .map(str::as_bytes),
    )?;

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(name, RecordType::TXT));
    Ok(message.to_vec()?)
}

/// Concatenated TXT strings of every TXT answer
fn txt_text(message: &Message) -> String {
    let mut text = String::new();
    for answer in message.answers() {
        if let RData::TXT(txt) = answer.data() {
            for part in txt.txt_data() {
                text.push_str(&String::from_utf8_lossy(part));
            }
        }
    }
    text
}

fn with_default_port(server: &str) -> String {
    if server.parse::<SocketAddr>().is_ok() {
        return server.to_string();
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_DNS_PORT).to_string();
    }
    match server.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => server.to_string(),
        _ => format!("{}:{}", server, DEFAULT_DNS_PORT),
    }
}
