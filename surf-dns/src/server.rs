//! Tunnel DNS server
//!
//! Listens for TXT queries whose names carry a tunnel address and answers
//! each with one fragment of the addressed page.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{RData, Record};
use surf_protocol::{
    AddressCodec, Fragment, PagePayload, TunnelAddress, ANSWER_TTL_SECS, ERROR_NOTICE,
    TIMEOUT_NOTICE,
};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::error::{Error, Result, SourceError};

/// Maximum DNS message size for UDP
const MAX_DNS_MESSAGE_SIZE: usize = 4096;

/// Produces the fragment that answers one tunnel address
#[async_trait]
pub trait FragmentSource: Send + Sync {
    async fn fragment(&self, address: &TunnelAddress)
        -> std::result::Result<Fragment, SourceError>;
}

/// Tunnel DNS server
pub struct TunnelServer {
    /// Bind address
    bind_addr: SocketAddr,

    codec: AddressCodec,

    source: Arc<dyn FragmentSource>,

    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
}

impl TunnelServer {
    pub fn new(
        bind_addr: SocketAddr,
        codec: AddressCodec,
        source: Arc<dyn FragmentSource>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            bind_addr,
            codec,
            source,
            shutdown_rx,
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let socket = UdpSocket::bind(self.bind_addr).await.map_err(|e| {
            Error::Dns(format!(
                "failed to bind tunnel server to {}: {}",
                self.bind_addr, e
            ))
        })?;
        self.serve(socket).await
    }

    /// Serve on an already bound socket until shutdown
    pub async fn serve(mut self, socket: UdpSocket) -> Result<()> {
        log::info!(
            "tunnel server listening on {} for *.{}",
            socket.local_addr()?,
            self.codec.suffix()
        );

        let socket = Arc::new(socket);
        let codec = Arc::new(self.codec);
        let mut buf = vec![0u8; MAX_DNS_MESSAGE_SIZE];

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    log::info!("tunnel server shutting down");
                    break;
                }

                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let query = buf[..len].to_vec();
                            let socket = socket.clone();
                            let codec = codec.clone();
                            let source = self.source.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_query(&socket, &codec, source.as_ref(), &query, src).await {
                                    log::warn!("tunnel query from {} failed: {}", src, e);
                                }
                            });
                        }
                        Err(e) => {
                            log::error!("tunnel server recv error: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_query(
    socket: &UdpSocket,
    codec: &AddressCodec,
    source: &dyn FragmentSource,
    query: &[u8],
    src: SocketAddr,
) -> Result<()> {
    let response = build_response(codec, source, query).await?;
    socket
        .send_to(&response, src)
        .await
        .map_err(|e| Error::Dns(format!("failed to send DNS response: {}", e)))?;
    Ok(())
}

/// Answer one raw DNS query
///
/// Every parsable query gets exactly one answer, SERVFAIL when the answer
/// cannot be built. Unparsable input gets a header-only FORMERR when at
/// least its id can be read.
pub async fn build_response(
    codec: &AddressCodec,
    source: &dyn FragmentSource,
    query: &[u8],
) -> Result<Vec<u8>> {
    let request = match Message::from_vec(query) {
        Ok(request) => request,
        Err(e) => {
            log::debug!("unparsable DNS query: {}", e);
            return format_error(query);
        }
    };

    match answer_query(codec, source, &request).await {
        Ok(response) => Ok(response),
        Err(e) => {
            log::warn!("answering DNS query {} failed: {}", request.id(), e);
            server_failure(&request)
        }
    }
}

fn response_to(request: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_authoritative(true)
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(false)
        .set_response_code(code);
    response
}

async fn answer_query(
    codec: &AddressCodec,
    source: &dyn FragmentSource,
    request: &Message,
) -> Result<Vec<u8>> {
    let mut response = response_to(request, ResponseCode::NoError);

    let Some(question) = request.queries().first() else {
        log::debug!("DNS query {} has no question", request.id());
        return Ok(response.to_vec()?);
    };
    response.add_query(question.clone());

    let labels: Vec<String> = question
        .name()
        .iter()
        .map(|label| String::from_utf8_lossy(label).into_owned())
        .collect();

    let address = match codec.decode_labels(&labels) {
        Ok(address) => address,
        Err(e) => {
            log::debug!("ignoring query {}: {}", question.name(), e);
            return Ok(response.to_vec()?);
        }
    };

    let fragment = match source.fragment(&address).await {
        Ok(fragment) => fragment,
        Err(SourceError::Timeout(reason)) => {
            log::warn!("{} timed out: {}", address.url, reason);
            notice_fragment(TIMEOUT_NOTICE)?
        }
        Err(SourceError::Upstream(reason)) => {
            log::warn!("{} failed: {}", address.url, reason);
            notice_fragment(ERROR_NOTICE)?
        }
    };

    log::debug!(
        "answering {} page {} with fragment {}/{}",
        address.url,
        address.page,
        fragment.index,
        fragment.total
    );

    let txt = RData::TXT(TXT::new(vec![fragment.to_wire()]));
    response.add_answer(Record::from_rdata(
        question.name().clone(),
        ANSWER_TTL_SECS,
        txt,
    ));

    Ok(response.to_vec()?)
}

fn notice_fragment(message: &str) -> Result<Fragment> {
    Ok(Fragment::single(PagePayload::notice(message).compress()?))
}

/// SERVFAIL echoing the question
fn server_failure(request: &Message) -> Result<Vec<u8>> {
    let mut response = response_to(request, ResponseCode::ServFail);
    for question in request.queries() {
        response.add_query(question.clone());
    }
    Ok(response.to_vec()?)
}

fn format_error(query: &[u8]) -> Result<Vec<u8>> {
    let id = match query {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => return Err(Error::Dns("DNS query too short".into())),
    };

    let mut response = Message::new();
    response
        .set_id(id)
        .set_message_type(MessageType::Response)
        .set_response_code(ResponseCode::FormErr);
    Ok(response.to_vec()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};

    struct StaticSource(std::result::Result<Fragment, SourceError>);

    #[async_trait]
    impl FragmentSource for StaticSource {
        async fn fragment(
            &self,
            _address: &TunnelAddress,
        ) -> std::result::Result<Fragment, SourceError> {
            self.0.clone()
        }
    }

    fn query_for(labels: &[String]) -> Vec<u8> {
        let name = Name::from_labels(labels.iter().map(|l| l.as_bytes())).unwrap();
        let mut message = Message::new();
        message
            .set_id(4242)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        message.add_query(Query::query(name, RecordType::TXT));
        message.to_vec().unwrap()
    }

    fn txt_of(response: &Message) -> String {
        match response.answers()[0].data() {
            RData::TXT(txt) => txt
                .txt_data()
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
            other => panic!("expected TXT, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answers_with_fragment() {
        let codec = AddressCodec::default();
        let source = StaticSource(Ok(Fragment::new(2, 5, "abc")));
        let query = query_for(&codec.encode_labels("https://example.com/", 1));

        let bytes = build_response(&codec, &source, &query).await.unwrap();
        let response = Message::from_vec(&bytes).unwrap();

        assert_eq!(response.id(), 4242);
        assert_eq!(response.message_type(), MessageType::Response);
        assert!(response.authoritative());
        assert_eq!(response.queries().len(), 1);
        assert_eq!(response.answers().len(), 1);
        assert_eq!(response.answers()[0].ttl(), ANSWER_TTL_SECS);
        assert_eq!(txt_of(&response), "<|2/5|> abc");
    }

    #[tokio::test]
    async fn test_timeout_and_error_notices() {
        let codec = AddressCodec::default();
        let query = query_for(&codec.encode_labels("https://example.com/", 0));

        for (source, notice) in [
            (StaticSource(Err(SourceError::Timeout("slow".into()))), TIMEOUT_NOTICE),
            (StaticSource(Err(SourceError::Upstream("500".into()))), ERROR_NOTICE),
        ] {
            let bytes = build_response(&codec, &source, &query).await.unwrap();
            let frag = Fragment::parse(&txt_of(&Message::from_vec(&bytes).unwrap()));
            assert_eq!((frag.index, frag.total), (1, 1));
            assert_eq!(
                PagePayload::decompress(&frag.text).unwrap(),
                PagePayload::notice(notice)
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_name_gets_empty_answer() {
        let codec = AddressCodec::default();
        let source = StaticSource(Ok(Fragment::single("x")));
        let query = query_for(&["www".to_string(), "example".to_string(), "com".to_string()]);

        let bytes = build_response(&codec, &source, &query).await.unwrap();
        let response = Message::from_vec(&bytes).unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.queries().len(), 1);
        assert!(response.answers().is_empty());
    }

    #[test]
    fn test_server_failure_echoes_question() {
        let codec = AddressCodec::default();
        let query = query_for(&codec.encode_labels("https://example.com/", 3));
        let request = Message::from_vec(&query).unwrap();

        let response = Message::from_vec(&server_failure(&request).unwrap()).unwrap();
        assert_eq!(response.id(), 4242);
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert_eq!(response.queries(), request.queries());
        assert!(response.answers().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_gets_formerr() {
        let codec = AddressCodec::default();
        let source = StaticSource(Ok(Fragment::single("x")));

        let bytes = build_response(&codec, &source, &[0x12, 0x34, 0xff])
            .await
            .unwrap();
        let response = Message::from_vec(&bytes).unwrap();
        assert_eq!(response.id(), 0x1234);
        assert_eq!(response.response_code(), ResponseCode::FormErr);

        assert!(build_response(&codec, &source, &[0x01]).await.is_err());
    }
}
