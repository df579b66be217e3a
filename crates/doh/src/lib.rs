// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A DNS-over-HTTPS [`Resolver`](dnsmux_core::Resolver) implementation: packs
//! a query to wire format, sends it as a `GET` or `POST` against an RFC 6570
//! URI template, and unpacks the response — over whichever
//! [`RoundTrip`](dnsmux_transport::RoundTrip) transport it was built with.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dnsmux_core::{pad_query, ClientContext, Metrics, ResolveError, Resolver, DEFAULT_BLOCK_SIZE};
use dnsmux_transport::{RoundTrip, TransportError};
use hickory_proto::op::Message;
use http::{Request, Response, Uri};
use iri_string::spec::UriSpec;
use iri_string::template::simple_context::SimpleContext;
use iri_string::template::UriTemplateString;
use tracing::debug;

const DNS_MESSAGE_MIME: &str = "application/dns-message";

/// HTTP method a [`DohClient`] sends queries with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Parse a configured method string. Empty defaults to `POST`.
    pub fn parse(value: &str) -> Result<Self, DohConfigError> {
        match value {
            "" | "POST" | "post" => Ok(Self::Post),
            "GET" | "get" => Ok(Self::Get),
            other => Err(DohConfigError::UnknownMethod(other.to_string())),
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Self::Post
    }
}

/// Construction-time configuration errors for [`DohClient`].
#[derive(thiserror::Error, Debug)]
pub enum DohConfigError {
    #[error("unknown DoH method {0:?}, expected GET or POST")]
    UnknownMethod(String),

    #[error("invalid URI template: {0}")]
    InvalidTemplate(String),
}

/// A DNS-over-HTTPS client resolver.
///
/// Built from an RFC 6570 URI template, a [`Method`] and any
/// [`RoundTrip`](dnsmux_transport::RoundTrip) transport — typically a
/// `TcpHttpsTransport` or `QuicHttpsTransport` from `dnsmux-transport`.
pub struct DohClient {
    id: Arc<str>,
    template: UriTemplateString,
    method: Method,
    transport: Arc<dyn RoundTrip>,
    metrics: Metrics,
}

/// Builder for [`DohClient`].
pub struct DohClientBuilder {
    id: Arc<str>,
    template: String,
    method: Method,
}

impl DohClientBuilder {
    pub fn new(id: impl Into<Arc<str>>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template: template.into(),
            method: Method::default(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Finish construction against the given transport.
    pub fn build(self, transport: Arc<dyn RoundTrip>) -> Result<DohClient, DohConfigError> {
        let template: UriTemplateString = self
            .template
            .parse()
            .map_err(|e: iri_string::template::Error| DohConfigError::InvalidTemplate(e.to_string()))?;

        Ok(DohClient {
            id: self.id.clone(),
            template,
            method: self.method,
            transport,
            metrics: Metrics::new("client", self.id),
        })
    }
}

#[async_trait]
impl Resolver for DohClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, mut query: Message, _ctx: &ClientContext) -> Result<Message, ResolveError> {
        pad_query(&mut query, DEFAULT_BLOCK_SIZE).map_err(ResolveError::Pack)?;
        self.metrics.query_add(1);

        let result = match self.method {
            Method::Post => self.resolve_post(&query).await,
            Method::Get => self.resolve_get(&query).await,
        };

        match &result {
            Ok(response) => {
                self.metrics
                    .response_add(response.response_code().to_string(), 1);
            }
            Err(err) => {
                debug!(resolver = %self.id, error = %err, "doh query failed");
                self.metrics.err_add(&err.category(), 1);
            }
        }

        result
    }
}

impl DohClient {
    async fn resolve_post(&self, query: &Message) -> Result<Message, ResolveError> {
        let wire = query.to_vec().map_err(ResolveError::Pack)?;
        let uri = self.expand(None)?;

        let request = Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header(http::header::ACCEPT, DNS_MESSAGE_MIME)
            .header(http::header::CONTENT_TYPE, DNS_MESSAGE_MIME)
            .body(Bytes::from(wire))
            .map_err(|e| ResolveError::Http(e.to_string()))?;

        let response = self
            .transport
            .round_trip(request)
            .await
            .map_err(post_error)?;
        decode_response(response)
    }

    async fn resolve_get(&self, query: &Message) -> Result<Message, ResolveError> {
        let wire = query.to_vec().map_err(ResolveError::Pack)?;
        let encoded = data_encoding::BASE64URL_NOPAD.encode(&wire);
        let uri = self.expand(Some(&encoded))?;

        let request = Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .header(http::header::ACCEPT, DNS_MESSAGE_MIME)
            .body(Bytes::new())
            .map_err(|e| ResolveError::Http(e.to_string()))?;

        let response = self
            .transport
            .round_trip(request)
            .await
            .map_err(get_error)?;
        decode_response(response)
    }

    fn expand(&self, dns: Option<&str>) -> Result<Uri, ResolveError> {
        let mut context = SimpleContext::new();
        if let Some(dns) = dns {
            context.insert("dns", dns);
        }

        let expanded = self
            .template
            .as_ref()
            .expand::<UriSpec, _>(&context)
            .map_err(|e| ResolveError::Template(e.to_string()))?
            .to_string();

        expanded
            .parse::<Uri>()
            .map_err(|e| ResolveError::Template(e.to_string()))
    }
}

fn post_error(error: TransportError) -> ResolveError {
    ResolveError::Post(Box::new(error))
}

fn get_error(error: TransportError) -> ResolveError {
    ResolveError::Get(Box::new(error))
}

/// Check the status, validate a declared `Content-Length` against what the
/// transport actually delivered, and parse the body as a DNS message.
fn decode_response(response: Response<Bytes>) -> Result<Message, ResolveError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ResolveError::HttpStatus(status.as_u16()));
    }

    let declared_len = response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    let body = response.into_body();
    if let Some(len) = declared_len {
        if body.len() != len {
            return Err(ResolveError::Read(
                format!(
                    "declared content-length {len} but transport delivered {} bytes",
                    body.len()
                )
                .into(),
            ));
        }
    }

    Message::from_vec(&body).map_err(ResolveError::Unpack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{rdata::A, Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use std::sync::Mutex;

    #[test]
    fn method_defaults_to_post_on_empty_string() {
        assert_eq!(Method::parse("").unwrap(), Method::Post);
    }

    #[test]
    fn method_rejects_unknown_values() {
        assert!(Method::parse("PUT").is_err());
    }

    #[test]
    fn non_2xx_status_is_categorized_by_code() {
        let response = Response::builder().status(500).body(Bytes::new()).unwrap();
        let err = decode_response(response).unwrap_err();
        assert_eq!(err.category().to_string(), "http500");
    }

    #[test]
    fn content_length_mismatch_is_a_read_error() {
        let response = Response::builder()
            .status(200)
            .header(http::header::CONTENT_LENGTH, "10")
            .body(Bytes::from_static(b"short"))
            .unwrap();
        let err = decode_response(response).unwrap_err();
        assert_eq!(err.category().to_string(), "read");
    }

    struct Captured {
        method: http::Method,
        uri: String,
        body: Bytes,
    }

    /// A [`RoundTrip`] that never touches a socket: it records the request it
    /// was handed and answers with whatever `respond` builds, so the DoH
    /// request/response logic can be exercised without a live server.
    struct FakeTransport<F> {
        respond: F,
        captured: Mutex<Option<Captured>>,
    }

    impl<F> FakeTransport<F>
    where
        F: Fn() -> Response<Bytes> + Send + Sync,
    {
        fn new(respond: F) -> Self {
            Self {
                respond,
                captured: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl<F> RoundTrip for FakeTransport<F>
    where
        F: Fn() -> Response<Bytes> + Send + Sync,
    {
        async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
            let (parts, body) = request.into_parts();
            *self.captured.lock().unwrap() = Some(Captured {
                method: parts.method,
                uri: parts.uri.to_string(),
                body,
            });
            Ok((self.respond)())
        }
    }

    fn a_answer_wire(name: &str, ip: Ipv4Addr) -> Vec<u8> {
        let name = Name::from_str(name).unwrap();
        let mut message = Message::query();
        message.add_query(Query::query(name.clone(), RecordType::A));
        message.add_answer(Record::from_rdata(name, 60, RData::A(A(ip))));
        message.to_vec().unwrap()
    }

    fn a_query(name: &str) -> Message {
        let mut message = Message::query();
        message.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
        message
    }

    #[tokio::test]
    async fn post_happy_path_returns_the_single_answer() {
        test_support::subscribe();
        let wire = a_answer_wire("example.com.", Ipv4Addr::new(93, 184, 216, 34));
        let transport = Arc::new(FakeTransport::new(move || {
            Response::builder().status(200).body(Bytes::from(wire.clone())).unwrap()
        }));

        let doh = DohClientBuilder::new("t-post", "https://dns.example/dns-query")
            .method(Method::Post)
            .build(transport.clone())
            .unwrap();

        let response = doh.resolve(a_query("example.com."), &ClientContext::default()).await.unwrap();
        assert_eq!(response.answers().len(), 1);

        let captured = transport.captured.lock().unwrap().take().unwrap();
        assert_eq!(captured.method, http::Method::POST);
        assert_eq!(captured.uri, "https://dns.example/dns-query");
        assert!(!captured.body.is_empty(), "POST carries the query in the body");
    }

    #[tokio::test]
    async fn get_encodes_the_query_into_the_template_and_sends_no_body() {
        test_support::subscribe();
        let wire = a_answer_wire("a.", Ipv4Addr::new(192, 0, 2, 1));
        let transport = Arc::new(FakeTransport::new(move || {
            Response::builder().status(200).body(Bytes::from(wire.clone())).unwrap()
        }));

        let doh = DohClientBuilder::new("t-get", "https://dns.example/dns-query{?dns}")
            .method(Method::Get)
            .build(transport.clone())
            .unwrap();

        doh.resolve(a_query("a."), &ClientContext::default()).await.unwrap();

        let captured = transport.captured.lock().unwrap().take().unwrap();
        assert_eq!(captured.method, http::Method::GET);
        assert!(captured.body.is_empty(), "GET carries no body");
        let query_value = captured.uri.split("dns=").nth(1).expect("dns query param present");
        assert!(!query_value.contains('='), "base64url GET encoding must not be padded");
    }

    #[tokio::test]
    async fn upstream_500_is_an_error_and_produces_no_answer() {
        test_support::subscribe();
        let transport = Arc::new(FakeTransport::new(|| {
            Response::builder().status(500).body(Bytes::new()).unwrap()
        }));

        let doh = DohClientBuilder::new("t-500", "https://dns.example/dns-query")
            .build(transport)
            .unwrap();

        let err = doh
            .resolve(a_query("example.com."), &ClientContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.category().to_string(), "http500");
    }
}
