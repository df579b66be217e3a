// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! HTTPS transports for dnsmux: HTTP/2 over TLS over TCP ([`tcp`]) and HTTP/3
//! over QUIC ([`quic`]), sharing a single [`RoundTrip`] boundary so the DoH
//! client above them doesn't need to know which is underneath.

mod quic;
mod tcp;
mod tls;

pub use quic::{QuicHttpsTransport, QuicHttpsTransportBuilder, SelfHealingSession};
pub use tcp::{TcpHttpsTransport, TcpHttpsTransportBuilder};
pub use tls::TlsConfig;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

/// Capability shared by both HTTPS transport kinds: perform one
/// request/response round trip carrying an opaque byte body.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    /// Send `request` and return the full response with its body collected.
    async fn round_trip(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, TransportError>;
}

/// Errors produced while dialing or round-tripping an HTTPS transport.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid server name: {0}")]
    InvalidServerName(#[from] rustls_pki_types::InvalidDnsNameError),

    #[error("request timed out waiting for a response")]
    ResponseTimeout,

    #[error("QUIC connect error: {0}")]
    QuicConnect(#[from] quinn::ConnectError),

    #[error("QUIC connection error: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),

    #[error("HTTP/3 error: {0}")]
    H3(#[from] h3::error::StreamError),

    #[error("HTTP/3 connection error: {0}")]
    H3Connection(#[from] h3::error::ConnectionError),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("HTTP client error: {0}")]
    Client(Box<dyn std::error::Error + Send + Sync>),

    #[error("no address resolved for {0}")]
    NoAddress(String),

    #[error("missing host in URI")]
    MissingHost,

    #[error("CONNECT through proxy failed")]
    ProxyConnectFailed,
}
