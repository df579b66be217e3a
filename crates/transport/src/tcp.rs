// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::rt::{Read as HyperRead, ReadBufCursor, Write as HyperWrite};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::{RoundTrip, TlsConfig, TransportError};

const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP/2-over-TLS-over-TCP transport for DNS-over-HTTPS.
///
/// Negotiates HTTP/2 via ALPN whenever possible (see [`TlsConfig::build`]);
/// a custom dialer substitutes a bootstrap IP and/or a source IP while
/// leaving the TLS server name — and therefore SNI and certificate
/// verification — tied to the original hostname. Honors `HTTPS_PROXY`/
/// `https_proxy` and `NO_PROXY`/`no_proxy` from the environment.
pub struct TcpHttpsTransport {
    client: Client<Dialer, Full<Bytes>>,
}

/// Builder for [`TcpHttpsTransport`].
#[derive(Default)]
pub struct TcpHttpsTransportBuilder {
    bootstrap: Option<IpAddr>,
    source: Option<IpAddr>,
    tls: TlsConfig,
}

impl TcpHttpsTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip resolving the upstream hostname; dial this IP instead. The
    /// hostname is still used for SNI and certificate verification.
    pub fn bootstrap(mut self, ip: IpAddr) -> Self {
        self.bootstrap = Some(ip);
        self
    }

    /// Pin the local address used for outbound connections.
    pub fn source(mut self, ip: IpAddr) -> Self {
        self.source = Some(ip);
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn build(self) -> Result<TcpHttpsTransport, TransportError> {
        let tls_config = self.tls.build(&[b"h2", b"http/1.1"])?;
        let dialer = Dialer {
            bootstrap: self.bootstrap,
            source: self.source,
            tls_connector: TlsConnector::from(Arc::new(tls_config)),
            proxy: env_https_proxy(),
            no_proxy: no_proxy_hosts(),
        };
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build(dialer);
        Ok(TcpHttpsTransport { client })
    }
}

#[async_trait]
impl RoundTrip for TcpHttpsTransport {
    async fn round_trip(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, TransportError> {
        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, Full::new(body));

        let response = tokio::time::timeout(RESPONSE_HEADER_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| TransportError::ResponseTimeout)?
            .map_err(|e| TransportError::Client(Box::new(e)))?;

        let (parts, body) = response.into_parts();
        let collected = body
            .collect()
            .await
            .map_err(|e| TransportError::Client(Box::new(e)))?;
        Ok(Response::from_parts(parts, collected.to_bytes()))
    }
}

/// The custom dialer backing [`TcpHttpsTransport`]. Implements
/// `tower_service::Service<Uri>`, the shape `hyper_util`'s legacy client
/// expects of its connector.
#[derive(Clone)]
struct Dialer {
    bootstrap: Option<IpAddr>,
    source: Option<IpAddr>,
    tls_connector: TlsConnector,
    proxy: Option<Uri>,
    no_proxy: Vec<String>,
}

impl tower_service::Service<Uri> for Dialer {
    type Response = HttpsIo;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<HttpsIo, TransportError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.connect(uri).await })
    }
}

impl Dialer {
    async fn connect(&self, uri: Uri) -> Result<HttpsIo, TransportError> {
        let host = uri.host().ok_or(TransportError::MissingHost)?.to_string();
        let port = uri.port_u16().unwrap_or(443);

        let bypass_proxy = self
            .no_proxy
            .iter()
            .any(|entry| entry == &host.to_ascii_lowercase());

        let tcp = match self.proxy.clone().filter(|_| !bypass_proxy) {
            Some(proxy) => self.connect_through_proxy(&proxy, &host, port).await?,
            None => {
                let dial_host = dial_target(self.bootstrap, &host);
                self.dial(&dial_host, port).await?
            }
        };

        // TLS always verifies against the original hostname, even when we
        // dialed a bootstrap IP or tunneled through a proxy.
        let server_name = ServerName::try_from(host)?.to_owned();
        let tls = self.tls_connector.connect(server_name, tcp).await?;
        Ok(HttpsIo::new(tls))
    }

    async fn connect_through_proxy(
        &self,
        proxy: &Uri,
        host: &str,
        port: u16,
    ) -> Result<TcpStream, TransportError> {
        let proxy_host = proxy.host().ok_or(TransportError::MissingHost)?;
        let proxy_port = proxy.port_u16().unwrap_or(80);
        let mut tcp = self.dial(proxy_host, proxy_port).await?;

        debug!(%proxy, target = %host, "tunneling through HTTPS_PROXY via CONNECT");
        let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
        tcp.write_all(request.as_bytes()).await?;

        let mut buf = Vec::with_capacity(256);
        let mut chunk = [0u8; 256];
        loop {
            let n = tcp.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::ProxyConnectFailed);
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let status_line = buf.split(|&b| b == b'\n').next().unwrap_or(&[]);
        if !status_line.windows(3).any(|w| w == b"200") {
            return Err(TransportError::ProxyConnectFailed);
        }
        Ok(tcp)
    }

    async fn dial(&self, dial_host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let mut addrs = tokio::net::lookup_host((dial_host, port)).await?;
        let addr = addrs
            .next()
            .ok_or_else(|| TransportError::NoAddress(dial_host.to_string()))?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(source) = self.source {
            socket.bind(SocketAddr::new(source, 0))?;
        }
        Ok(socket.connect(addr).await?)
    }
}

/// The address actually dialed for `host`: the bootstrap IP if one is
/// configured, otherwise `host` itself. TLS always authenticates against
/// `host`, independent of this choice — see [`Dialer::connect`].
fn dial_target(bootstrap: Option<IpAddr>, host: &str) -> String {
    bootstrap.map(|ip| ip.to_string()).unwrap_or_else(|| host.to_string())
}

fn env_https_proxy() -> Option<Uri> {
    std::env::var("HTTPS_PROXY")
        .or_else(|_| std::env::var("https_proxy"))
        .ok()
        .and_then(|value| value.parse().ok())
}

fn no_proxy_hosts() -> Vec<String> {
    std::env::var("NO_PROXY")
        .or_else(|_| std::env::var("no_proxy"))
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// TLS-over-TCP I/O handle reported back to `hyper_util`'s connection pool,
/// which needs [`Connection::connected`] to know whether ALPN settled on
/// HTTP/2 so it can multiplex rather than queue requests.
struct HttpsIo {
    io: TokioIo<TlsStream<TcpStream>>,
    negotiated_h2: bool,
}

impl HttpsIo {
    fn new(tls: TlsStream<TcpStream>) -> Self {
        let negotiated_h2 = tls.get_ref().1.alpn_protocol() == Some(b"h2");
        Self {
            io: TokioIo::new(tls),
            negotiated_h2,
        }
    }
}

impl Connection for HttpsIo {
    fn connected(&self) -> Connected {
        let connected = Connected::new();
        if self.negotiated_h2 {
            connected.negotiated_h2()
        } else {
            connected
        }
    }
}

impl HyperRead for HttpsIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl HyperWrite for HttpsIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write_vectored(cx, bufs)
    }
}
