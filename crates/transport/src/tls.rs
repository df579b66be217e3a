// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

/// Caller-facing TLS configuration for an HTTPS transport.
///
/// Kept separate from `rustls::ClientConfig` so callers don't have to know
/// about ALPN wiring — see [`TlsConfig::build`].
#[derive(Debug, Default)]
pub struct TlsConfig {
    /// Trust anchors added on top of the bundled Mozilla root store.
    pub extra_roots: Vec<CertificateDer<'static>>,
    /// Client certificate chain and private key for mutual TLS, if the
    /// upstream requires one.
    pub client_cert: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
}

impl TlsConfig {
    /// Build a `rustls::ClientConfig` with ALPN set to exactly
    /// `alpn_protocols`, in that preference order.
    ///
    /// Building a custom `ClientConfig` bypasses whatever ALPN defaulting an
    /// HTTP client might otherwise apply to its own built-in TLS setup.
    /// Forgetting to set `alpn_protocols` here is the classic trap: the
    /// connection still completes, but the server has nothing to negotiate
    /// against and every connection silently downgrades to HTTP/1.1 even
    /// when the transport above us asked for HTTP/2 or HTTP/3.
    ///
    /// Consumes `self`: a client certificate's private key shouldn't be
    /// cloned just to hand it to `rustls`.
    pub fn build(self, alpn_protocols: &[&[u8]]) -> Result<ClientConfig, rustls::Error> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for cert in self.extra_roots {
            let _ = roots.add(cert);
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let mut config = match self.client_cert {
            Some((chain, key)) => builder.with_client_auth_cert(chain, key)?,
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = alpn_protocols.iter().map(|p| p.to_vec()).collect();
        Ok(config)
    }
}
