// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Per-query sidecar passed alongside a DNS message through a resolver chain.
///
/// Resolvers never mutate a `ClientContext`; it travels unchanged from the
/// point a query entered the process down to whichever resolver ultimately
/// answers it, and is consulted only for logging and routing decisions.
#[derive(Clone, Debug)]
pub struct ClientContext {
    /// Address of the client that originated the query, if known.
    source: Option<SocketAddr>,
    /// The transport the query arrived on, e.g. `"udp"`, `"tcp"`, `"doh"`.
    transport: Arc<str>,
    /// Policy-tagged metadata attached by whatever accepted the query.
    tags: HashMap<String, String>,
}

impl ClientContext {
    /// Build a context for a query that arrived over `transport`.
    pub fn new(transport: impl Into<Arc<str>>) -> Self {
        Self {
            source: None,
            transport: transport.into(),
            tags: HashMap::new(),
        }
    }

    /// Attach the originating client address.
    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a policy tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The originating client's address, if known.
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// The transport the query arrived on.
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Look up a policy tag by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}
