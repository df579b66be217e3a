// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use metrics::counter;

use crate::error::ErrorCategory;

/// Per-resolver metrics sidecar.
///
/// A resolver constructs its own `Metrics` at startup, tagged with a role
/// (`"client"`, `"listener"`, ...) and its identifier, and updates it as
/// queries resolve. There is no global registry here: each instance owns its
/// counters, and rendering/export is the embedding process's problem, not
/// this crate's.
#[derive(Clone, Debug)]
pub struct Metrics {
    role: &'static str,
    id: Arc<str>,
}

impl Metrics {
    /// Create a sink for a resolver with the given `role` and `id`.
    pub fn new(role: &'static str, id: impl Into<Arc<str>>) -> Self {
        Self {
            role,
            id: id.into(),
        }
    }

    /// The identifier this sink tags its counters with.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record `n` queries accepted by this resolver.
    pub fn query_add(&self, n: u64) {
        counter!(
            "dnsmux_resolver_queries_total",
            "role" => self.role,
            "resolver" => self.id.clone(),
        )
        .increment(n);
    }

    /// Record `n` responses with the given DNS response code.
    pub fn response_add(&self, rcode: impl AsRef<str>, n: u64) {
        counter!(
            "dnsmux_resolver_responses_total",
            "role" => self.role,
            "resolver" => self.id.clone(),
            "rcode" => rcode.as_ref().to_string(),
        )
        .increment(n);
    }

    /// Record `n` errors of the given category.
    pub fn err_add(&self, category: &ErrorCategory, n: u64) {
        counter!(
            "dnsmux_resolver_errors_total",
            "role" => self.role,
            "resolver" => self.id.clone(),
            "category" => category.to_string(),
        )
        .increment(n);
    }
}
