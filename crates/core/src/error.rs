// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;

use hickory_proto::error::ProtoError;

/// Classifies a [`ResolveError`] for metrics and for callers deciding whether
/// to retry with a sibling resolver.
///
/// The `Display` impl produces exactly the label string recorded against the
/// `err` counter in a resolver's [`crate::Metrics`] sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The outgoing DNS query could not be serialized to wire format.
    Pack,
    /// URI template expansion failed.
    Template,
    /// The HTTP request could not be constructed.
    Http,
    /// Transport-level failure while sending a POST request.
    Post,
    /// Transport-level failure while sending a GET request.
    Get,
    /// The upstream responded with a non-2xx HTTP status.
    HttpStatus(u16),
    /// The response body could not be fully read.
    Read,
    /// The response body was not a parsable DNS message.
    Unpack,
    /// A fastest-IP probe failed to connect.
    Probe,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pack => write!(f, "pack"),
            Self::Template => write!(f, "template"),
            Self::Http => write!(f, "http"),
            Self::Post => write!(f, "post"),
            Self::Get => write!(f, "get"),
            Self::HttpStatus(code) => write!(f, "http{code}"),
            Self::Read => write!(f, "read"),
            Self::Unpack => write!(f, "unpack"),
            Self::Probe => write!(f, "probe"),
        }
    }
}

/// Error returned by a [`crate::Resolver`].
///
/// Carries enough structure to reproduce its metrics category without
/// re-parsing the message, matching the categories enumerated in
/// [`ErrorCategory`].
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("failed to serialize DNS query: {0}")]
    Pack(#[source] ProtoError),

    #[error("failed to expand URI template: {0}")]
    Template(String),

    #[error("failed to build HTTP request: {0}")]
    Http(String),

    #[error("POST request to upstream failed: {0}")]
    Post(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("GET request to upstream failed: {0}")]
    Get(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("upstream responded with status {0}")]
    HttpStatus(u16),

    #[error("failed to read response body: {0}")]
    Read(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("response was not a valid DNS message: {0}")]
    Unpack(#[source] ProtoError),

    #[error("fastest-ip probe failed: {0}")]
    Probe(String),
}

impl ResolveError {
    /// The metrics category this error is recorded under.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Pack(_) => ErrorCategory::Pack,
            Self::Template(_) => ErrorCategory::Template,
            Self::Http(_) => ErrorCategory::Http,
            Self::Post(_) => ErrorCategory::Post,
            Self::Get(_) => ErrorCategory::Get,
            Self::HttpStatus(code) => ErrorCategory::HttpStatus(*code),
            Self::Read(_) => ErrorCategory::Read,
            Self::Unpack(_) => ErrorCategory::Unpack,
            Self::Probe(_) => ErrorCategory::Probe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_category_formats_with_code() {
        let err = ResolveError::HttpStatus(500);
        assert_eq!(err.category().to_string(), "http500");
    }

    #[test]
    fn categories_match_spec_labels() {
        assert_eq!(ErrorCategory::Pack.to_string(), "pack");
        assert_eq!(ErrorCategory::Template.to_string(), "template");
        assert_eq!(ErrorCategory::Post.to_string(), "post");
        assert_eq!(ErrorCategory::Get.to_string(), "get");
        assert_eq!(ErrorCategory::Read.to_string(), "read");
        assert_eq!(ErrorCategory::Unpack.to_string(), "unpack");
        assert_eq!(ErrorCategory::Probe.to_string(), "probe");
    }
}
