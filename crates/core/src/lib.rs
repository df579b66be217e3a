// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Shared contract for dnsmux resolvers: the [`Resolver`] trait, per-query
//! [`ClientContext`], the [`Metrics`] sidecar, typed [`ResolveError`]s and
//! EDNS(0) query padding.
//!
//! This crate deliberately knows nothing about HTTP, QUIC or TLS — those live
//! in `dnsmux-transport` and `dnsmux-doh`. It only defines the shape that lets
//! resolvers compose.

mod context;
mod error;
mod metrics;
mod padding;
mod resolver;

pub use context::ClientContext;
pub use error::{ErrorCategory, ResolveError};
pub use metrics::Metrics;
pub use padding::{pad_query, DEFAULT_BLOCK_SIZE};
pub use resolver::Resolver;

pub use hickory_proto as proto;
