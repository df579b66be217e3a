// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use async_trait::async_trait;
use hickory_proto::op::Message;

use crate::context::ClientContext;
use crate::error::ResolveError;

/// The contract every resolver in a dnsmux chain implements.
///
/// A resolver maps a query plus its [`ClientContext`] to a response or an
/// error. Resolvers compose: one resolver may hold zero or more children and
/// invoke them from inside its own [`Resolver::resolve`]; there is no global
/// registry, children are wired up at construction.
///
/// Implementations must return a response whose transaction ID equals the
/// query's. Internal concurrency is permitted, but `resolve` itself is
/// `async` and should not block the caller's task.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `query` on behalf of `ctx`, returning a DNS response or a
    /// categorized error.
    async fn resolve(&self, query: Message, ctx: &ClientContext) -> Result<Message, ResolveError>;

    /// A short, operator-assigned identifier for this resolver instance, used
    /// in logs and metrics. Not required to be globally unique, but stable
    /// for the resolver's lifetime.
    fn id(&self) -> &str;
}
