//! The middleware chain (spec §4.3 "Middleware & hooks", §4.5): wraps
//! each operation as `(ctx, next) -> result`, registered per-operation
//! in registration order and executed as a true onion — a middleware
//! may inspect/replace `ctx.args`, call `next` to continue, and inspect
//! or replace the result that comes back.
//!
//! Distinct from [`crate::hooks`]: middleware wraps the *entire*
//! operation (including every hook point within it), while hooks fire
//! at named points inside the core op.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use s3db_common::Error;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct MiddlewareContext {
    pub operation: String,
    pub resource: String,
    pub args: Value,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: MiddlewareContext, next: Next<'_>) -> Result<Value, Error>;
}

/// The resource's core operation, invoked once the chain is exhausted.
/// Owned (no borrowed lifetime) so it can be built fresh per call from
/// a `Resource` method without fighting the middleware chain's borrows.
pub type CoreOp = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

/// The remaining middleware chain plus the core op it eventually calls.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    core: &'a CoreOp,
}

impl<'a> Next<'a> {
    pub fn call(self, ctx: MiddlewareContext) -> BoxFuture<'a, Result<Value, Error>> {
        match self.chain.split_first() {
            Some((mw, rest)) => {
                let next = Next { chain: rest, core: self.core };
                let mw = Arc::clone(mw);
                Box::pin(async move { mw.call(ctx, next).await })
            }
            None => (self.core)(ctx.args.clone()),
        }
    }
}

/// Per-operation middleware registration (`useMiddleware`, spec §4.3).
#[derive(Default)]
pub struct MiddlewareChain {
    per_operation: DashMap<String, Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn use_middleware(&self, operation: impl Into<String>, mw: Arc<dyn Middleware>) {
        self.per_operation.entry(operation.into()).or_default().push(mw);
    }

    /// Run `operation`'s middleware chain around `core`, seeded with
    /// `args`. With no middleware registered for `operation`, `core`
    /// runs directly.
    pub async fn run(&self, operation: &str, resource: &str, args: Value, core: CoreOp) -> Result<Value, Error> {
        let chain: Vec<Arc<dyn Middleware>> =
            self.per_operation.get(operation).map(|entry| entry.value().clone()).unwrap_or_default();
        let ctx = MiddlewareContext { operation: operation.to_string(), resource: resource.to_string(), args };
        let next = Next { chain: &chain, core: &core };
        next.call(ctx).await
    }
}
