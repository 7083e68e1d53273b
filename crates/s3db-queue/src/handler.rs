//! The `onMessage` callback a queue drains against (spec §4.7 step 3).

use async_trait::async_trait;
use s3db_common::Error;
use serde_json::Value;

/// Implemented by whatever processes one queue message. `handle` receives
/// the message's `payload` field (not the whole record) and returns
/// `Err` to trigger the retry/dead-letter path.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<(), Error>;
}

/// Wraps a plain async closure as a [`QueueHandler`], for callers that
/// don't want to name a type.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> QueueHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), Error>> + Send,
{
    async fn handle(&self, payload: Value) -> Result<(), Error> {
        (self.0)(payload).await
    }
}
