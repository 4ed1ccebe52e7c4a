use std::{future::Future, sync::Arc};

use async_trait::async_trait;

/// Receives every message published to the topic it is subscribed to.
///
/// A returned error (or a panic) is logged by the bus and never reaches the
/// publisher or the other subscribers.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync
where
    M: Send + Sync + 'static,
{
    async fn handle(&self, message: Arc<M>) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<M, F, Fut> MessageHandler<M> for FnHandler<F>
where
    M: Send + Sync + 'static,
    F: Fn(Arc<M>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: Arc<M>) -> anyhow::Result<()> {
        (self.f)(message).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```ignore
/// let id = bus.subscribe_inbound(handler_fn(|msg| async move {
///     tracing::info!(sender = msg.sender_id(), "got message");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<M, F, Fut>(f: F) -> Arc<dyn MessageHandler<M>>
where
    M: Send + Sync + 'static,
    F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
