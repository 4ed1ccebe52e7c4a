use std::sync::{Arc, Weak};

use {
    async_trait::async_trait,
    chatrelay_bus::{MessageHandler, OutboundMessage},
    tracing::{debug, error},
};

use crate::channel::Channel;

/// Outbound bus subscriber that forwards messages addressed to one channel.
///
/// Holds only a weak reference so the bus never keeps a channel alive.
pub struct OutboundRoute<C: ?Sized> {
    channel_name: String,
    target: Weak<C>,
}

impl<C> OutboundRoute<C>
where
    C: Channel + ?Sized + 'static,
{
    pub fn new(channel_name: impl Into<String>, target: Weak<C>) -> Self {
        Self {
            channel_name: channel_name.into(),
            target,
        }
    }

    pub fn into_handler(self) -> Arc<dyn MessageHandler<OutboundMessage>> {
        Arc::new(self)
    }
}

#[async_trait]
impl<C> MessageHandler<OutboundMessage> for OutboundRoute<C>
where
    C: Channel + ?Sized + 'static,
{
    async fn handle(&self, message: Arc<OutboundMessage>) -> anyhow::Result<()> {
        if message.channel != self.channel_name {
            return Ok(());
        }
        let Some(channel) = self.target.upgrade() else {
            debug!(channel = %self.channel_name, "outbound route target dropped");
            return Ok(());
        };
        if let Err(e) = channel.send(&message).await {
            error!(
                channel = %self.channel_name,
                chat_id = %message.chat_id,
                error = %e,
                "failed to deliver outbound message"
            );
            return Err(e.into());
        }
        Ok(())
    }
}
