//! Trivial echo engine for smoke-testing a deployment.

use std::sync::Arc;

use {
    chatrelay_bus::{InboundMessage, MessageBus, SubscriptionId, handler_fn},
    tracing::debug,
};

/// Answer every inbound message with its own content on the same chat.
pub fn attach_echo(bus: &MessageBus) -> SubscriptionId {
    let replies = bus.clone();
    bus.subscribe_inbound(handler_fn(move |msg: Arc<InboundMessage>| {
        let bus = replies.clone();
        async move {
            if msg.content().is_empty() {
                return Ok(());
            }
            let delivered = bus.publish_outbound(msg.reply(msg.content())).await;
            debug!(
                channel = msg.channel(),
                chat_id = msg.chat_id(),
                delivered,
                "echoed inbound message"
            );
            Ok(())
        }
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        chatrelay_bus::{BusConfig, OutboundMessage},
        std::time::Duration,
        tokio::sync::mpsc,
    };

    #[tokio::test]
    async fn echoes_to_the_originating_chat() {
        let bus = MessageBus::new(BusConfig::default()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe_outbound(handler_fn(move |msg: Arc<OutboundMessage>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
                Ok(())
            }
        }));
        attach_echo(&bus);

        bus.publish_inbound(InboundMessage::builder("signal", "+1", "+1").content("").build())
            .await;
        bus.publish_inbound(
            InboundMessage::builder("signal", "+1", "group.abc")
                .content("ping")
                .build(),
        )
        .await;

        let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*reply, OutboundMessage::new("signal", "group.abc", "ping"));
        assert!(rx.try_recv().is_err());
        bus.shutdown();
    }
}
