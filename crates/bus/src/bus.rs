use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    chatrelay_common::{Error, InboundMessage, OutboundMessage, Result},
    tokio::runtime::Handle,
    tracing::{debug, info},
};

use crate::{handler::MessageHandler, topic::Topic};

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default bound on how long a publish waits for room in one subscriber queue.
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);

/// Tuning for subscriber queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub queue_capacity: usize,
    pub handoff_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
        }
    }
}

/// Opaque handle returned by `subscribe_*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// In-process broadcast router with an inbound and an outbound stream.
///
/// The bus does no routing of its own: every subscriber of a stream sees every
/// message published to it, and outbound subscribers filter on
/// [`OutboundMessage::channel`] themselves. Handlers run on the runtime the bus
/// was created on, in subscription order per message.
///
/// Cloning is cheap; clones share the same subscriptions.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: BusConfig,
    runtime: Handle,
    next_id: AtomicU64,
    inbound: Topic<InboundMessage>,
    outbound: Topic<OutboundMessage>,
}

impl MessageBus {
    /// Create a bus bound to the current Tokio runtime.
    pub fn new(config: BusConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::message(format!("message bus needs a tokio runtime: {e}")))?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a bus whose subscriber workers run on `runtime`.
    pub fn with_runtime(config: BusConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                runtime,
                next_id: AtomicU64::new(1),
                inbound: Topic::new("inbound"),
                outbound: Topic::new("outbound"),
            }),
        }
    }

    pub fn config(&self) -> BusConfig {
        self.inner.config
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe_inbound(
        &self,
        handler: Arc<dyn MessageHandler<InboundMessage>>,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.inner.inbound.subscribe(
            id,
            handler,
            self.inner.config.queue_capacity,
            &self.inner.runtime,
        );
        id
    }

    pub fn subscribe_outbound(
        &self,
        handler: Arc<dyn MessageHandler<OutboundMessage>>,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.inner.outbound.subscribe(
            id,
            handler,
            self.inner.config.queue_capacity,
            &self.inner.runtime,
        );
        id
    }

    /// Remove an inbound subscription. Unknown ids are ignored.
    pub fn unsubscribe_inbound(&self, id: SubscriptionId) {
        if !self.inner.inbound.unsubscribe(id) {
            debug!(subscription = %id, "unsubscribe_inbound: unknown subscription");
        }
    }

    /// Remove an outbound subscription. Unknown ids are ignored.
    pub fn unsubscribe_outbound(&self, id: SubscriptionId) {
        if !self.inner.outbound.unsubscribe(id) {
            debug!(subscription = %id, "unsubscribe_outbound: unknown subscription");
        }
    }

    /// Queue `message` for every inbound subscriber.
    ///
    /// Returns once the message is handed to each subscriber queue, not after
    /// the handlers ran. The return value is the number of subscribers that
    /// accepted it.
    pub async fn publish_inbound(&self, message: InboundMessage) -> usize {
        self.inner
            .inbound
            .publish(message, self.inner.config.handoff_timeout)
            .await
    }

    /// Queue `message` for every outbound subscriber. See [`publish_inbound`](Self::publish_inbound).
    pub async fn publish_outbound(&self, message: OutboundMessage) -> usize {
        self.inner
            .outbound
            .publish(message, self.inner.config.handoff_timeout)
            .await
    }

    pub fn inbound_subscribers(&self) -> usize {
        self.inner.inbound.len()
    }

    pub fn outbound_subscribers(&self) -> usize {
        self.inner.outbound.len()
    }

    /// Drop every subscription on both streams and stop their workers.
    pub fn shutdown(&self) {
        let inbound = self.inner.inbound.clear();
        let outbound = self.inner.outbound.clear();
        info!(inbound, outbound, "message bus shut down");
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.inner.config)
            .field("inbound_subscribers", &self.inbound_subscribers())
            .field("outbound_subscribers", &self.outbound_subscribers())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::handler_fn,
        tokio::sync::{Notify, mpsc},
    };

    const WAIT: Duration = Duration::from_secs(2);

    fn bus() -> MessageBus {
        MessageBus::new(BusConfig::default()).unwrap()
    }

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage::builder("test", "+1", "+1")
            .content(content)
            .build()
    }

    /// Handler that forwards each message's content into a channel.
    fn recording_inbound(
        tag: &'static str,
    ) -> (
        Arc<dyn MessageHandler<InboundMessage>>,
        mpsc::UnboundedReceiver<(&'static str, String)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |msg: Arc<InboundMessage>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((tag, msg.content().to_string()));
                Ok(())
            }
        });
        (handler, rx)
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("handler channel closed")
    }

    async fn assert_silent<T: fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "handler should not have been invoked");
    }

    #[tokio::test]
    async fn publish_reaches_every_inbound_subscriber() {
        let bus = bus();
        let (a, mut rx_a) = recording_inbound("a");
        let (b, mut rx_b) = recording_inbound("b");
        bus.subscribe_inbound(a);
        bus.subscribe_inbound(b);

        assert_eq!(bus.publish_inbound(inbound("hello")).await, 2);
        assert_eq!(next(&mut rx_a).await, ("a", "hello".to_string()));
        assert_eq!(next(&mut rx_b).await, ("b", "hello".to_string()));
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let bus = bus();
        let (a, mut rx) = recording_inbound("a");
        bus.subscribe_inbound(a);

        assert_eq!(
            bus.publish_outbound(OutboundMessage::new("x", "1", "hi"))
                .await,
            0
        );
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn unsubscribed_handler_is_not_invoked() {
        let bus = bus();
        let (a, mut rx_a) = recording_inbound("a");
        let (b, mut rx_b) = recording_inbound("b");
        let id_a = bus.subscribe_inbound(a);
        bus.subscribe_inbound(b);

        bus.unsubscribe_inbound(id_a);
        assert_eq!(bus.inbound_subscribers(), 1);

        bus.publish_inbound(inbound("after")).await;
        assert_eq!(next(&mut rx_b).await.1, "after");
        assert_silent(&mut rx_a).await;
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = bus();
        let (a, _rx) = recording_inbound("a");
        let id = bus.subscribe_inbound(a);

        bus.unsubscribe_inbound(id);
        bus.unsubscribe_inbound(id);
        // An inbound id means nothing to the outbound stream.
        bus.unsubscribe_outbound(id);
        bus.unsubscribe_outbound(SubscriptionId(9_999));

        assert_eq!(bus.inbound_subscribers(), 0);
        assert_eq!(bus.outbound_subscribers(), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_affect_others() {
        let bus = bus();
        let failing = handler_fn(|_msg: Arc<InboundMessage>| async {
            Err(anyhow::anyhow!("engine exploded"))
        });
        let (ok, mut rx) = recording_inbound("ok");
        bus.subscribe_inbound(failing);
        bus.subscribe_inbound(ok);

        bus.publish_inbound(inbound("one")).await;
        bus.publish_inbound(inbound("two")).await;

        assert_eq!(next(&mut rx).await.1, "one");
        assert_eq!(next(&mut rx).await.1, "two");
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let bus = bus();
        let (tx, mut survived) = mpsc::unbounded_channel();
        let panicky = handler_fn(move |msg: Arc<InboundMessage>| {
            let tx = tx.clone();
            async move {
                if msg.content() == "boom" {
                    panic!("handler bug");
                }
                let _ = tx.send(msg.content().to_string());
                Ok(())
            }
        });
        let (ok, mut rx) = recording_inbound("ok");
        bus.subscribe_inbound(panicky);
        bus.subscribe_inbound(ok);

        bus.publish_inbound(inbound("boom")).await;
        bus.publish_inbound(inbound("calm")).await;

        assert_eq!(next(&mut rx).await.1, "boom");
        assert_eq!(next(&mut rx).await.1, "calm");
        // The panicking subscriber keeps receiving after the fault.
        assert_eq!(next(&mut survived).await, "calm");
    }

    #[tokio::test]
    async fn delivery_order_matches_publish_order() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe_outbound(handler_fn(move |msg: Arc<OutboundMessage>| {
            let tx = tx.clone();
            async move {
                tokio::task::yield_now().await;
                let _ = tx.send(msg.content.clone());
                Ok(())
            }
        }));

        for i in 0..50 {
            bus.publish_outbound(OutboundMessage::new("signal", "42", i.to_string()))
                .await;
        }
        for i in 0..50 {
            assert_eq!(next(&mut rx).await, i.to_string());
        }
    }

    #[tokio::test]
    async fn full_queue_drops_after_handoff_timeout() {
        let bus = MessageBus::new(BusConfig {
            queue_capacity: 1,
            handoff_timeout: Duration::from_millis(20),
        })
        .unwrap();
        let gate = Arc::new(Notify::new());
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let handler_gate = Arc::clone(&gate);
        bus.subscribe_inbound(handler_fn(move |msg: Arc<InboundMessage>| {
            let gate = Arc::clone(&handler_gate);
            let entered_tx = entered_tx.clone();
            async move {
                let _ = entered_tx.send(msg.content().to_string());
                gate.notified().await;
                Ok(())
            }
        }));

        assert_eq!(bus.publish_inbound(inbound("1")).await, 1);
        assert_eq!(next(&mut entered).await, "1");
        // Worker is busy with "1": "2" fills the queue, "3" finds no room.
        assert_eq!(bus.publish_inbound(inbound("2")).await, 1);
        assert_eq!(bus.publish_inbound(inbound("3")).await, 0);

        gate.notify_one();
        assert_eq!(next(&mut entered).await, "2");
        gate.notify_one();
        assert_silent(&mut entered).await;
    }

    #[tokio::test]
    async fn shutdown_removes_all_subscriptions() {
        let bus = bus();
        let (a, mut rx) = recording_inbound("a");
        bus.subscribe_inbound(a);
        bus.subscribe_outbound(handler_fn(|_msg: Arc<OutboundMessage>| async { Ok(()) }));

        bus.shutdown();
        assert_eq!(bus.inbound_subscribers(), 0);
        assert_eq!(bus.outbound_subscribers(), 0);
        assert_eq!(bus.publish_inbound(inbound("late")).await, 0);
        assert_silent(&mut rx).await;
    }

    #[test]
    fn new_requires_a_runtime() {
        assert!(MessageBus::new(BusConfig::default()).is_err());
    }

    #[test]
    fn subscription_ids_display_compactly() {
        assert_eq!(SubscriptionId(7).to_string(), "sub-7");
    }
}
