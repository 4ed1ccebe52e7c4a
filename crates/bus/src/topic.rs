use std::{
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    futures::FutureExt,
    tokio::{
        runtime::Handle,
        sync::mpsc::{self, error::SendTimeoutError},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
};

use crate::{bus::SubscriptionId, handler::MessageHandler};

/// One stream of the bus with its current subscribers.
///
/// Each subscriber owns a bounded FIFO queue drained by a dedicated worker
/// task, so a slow handler only delays its own queue.
pub(crate) struct Topic<M> {
    name: &'static str,
    subscribers: Mutex<BTreeMap<SubscriptionId, Subscriber<M>>>,
}

struct Subscriber<M> {
    queue: mpsc::Sender<Arc<M>>,
    cancel: CancellationToken,
}

impl<M> Topic<M>
where
    M: Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Mutex::new(BTreeMap::new()),
        }
    }

    // Never held across an `.await`.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriptionId, Subscriber<M>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn subscribe(
        &self,
        id: SubscriptionId,
        handler: Arc<dyn MessageHandler<M>>,
        capacity: usize,
        runtime: &Handle,
    ) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        runtime.spawn(drain(self.name, id, handler, rx, cancel.clone()));
        self.lock().insert(id, Subscriber { queue, cancel });
        debug!(topic = self.name, subscription = %id, "subscribed");
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(subscriber) => {
                subscriber.cancel.cancel();
                debug!(topic = self.name, subscription = %id, "unsubscribed");
                true
            },
            None => false,
        }
    }

    /// Hand the message to every current subscriber queue.
    ///
    /// Returns the number of subscribers that accepted it. A queue that stays
    /// full for `handoff` is skipped for this message.
    pub(crate) async fn publish(&self, message: M, handoff: Duration) -> usize {
        let message = Arc::new(message);
        let targets: Vec<(SubscriptionId, mpsc::Sender<Arc<M>>)> = self
            .lock()
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.queue.clone()))
            .collect();

        let mut accepted = 0;
        for (id, queue) in targets {
            match queue.send_timeout(Arc::clone(&message), handoff).await {
                Ok(()) => accepted += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(
                        topic = self.name,
                        subscription = %id,
                        timeout_ms = handoff.as_millis() as u64,
                        "subscriber queue full, message dropped"
                    );
                },
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(topic = self.name, subscription = %id, "subscriber gone, skipping");
                },
            }
        }
        accepted
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        for subscriber in drained.values() {
            subscriber.cancel.cancel();
        }
        drained.len()
    }
}

async fn drain<M>(
    topic: &'static str,
    id: SubscriptionId,
    handler: Arc<dyn MessageHandler<M>>,
    mut queue: mpsc::Receiver<Arc<M>>,
    cancel: CancellationToken,
) where
    M: Send + Sync + 'static,
{
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        match AssertUnwindSafe(handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(topic, subscription = %id, error = %e, "subscriber failed to handle message");
            },
            Err(_) => {
                error!(topic, subscription = %id, "subscriber panicked while handling message");
            },
        }
    }
    debug!(topic, subscription = %id, "subscriber worker stopped");
}
