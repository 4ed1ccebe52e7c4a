use std::sync::{Arc, Mutex, MutexGuard, Weak};

use {
    async_trait::async_trait,
    chatrelay_bus::{MessageBus, OutboundMessage, SubscriptionId},
    chatrelay_channels::{
        AllowList, BridgeHandle, Channel, ChannelState, ChannelStatus, DispatchBridge, Error,
        Lifecycle, OutboundRoute, Result, StartGate, StopGate, WorkerClient, WorkerConnector,
        WorkerEvent, WorkerEvents,
    },
    tokio::task::JoinHandle,
    tracing::{debug, error, info, warn},
};

use crate::{
    CHANNEL_NAME,
    access::check_access,
    client::{SignalCommand, SignalConnector},
    config::{ServiceEndpoint, SignalAccountConfig},
    envelope::SignalEvent,
    markdown::markdown_to_signal,
    reply_context::{ReplyContext, ReplyHandle},
};

type ConnectorFactory<K> = Box<dyn Fn(&ServiceEndpoint, &str) -> Arc<K> + Send + Sync>;

/// Resources held while the channel is running.
struct Session {
    bridge: DispatchBridge<SignalCommand>,
    subscription: SubscriptionId,
    pump: JoinHandle<()>,
}

/// Signal account attached to the message bus.
///
/// Inbound messages from allowed senders are published on the bus; outbound
/// messages addressed to `"signal"` are converted to styled text and sent
/// through the worker.
pub struct SignalChannel<K = SignalConnector> {
    me: Weak<Self>,
    config: SignalAccountConfig,
    allow: AllowList,
    bus: MessageBus,
    connector: ConnectorFactory<K>,
    lifecycle: Lifecycle,
    replies: ReplyContext,
    session: Mutex<Option<Session>>,
}

impl SignalChannel<SignalConnector> {
    /// Channel talking to the signal-cli REST service named in `config`.
    ///
    /// Address problems are reported by [`start`](Channel::start), not here.
    pub fn new(config: SignalAccountConfig, bus: MessageBus) -> Arc<Self> {
        Self::build(
            config,
            bus,
            Box::new(|endpoint: &ServiceEndpoint, account: &str| {
                Arc::new(SignalConnector::new(endpoint.clone(), account))
            }),
        )
    }
}

impl<K> SignalChannel<K>
where
    K: WorkerConnector,
    K::Client: WorkerClient<Command = SignalCommand, Event = SignalEvent>,
{
    /// Channel using a caller-supplied connector for the worker client.
    pub fn with_connector(
        config: SignalAccountConfig,
        bus: MessageBus,
        connector: Arc<K>,
    ) -> Arc<Self> {
        Self::build(
            config,
            bus,
            Box::new(move |_: &ServiceEndpoint, _: &str| Arc::clone(&connector)),
        )
    }

    fn build(
        config: SignalAccountConfig,
        bus: MessageBus,
        connector: ConnectorFactory<K>,
    ) -> Arc<Self> {
        let allow = config.allow_list();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            allow,
            bus,
            connector,
            lifecycle: Lifecycle::new(CHANNEL_NAME),
            replies: ReplyContext::new(),
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SignalAccountConfig {
        &self.config
    }

    pub fn reply_context(&self) -> &ReplyContext {
        &self.replies
    }

    // Never held across an `.await`.
    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bridge_handle(&self) -> Option<BridgeHandle<SignalCommand>> {
        self.lock_session().as_ref().map(|s| s.bridge.handle())
    }

    async fn open_session(&self) -> Result<Session> {
        let endpoint = self.config.require_endpoint()?;
        let connector = (self.connector)(&endpoint, &self.config.phone_number);
        let (bridge, events) =
            DispatchBridge::start(CHANNEL_NAME, connector, self.config.timeouts()).await?;

        let route = OutboundRoute::new(CHANNEL_NAME, self.me.clone());
        let subscription = self.bus.subscribe_outbound(route.into_handler());
        let pump = tokio::spawn(pump_events(self.me.clone(), events));
        Ok(Session {
            bridge,
            subscription,
            pump,
        })
    }

    async fn close_session(&self, session: Session) -> Result<()> {
        self.bus.unsubscribe_outbound(session.subscription);
        let result = session.bridge.stop().await;
        session.pump.abort();
        result
    }

    /// Forward one decoded event to the bus, or turn the sender away.
    async fn forward_inbound(&self, event: SignalEvent) {
        if !self.lifecycle.is_running() {
            warn!(
                channel = CHANNEL_NAME,
                sender = %event.sender,
                state = %self.lifecycle.state(),
                "dropping inbound message, channel not running"
            );
            return;
        }

        if let Err(reason) = check_access(&self.allow, &event) {
            info!(
                channel = CHANNEL_NAME,
                sender = %event.sender,
                %reason,
                "ignoring message from unauthorized sender"
            );
            if self.config.reject_unauthorized {
                self.send_rejection(&event).await;
            }
            return;
        }

        if let Some(timestamp) = event.timestamp {
            self.replies.remember(event.chat_id.clone(), ReplyHandle {
                timestamp,
                author: event.sender.clone(),
            });
        }
        let delivered = self.bus.publish_inbound(event.to_inbound(CHANNEL_NAME)).await;
        debug!(
            channel = CHANNEL_NAME,
            chat_id = %event.chat_id,
            delivered,
            "inbound message published"
        );
    }

    async fn send_rejection(&self, event: &SignalEvent) {
        let Some(handle) = self.bridge_handle() else {
            return;
        };
        let command = SignalCommand {
            recipient: event.sender.clone(),
            text: self.config.rejection_message.clone(),
            quote: None,
        };
        if let Err(e) = handle.dispatch(command).await {
            warn!(
                channel = CHANNEL_NAME,
                sender = %event.sender,
                error = %e,
                "failed to send rejection notice"
            );
        }
    }

    /// The worker ended on its own while the channel was running.
    fn worker_exited(&self, outcome: Result<()>) {
        let error = match outcome {
            Err(e) => e,
            Ok(()) => Error::unavailable("signal worker exited unexpectedly"),
        };
        self.connection_lost(&error);
    }

    fn connection_lost(&self, error: &Error) {
        if !self.lifecycle.fail_running(error) {
            return;
        }
        error!(channel = CHANNEL_NAME, error = %error, "signal worker stopped, channel is down");

        let session = self.lock_session().take();
        if let Some(session) = session {
            self.bus.unsubscribe_outbound(session.subscription);
            // The worker is already gone; dropping the bridge releases it.
            drop(session.bridge);
        }
        self.replies.clear();
    }
}

/// Drain worker events on the main runtime until the worker exits.
async fn pump_events<K>(channel: Weak<SignalChannel<K>>, mut events: WorkerEvents<SignalEvent>)
where
    K: WorkerConnector,
    K::Client: WorkerClient<Command = SignalCommand, Event = SignalEvent>,
{
    let outcome = loop {
        match events.recv().await {
            Some(WorkerEvent::Event(event)) => {
                let Some(channel) = channel.upgrade() else {
                    return;
                };
                channel.forward_inbound(event).await;
            },
            Some(WorkerEvent::Exited(outcome)) => break outcome,
            None => break Err(Error::unavailable("signal worker terminated")),
        }
    };
    if let Some(channel) = channel.upgrade() {
        channel.worker_exited(outcome);
    }
}

#[async_trait]
impl<K> Channel for SignalChannel<K>
where
    K: WorkerConnector,
    K::Client: WorkerClient<Command = SignalCommand, Event = SignalEvent>,
{
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    fn state(&self) -> ChannelState {
        self.lifecycle.state()
    }

    fn status(&self) -> ChannelStatus {
        let mut status = self.lifecycle.status();
        if !self.config.phone_number.is_empty() {
            status.details = Some(format!(
                "{} via {}",
                self.config.phone_number, self.config.signal_service
            ));
        }
        status
    }

    async fn start(&self) -> Result<()> {
        if self.lifecycle.begin_start()? == StartGate::Skip {
            debug!(channel = CHANNEL_NAME, "start ignored, already running");
            return Ok(());
        }

        let abort = self.lifecycle.start_cancellation();
        let opened = tokio::select! {
            biased;
            () = abort.cancelled() => None,
            result = self.open_session() => Some(result),
        };
        let session = match opened {
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                error!(channel = CHANNEL_NAME, error = %e, "failed to start signal channel");
                self.lifecycle.fail(&e);
                return Err(e);
            },
            None => {
                // Dropping the half-open session cancels the worker.
                debug!(channel = CHANNEL_NAME, "start abandoned, stop requested");
                self.lifecycle.mark_stopped();
                return Ok(());
            },
        };
        *self.lock_session() = Some(session);

        if !self.lifecycle.mark_running() {
            let pending = self.lock_session().take();
            if let Some(session) = pending {
                if let Err(e) = self.close_session(session).await {
                    warn!(channel = CHANNEL_NAME, error = %e, "teardown after cancelled start failed");
                    self.lifecycle.record_error(&e);
                }
            }
            self.lifecycle.mark_stopped();
            return Ok(());
        }

        // The worker may have exited before the pump could see `Running`.
        if !self.bridge_handle().is_some_and(|handle| handle.is_alive()) {
            let error = Error::unavailable("signal worker exited during start");
            self.connection_lost(&error);
            return Err(error);
        }

        info!(
            channel = CHANNEL_NAME,
            account = %self.config.phone_number,
            service = %self.config.signal_service,
            "signal channel started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        match self.lifecycle.begin_stop() {
            StopGate::Proceed => {},
            StopGate::Deferred => {
                debug!(channel = CHANNEL_NAME, "stop waiting for the pending start to wind down");
                let timeout = self.config.timeouts().stop;
                if self.lifecycle.wait_for(ChannelState::Stopped, timeout).await {
                    return Ok(());
                }
                let e = Error::lifecycle_timeout("stop signal channel during start", timeout);
                warn!(channel = CHANNEL_NAME, error = %e, "pending start did not wind down");
                self.lifecycle.record_error(&e);
                return Err(e);
            },
            StopGate::Skip => return Ok(()),
        }

        let pending = self.lock_session().take();
        let result = match pending {
            Some(session) => self.close_session(session).await,
            None => Ok(()),
        };
        self.replies.clear();
        if let Err(e) = &result {
            warn!(channel = CHANNEL_NAME, error = %e, "signal worker did not stop cleanly");
            self.lifecycle.record_error(e);
        }
        self.lifecycle.mark_stopped();
        info!(channel = CHANNEL_NAME, "signal channel stopped");
        result
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if let Err(e) = self.lifecycle.ensure_running() {
            warn!(channel = CHANNEL_NAME, chat_id = %message.chat_id, "send while not running");
            return Err(e);
        }
        let Some(handle) = self.bridge_handle() else {
            return Err(Error::not_running(CHANNEL_NAME, self.lifecycle.state()));
        };

        let quote = if self.config.quote_replies {
            self.replies.latest(&message.chat_id)
        } else {
            None
        };
        let command = SignalCommand {
            recipient: message.chat_id.clone(),
            text: markdown_to_signal(&message.content),
            quote,
        };
        handle.dispatch(command).await
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.allow.permits(sender_id)
    }
}
