//! Dedicated worker thread for platform clients bound to their own run loop.
//!
//! Some platform clients are not `Send`, or must be created and driven on the
//! same event loop for their whole life. [`DispatchBridge`] spawns one OS
//! thread with a current-thread Tokio runtime, builds the client there via a
//! [`WorkerConnector`], and marshals outbound commands into that loop. Inbound
//! platform events flow back to the caller through an unbounded channel.

use std::{fmt, rc::Rc, sync::Arc, thread::JoinHandle, time::Duration};

use {
    async_trait::async_trait,
    tokio::{
        sync::{
            mpsc::{self, error::SendTimeoutError},
            oneshot,
        },
        task::LocalSet,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{Error, Result};

/// Default wait for the worker to report ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);
/// Default wait for a single marshalled send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Default wait for the worker to finish after cancellation.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ── Worker-side traits ──────────────────────────────────────────────────────

/// Platform client living on the worker thread.
///
/// `execute` and `run` are polled concurrently on the same loop; commands
/// are executed one at a time in submission order. A command still running
/// when the worker is cancelled is dropped and its caller gets
/// [`Error::Unavailable`].
#[async_trait(?Send)]
pub trait WorkerClient: 'static {
    type Command: Send + 'static;
    type Event: Send + 'static;

    /// Perform one outbound command.
    async fn execute(&self, command: Self::Command) -> Result<()>;

    /// Receive platform events until `cancel` fires or the connection ends.
    async fn run(&self, events: EventSink<Self::Event>, cancel: CancellationToken) -> Result<()>;

    /// Release platform resources. Called once, after `run` returned.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds a [`WorkerClient`] inside the worker's run loop.
#[async_trait(?Send)]
pub trait WorkerConnector: Send + Sync + 'static {
    type Client: WorkerClient;

    async fn connect(&self) -> Result<Self::Client>;
}

/// Message delivered from the worker to the owning thread.
#[derive(Debug)]
pub enum WorkerEvent<E> {
    Event(E),
    /// Last message of a worker. `Ok` when it ended because it was stopped.
    Exited(Result<()>),
}

/// Handle given to [`WorkerClient::run`] for emitting inbound events.
pub struct EventSink<E> {
    tx: mpsc::UnboundedSender<WorkerEvent<E>>,
}

impl<E> EventSink<E> {
    /// Returns `false` once the receiving side is gone.
    pub fn emit(&self, event: E) -> bool {
        self.tx.send(WorkerEvent::Event(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

// ── Bridge ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTimeouts {
    pub ready: Duration,
    pub send: Duration,
    pub stop: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            ready: DEFAULT_READY_TIMEOUT,
            send: DEFAULT_SEND_TIMEOUT,
            stop: DEFAULT_STOP_TIMEOUT,
        }
    }
}

struct Dispatch<Cmd> {
    command: Cmd,
    reply: oneshot::Sender<Result<()>>,
}

/// Owning-side handle to a running worker.
///
/// Dropping the bridge cancels the worker without waiting for it; call
/// [`stop`](Self::stop) for a bounded, observed shutdown.
pub struct DispatchBridge<Cmd> {
    handle: BridgeHandle<Cmd>,
    done: Option<oneshot::Receiver<()>>,
    thread: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

/// Cloneable sender side of a [`DispatchBridge`].
///
/// Outlives neither the worker nor its cancellation: once the bridge is
/// stopped every dispatch fails with [`Error::Unavailable`].
pub struct BridgeHandle<Cmd> {
    name: String,
    commands: mpsc::Sender<Dispatch<Cmd>>,
    cancel: CancellationToken,
    send_timeout: Duration,
}

impl<Cmd> Clone for BridgeHandle<Cmd> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            commands: self.commands.clone(),
            cancel: self.cancel.clone(),
            send_timeout: self.send_timeout,
        }
    }
}

/// Receiving end for events emitted by the worker.
pub type WorkerEvents<E> = mpsc::UnboundedReceiver<WorkerEvent<E>>;

impl<Cmd> DispatchBridge<Cmd>
where
    Cmd: Send + 'static,
{
    /// Spawn the worker, connect the client inside it and wait until it is
    /// ready or `timeouts.ready` elapses.
    pub async fn start<K>(
        name: impl Into<String>,
        connector: Arc<K>,
        timeouts: BridgeTimeouts,
    ) -> Result<(Self, WorkerEvents<<K::Client as WorkerClient>::Event>)>
    where
        K: WorkerConnector,
        K::Client: WorkerClient<Command = Cmd>,
    {
        let name = name.into();
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let thread = {
            let name = name.clone();
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name(format!("{name}-worker"))
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = ready_tx.send(Err(Error::transport("build worker runtime", e)));
                            return;
                        },
                    };
                    let local = LocalSet::new();
                    local.block_on(
                        &runtime,
                        worker_main(name, connector, ready_tx, commands_rx, events_tx, cancel),
                    );
                    drop(local);
                    drop(runtime);
                    let _ = done_tx.send(());
                })
                .map_err(|e| Error::transport("spawn worker thread", e))?
        };

        let bridge = Self {
            handle: BridgeHandle {
                name,
                commands: commands_tx,
                cancel,
                send_timeout: timeouts.send,
            },
            done: Some(done_rx),
            thread: Some(thread),
            stop_timeout: timeouts.stop,
        };

        match tokio::time::timeout(timeouts.ready, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(worker = %bridge.name(), "worker ready");
                Ok((bridge, events_rx))
            },
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::unavailable(format!(
                "{} worker exited before becoming ready",
                bridge.name()
            ))),
            Err(_) => {
                warn!(
                    worker = %bridge.name(),
                    timeout_ms = timeouts.ready.as_millis() as u64,
                    "worker did not become ready"
                );
                Err(Error::lifecycle_timeout(
                    format!("start {} worker", bridge.name()),
                    timeouts.ready,
                ))
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Cloneable sender for this worker.
    pub fn handle(&self) -> BridgeHandle<Cmd> {
        self.handle.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    pub async fn dispatch(&self, command: Cmd) -> Result<()> {
        self.handle.dispatch(command).await
    }

    /// Cancel the worker and wait up to the stop timeout for it to finish.
    ///
    /// On timeout the thread is left detached and
    /// [`Error::LifecycleTimeout`] is returned.
    pub async fn stop(mut self) -> Result<()> {
        self.handle.cancel.cancel();
        let timeout = self.stop_timeout;

        if let Some(done) = self.done.take() {
            // A dropped sender means the thread already unwound.
            if tokio::time::timeout(timeout, done).await.is_err() {
                warn!(
                    worker = %self.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "worker did not stop in time, detaching"
                );
                self.thread.take();
                return Err(Error::lifecycle_timeout(
                    format!("stop {} worker", self.name()),
                    timeout,
                ));
            }
        }

        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {},
                Ok(Err(_)) => error!(worker = %self.name(), "worker thread panicked"),
                Err(e) => warn!(worker = %self.name(), error = %e, "failed to join worker thread"),
            }
        }
        debug!(worker = %self.name(), "worker stopped");
        Ok(())
    }
}

impl<Cmd> BridgeHandle<Cmd>
where
    Cmd: Send + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker is still accepting commands.
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled() && !self.commands.is_closed()
    }

    /// Run `command` on the worker and wait for its result.
    pub async fn dispatch(&self, command: Cmd) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::unavailable(format!(
                "{} worker is not running",
                self.name
            )));
        }
        let deadline = self.send_timeout;
        let (reply, result) = oneshot::channel();
        match self
            .commands
            .send_timeout(Dispatch { command, reply }, deadline)
            .await
        {
            Ok(()) => {},
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(Error::transport_message(
                    format!("{} send", self.name),
                    format!("worker queue full for {}ms", deadline.as_millis()),
                ));
            },
            Err(SendTimeoutError::Closed(_)) => {
                return Err(Error::unavailable(format!(
                    "{} worker is not running",
                    self.name
                )));
            },
        }

        match tokio::time::timeout(deadline, result).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::unavailable(format!(
                "{} worker dropped the command",
                self.name
            ))),
            Err(_) => Err(Error::transport_message(
                format!("{} send", self.name),
                format!("no result after {}ms", deadline.as_millis()),
            )),
        }
    }
}

impl<Cmd> Drop for DispatchBridge<Cmd> {
    fn drop(&mut self) {
        self.handle.cancel.cancel();
    }
}

impl<Cmd> fmt::Debug for DispatchBridge<Cmd> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchBridge")
            .field("name", &self.handle.name)
            .field("cancelled", &self.handle.cancel.is_cancelled())
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

impl<Cmd> fmt::Debug for BridgeHandle<Cmd> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("name", &self.name)
            .field("alive", &!self.cancel.is_cancelled())
            .finish()
    }
}

// ── Worker side ─────────────────────────────────────────────────────────────

async fn worker_main<K>(
    name: String,
    connector: Arc<K>,
    ready: oneshot::Sender<Result<()>>,
    commands: mpsc::Receiver<Dispatch<<K::Client as WorkerClient>::Command>>,
    events: mpsc::UnboundedSender<WorkerEvent<<K::Client as WorkerClient>::Event>>,
    cancel: CancellationToken,
) where
    K: WorkerConnector,
{
    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        result = connector.connect() => result,
    };
    let client = match connected {
        Ok(client) => Rc::new(client),
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        },
    };
    if ready.send(Ok(())).is_err() {
        // The starter gave up waiting.
        if let Err(e) = client.shutdown().await {
            debug!(worker = %name, error = %e, "shutdown after abandoned start failed");
        }
        return;
    }

    let executor = tokio::task::spawn_local(execute_commands(
        Rc::clone(&client),
        commands,
        cancel.clone(),
    ));
    let sink = EventSink { tx: events.clone() };
    let outcome = tokio::select! {
        biased;
        result = client.run(sink, cancel.clone()) => result,
        () = cancel.cancelled() => Ok(()),
    };
    if let Err(e) = &outcome {
        error!(worker = %name, error = %e, "worker run loop failed");
    }

    cancel.cancel();
    if executor.await.is_err() {
        error!(worker = %name, "command executor panicked");
    }
    if let Err(e) = client.shutdown().await {
        warn!(worker = %name, error = %e, "worker client shutdown failed");
    }
    let _ = events.send(WorkerEvent::Exited(outcome));
}

async fn execute_commands<C>(
    client: Rc<C>,
    mut commands: mpsc::Receiver<Dispatch<C::Command>>,
    cancel: CancellationToken,
) where
    C: WorkerClient,
{
    loop {
        let dispatch = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = commands.recv() => match next {
                Some(dispatch) => dispatch,
                None => break,
            },
        };
        let Dispatch { command, reply } = dispatch;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = reply.send(Err(Error::unavailable(
                    "worker stopped before the command completed",
                )));
                break;
            },
            result = client.execute(command) => result,
        };
        // The caller may have timed out already.
        let _ = reply.send(result);
    }
    commands.close();
}
