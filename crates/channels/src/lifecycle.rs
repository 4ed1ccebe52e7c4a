//! Lifecycle bookkeeping reusable by channel implementations.

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use {tokio::sync::watch, tokio_util::sync::CancellationToken, tracing::debug};

use crate::{
    Error, Result,
    channel::{ChannelState, ChannelStatus},
};

/// Outcome of [`Lifecycle::begin_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartGate {
    /// The caller owns the transition and must finish with
    /// [`Lifecycle::mark_running`], [`Lifecycle::fail`] or, once
    /// [`Lifecycle::start_cancellation`] fired, [`Lifecycle::mark_stopped`].
    Proceed,
    /// Already starting or running; nothing to do.
    Skip,
}

/// Outcome of [`Lifecycle::begin_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopGate {
    /// The caller owns the teardown and must finish with
    /// [`Lifecycle::mark_stopped`].
    Proceed,
    /// A start is in flight and has been asked to abort; wait for
    /// `Stopped` with [`Lifecycle::wait_for`].
    Deferred,
    /// Already stopped or stopping; nothing to do.
    Skip,
}

#[derive(Debug, Default)]
struct Inner {
    state: ChannelState,
    last_error: Option<String>,
    stop_requested: bool,
    start_abort: CancellationToken,
}

/// State machine guarding a channel's start/stop transitions.
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    inner: Mutex<Inner>,
    changes: watch::Sender<ChannelState>,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            changes: watch::Sender::new(ChannelState::Stopped),
        }
    }

    // Never held across an `.await`.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: ChannelState) {
        inner.state = state;
        self.changes.send_replace(state);
    }

    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ChannelState::Running
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn status(&self) -> ChannelStatus {
        let inner = self.lock();
        ChannelStatus {
            name: self.name.clone(),
            state: inner.state,
            last_error: inner.last_error.clone(),
            details: None,
        }
    }

    /// `Stopped → Starting`. Fails while a stop is still in progress.
    pub fn begin_start(&self) -> Result<StartGate> {
        let mut inner = self.lock();
        match inner.state {
            ChannelState::Stopped => {
                self.set_state(&mut inner, ChannelState::Starting);
                inner.stop_requested = false;
                inner.start_abort = CancellationToken::new();
                debug!(channel = %self.name, "starting");
                Ok(StartGate::Proceed)
            },
            ChannelState::Starting | ChannelState::Running => Ok(StartGate::Skip),
            ChannelState::Stopping => Err(Error::not_running(&self.name, inner.state)),
        }
    }

    /// Fires when `stop` is called while the current start is in flight.
    pub fn start_cancellation(&self) -> CancellationToken {
        self.lock().start_abort.clone()
    }

    /// `Starting → Running`.
    ///
    /// Returns `false` (and moves to `Stopping`) when `stop` was called while
    /// starting; the caller must then release whatever it acquired and finish
    /// with [`mark_stopped`](Self::mark_stopped).
    pub fn mark_running(&self) -> bool {
        let mut inner = self.lock();
        if inner.stop_requested {
            inner.stop_requested = false;
            self.set_state(&mut inner, ChannelState::Stopping);
            debug!(channel = %self.name, "start cancelled by stop");
            return false;
        }
        self.set_state(&mut inner, ChannelState::Running);
        inner.last_error = None;
        true
    }

    /// Record a failure and return to `Stopped`.
    pub fn fail(&self, error: &Error) {
        let mut inner = self.lock();
        self.set_state(&mut inner, ChannelState::Stopped);
        inner.stop_requested = false;
        inner.last_error = Some(error.to_string());
    }

    /// `Running → Stopped` for a channel that lost its platform connection.
    ///
    /// Returns `false` when the channel was not running, e.g. because a stop
    /// already owns the teardown.
    pub fn fail_running(&self, error: &Error) -> bool {
        let mut inner = self.lock();
        if inner.state != ChannelState::Running {
            return false;
        }
        self.set_state(&mut inner, ChannelState::Stopped);
        inner.last_error = Some(error.to_string());
        true
    }

    /// Record a failure without changing state.
    pub fn record_error(&self, error: impl ToString) {
        self.lock().last_error = Some(error.to_string());
    }

    /// `Running → Stopping`.
    pub fn begin_stop(&self) -> StopGate {
        let mut inner = self.lock();
        match inner.state {
            ChannelState::Running => {
                self.set_state(&mut inner, ChannelState::Stopping);
                debug!(channel = %self.name, "stopping");
                StopGate::Proceed
            },
            ChannelState::Starting => {
                inner.stop_requested = true;
                inner.start_abort.cancel();
                StopGate::Deferred
            },
            ChannelState::Stopped | ChannelState::Stopping => StopGate::Skip,
        }
    }

    pub fn mark_stopped(&self) {
        let mut inner = self.lock();
        self.set_state(&mut inner, ChannelState::Stopped);
        inner.stop_requested = false;
    }

    /// Wait until the channel reaches `state`. Returns `false` on timeout.
    pub async fn wait_for(&self, state: ChannelState, timeout: Duration) -> bool {
        let mut changes = self.changes.subscribe();
        matches!(
            tokio::time::timeout(timeout, changes.wait_for(|current| *current == state)).await,
            Ok(Ok(_))
        )
    }

    /// Fail with [`Error::NotRunning`] unless the channel is running.
    pub fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ChannelState::Running => Ok(()),
            state => Err(Error::not_running(&self.name, state)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle() {
        let lc = Lifecycle::new("test");
        assert_eq!(lc.state(), ChannelState::Stopped);
        assert_eq!(lc.begin_start().unwrap(), StartGate::Proceed);
        assert_eq!(lc.state(), ChannelState::Starting);
        assert!(lc.mark_running());
        assert!(lc.is_running());
        assert_eq!(lc.begin_stop(), StopGate::Proceed);
        assert_eq!(lc.state(), ChannelState::Stopping);
        lc.mark_stopped();
        assert_eq!(lc.state(), ChannelState::Stopped);
    }

    #[test]
    fn start_while_running_is_skipped() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        lc.mark_running();
        assert_eq!(lc.begin_start().unwrap(), StartGate::Skip);
        assert!(lc.is_running());
    }

    #[test]
    fn start_while_stopping_is_rejected() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        lc.mark_running();
        lc.begin_stop();
        let err = lc.begin_start().unwrap_err();
        assert!(matches!(err, Error::NotRunning { .. }));
    }

    #[test]
    fn stop_when_stopped_is_skipped() {
        let lc = Lifecycle::new("test");
        assert_eq!(lc.begin_stop(), StopGate::Skip);
        assert_eq!(lc.state(), ChannelState::Stopped);
    }

    #[test]
    fn stop_during_start_cancels_it() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        let abort = lc.start_cancellation();
        assert_eq!(lc.begin_stop(), StopGate::Deferred);
        assert!(abort.is_cancelled());
        assert!(!lc.mark_running());
        assert_eq!(lc.state(), ChannelState::Stopping);
        lc.mark_stopped();
        assert_eq!(lc.state(), ChannelState::Stopped);

        // The next start is not affected by the earlier request.
        lc.begin_start().unwrap();
        assert!(!lc.start_cancellation().is_cancelled());
        assert!(lc.mark_running());
    }

    #[test]
    fn failure_is_recorded_and_cleared_by_next_start() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        lc.fail(&Error::configuration("test", "missing phone_number"));
        assert_eq!(lc.state(), ChannelState::Stopped);
        assert!(lc.status().last_error.unwrap().contains("phone_number"));

        lc.begin_start().unwrap();
        lc.mark_running();
        assert!(lc.last_error().is_none());
    }

    #[test]
    fn connection_loss_only_applies_while_running() {
        let lc = Lifecycle::new("test");
        let lost = Error::unavailable("stream ended");
        assert!(!lc.fail_running(&lost));

        lc.begin_start().unwrap();
        lc.mark_running();
        lc.begin_stop();
        assert!(!lc.fail_running(&lost));
        assert_eq!(lc.state(), ChannelState::Stopping);
        lc.mark_stopped();

        lc.begin_start().unwrap();
        lc.mark_running();
        assert!(lc.fail_running(&lost));
        assert_eq!(lc.state(), ChannelState::Stopped);
        assert!(lc.last_error().unwrap().contains("stream ended"));
    }

    #[test]
    fn ensure_running_reports_state() {
        let lc = Lifecycle::new("test");
        let err = lc.ensure_running().unwrap_err();
        assert_eq!(err.to_string(), "test is not running (state: stopped)");
    }

    #[tokio::test]
    async fn wait_for_observes_transitions() {
        let lc = std::sync::Arc::new(Lifecycle::new("test"));
        lc.begin_start().unwrap();
        assert!(!lc.wait_for(ChannelState::Running, Duration::from_millis(20)).await);

        let waiter = {
            let lc = std::sync::Arc::clone(&lc);
            tokio::spawn(async move {
                lc.wait_for(ChannelState::Stopped, Duration::from_secs(5))
                    .await
            })
        };
        assert_eq!(lc.begin_stop(), StopGate::Deferred);
        assert!(!lc.mark_running());
        lc.mark_stopped();
        assert!(waiter.await.unwrap());
        // Already in the requested state.
        assert!(lc.wait_for(ChannelState::Stopped, Duration::ZERO).await);
    }
}
