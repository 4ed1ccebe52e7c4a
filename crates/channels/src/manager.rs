use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use {
    futures::{FutureExt, future::join_all},
    tracing::{error, info},
};

use crate::{
    Error, Result,
    channel::{Channel, ChannelStatus},
};

/// Result of one channel's start or stop.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub name: String,
    pub result: Result<()>,
}

/// Per-channel results of [`ChannelManager::start_all`] or
/// [`ChannelManager::stop_all`], in registration order.
#[derive(Debug, Default)]
pub struct LifecycleReport {
    outcomes: Vec<ChannelOutcome>,
}

impl LifecycleReport {
    pub fn outcomes(&self) -> &[ChannelOutcome] {
        &self.outcomes
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.name.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name.as_str(), e)))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

impl fmt::Display for LifecycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed();
        write!(
            f,
            "{} ok, {} failed",
            self.outcomes.len() - failed.len(),
            failed.len()
        )?;
        for (name, err) in failed {
            write!(f, "; {name}: {err}")?;
        }
        Ok(())
    }
}

/// Owns the configured channels and drives their lifecycles together.
///
/// A failure (or panic) in one channel never prevents the others from
/// starting or stopping.
#[derive(Default)]
pub struct ChannelManager {
    channels: Vec<Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. Names must be unique.
    pub fn register(&mut self, channel: Arc<dyn Channel>) -> Result<()> {
        let name = channel.name().to_string();
        if self.get(&name).is_some() {
            return Err(Error::configuration(name, "channel already registered"));
        }
        self.channels.push(channel);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(Arc::clone)
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel concurrently.
    pub async fn start_all(&self) -> LifecycleReport {
        let outcomes = join_all(self.channels.iter().map(|channel| async move {
            let name = channel.name().to_string();
            let result = match AssertUnwindSafe(channel.start()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(Error::unavailable(format!("{name} panicked while starting"))),
            };
            match &result {
                Ok(()) => info!(channel = %name, "channel started"),
                Err(e) => error!(channel = %name, error = %e, "failed to start channel"),
            }
            ChannelOutcome { name, result }
        }))
        .await;
        LifecycleReport { outcomes }
    }

    /// Stop every channel concurrently.
    pub async fn stop_all(&self) -> LifecycleReport {
        let outcomes = join_all(self.channels.iter().map(|channel| async move {
            let name = channel.name().to_string();
            let result = match AssertUnwindSafe(channel.stop()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(Error::unavailable(format!("{name} panicked while stopping"))),
            };
            match &result {
                Ok(()) => info!(channel = %name, "channel stopped"),
                Err(e) => error!(channel = %name, error = %e, "failed to stop channel"),
            }
            ChannelOutcome { name, result }
        }))
        .await;
        LifecycleReport { outcomes }
    }

    /// Snapshot of every channel's status.
    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.channels.iter().map(|c| c.status()).collect()
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.names())
            .finish()
    }
}
