use {async_trait::async_trait, chatrelay_common::OutboundMessage, tracing::warn};

use crate::{
    Error, Result,
    channel::{Channel, ChannelState, ChannelStatus},
};

/// Placeholder for a configured channel whose platform support is missing
/// from this build (or whose prerequisites are absent).
///
/// Starting it always fails with a configuration error, so the manager
/// reports it without affecting other channels.
#[derive(Debug, Clone)]
pub struct UnavailableChannel {
    name: String,
    reason: String,
}

impl UnavailableChannel {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl Channel for UnavailableChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        ChannelState::Stopped
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus {
            last_error: Some(self.reason.clone()),
            ..ChannelStatus::new(&self.name, ChannelState::Stopped)
        }
    }

    async fn start(&self) -> Result<()> {
        warn!(channel = %self.name, reason = %self.reason, "channel unavailable");
        Err(Error::configuration(&self.name, &self.reason))
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _message: &OutboundMessage) -> Result<()> {
        Err(Error::not_running(&self.name, ChannelState::Stopped))
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        false
    }
}
