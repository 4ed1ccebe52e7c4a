use std::fmt;

use {
    async_trait::async_trait,
    chatrelay_common::OutboundMessage,
    serde::{Deserialize, Serialize},
};

use crate::Result;

// ── Lifecycle state ─────────────────────────────────────────────────────────

/// Lifecycle state of a channel.
///
/// Transitions: `Stopped → Starting → Running → Stopping → Stopped`, plus
/// `Starting → Stopped` when startup fails or is cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Point-in-time snapshot reported by [`Channel::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub state: ChannelState,
    /// Most recent lifecycle or transport failure, cleared on a successful start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Adapter-specific detail (account, endpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ChannelStatus {
    pub fn new(name: impl Into<String>, state: ChannelState) -> Self {
        Self {
            name: name.into(),
            state,
            last_error: None,
            details: None,
        }
    }
}

// ── Channel contract ────────────────────────────────────────────────────────

/// A bidirectional bridge between one chat platform and the message bus.
///
/// Implementations hold their own lifecycle and are shared as
/// `Arc<dyn Channel>`, so every method takes `&self`.
///
/// - `start` connects to the platform, subscribes to outbound messages and
///   begins forwarding authorized inbound messages to the bus.
/// - `stop` is idempotent and releases everything `start` acquired.
/// - `send` is only valid while [`ChannelState::Running`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable, unique channel name (e.g. `"signal"`).
    fn name(&self) -> &str;

    fn state(&self) -> ChannelState;

    fn status(&self) -> ChannelStatus {
        ChannelStatus::new(self.name(), self.state())
    }

    fn is_running(&self) -> bool {
        self.state() == ChannelState::Running
    }

    /// Connect and begin relaying. Calling it while already running is a no-op.
    async fn start(&self) -> Result<()>;

    /// Disconnect and release resources. Safe to call in any state.
    async fn stop(&self) -> Result<()>;

    /// Deliver one outbound message to the platform.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Whether `sender_id` may reach the bus through this channel.
    fn is_allowed(&self, sender_id: &str) -> bool;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn state_displays_lowercase() {
        assert_eq!(ChannelState::Running.to_string(), "running");
        assert_eq!(ChannelState::default(), ChannelState::Stopped);
    }

    #[test]
    fn status_omits_empty_fields() {
        let status = ChannelStatus::new("signal", ChannelState::Starting);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "name": "signal", "state": "starting" })
        );
    }
}
