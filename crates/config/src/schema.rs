//! Typed configuration tree.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root of `chatrelay.{toml,yaml,json}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bus: BusSection,
    pub channels: ChannelsConfig,
}

/// Message bus tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Bound of each subscriber's queue.
    pub queue_capacity: usize,
    /// How long a publish waits for room in one subscriber queue.
    pub handoff_timeout_ms: u64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            handoff_timeout_ms: 1000,
        }
    }
}

impl BusSection {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}

/// Per-platform channel settings.
///
/// Each entry is kept as raw JSON and decoded by the adapter crate that owns
/// it, so this crate does not depend on any adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<serde_json::Value>,
}

impl ChannelsConfig {
    /// Names of the platforms that have a config section.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.signal.is_some() {
            names.push("signal");
        }
        names
    }
}
