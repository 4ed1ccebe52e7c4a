//! Channel roster built from configuration.

use std::sync::Arc;

use {
    chatrelay_bus::MessageBus,
    chatrelay_channels::{Channel, ChannelManager},
    chatrelay_config::RelayConfig,
    serde_json::Value,
    tracing::debug,
};

/// Register one channel per enabled platform section.
pub fn build(config: &RelayConfig, bus: &MessageBus) -> anyhow::Result<ChannelManager> {
    let mut manager = ChannelManager::new();
    if let Some(raw) = &config.channels.signal {
        match signal_channel(raw, bus)? {
            Some(channel) => manager.register(channel)?,
            None => debug!(channel = "signal", "channel disabled in config"),
        }
    }
    Ok(manager)
}

#[cfg(feature = "signal")]
fn signal_channel(raw: &Value, bus: &MessageBus) -> anyhow::Result<Option<Arc<dyn Channel>>> {
    use chatrelay_signal::{SignalAccountConfig, SignalChannel};

    let config = SignalAccountConfig::from_value(raw.clone())?;
    if !config.enabled {
        return Ok(None);
    }
    let channel: Arc<dyn Channel> = SignalChannel::new(config, bus.clone());
    Ok(Some(channel))
}

#[cfg(not(feature = "signal"))]
fn signal_channel(raw: &Value, _bus: &MessageBus) -> anyhow::Result<Option<Arc<dyn Channel>>> {
    use chatrelay_channels::UnavailableChannel;

    if !raw.get("enabled").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(None);
    }
    let channel: Arc<dyn Channel> = Arc::new(UnavailableChannel::new(
        "signal",
        "this build does not include Signal support (cargo feature `signal`)",
    ));
    Ok(Some(channel))
}
